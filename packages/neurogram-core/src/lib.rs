pub mod cache;
pub mod channels;
pub mod detector;
pub mod edf;
pub mod error;
pub mod montage;
pub mod reader;
pub mod registry;
pub mod resample;
pub mod session;
pub mod types;

pub use cache::{CacheConfig, Chunk, EffectiveMatrix, TimeSeriesCache};
pub use channels::{select_standard_channels, ChannelResolver, ResolvedChannel};
pub use detector::{
    merge_positives, DetectionProgress, DetectorConfig, Oracle, ProgressReporter,
    WindowedEventDetector,
};
pub use error::{CoreError, Result};
pub use montage::{DerivedChannels, MontageEngine, UnresolvedPolicy};
pub use reader::{RecordingReader, RecordingReaderFactory, RecordingWriter};
pub use registry::KeyRegistry;
pub use resample::resample;
pub use session::{AppliedMontage, ExportedRecording, SessionConfig, SessionInfo, SessionService};
pub use types::*;
