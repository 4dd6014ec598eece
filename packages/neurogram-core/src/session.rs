//! Session-level operations composing the cache, montage engine, detector and
//! key registry.

use crate::cache::{CacheConfig, Chunk, DerivedObject, RawObject, TimeSeriesCache};
use crate::channels::select_standard_channels;
use crate::detector::{
    DetectionProgress, DetectorConfig, Oracle, ProgressReporter, WindowedEventDetector,
};
use crate::error::{CoreError, Result};
use crate::montage::{MontageEngine, UnresolvedPolicy};
use crate::reader::{RecordingReader, RecordingReaderFactory, RecordingWriter, RecordingWriterFactory};
use crate::registry::KeyRegistry;
use crate::resample::resample;
use crate::types::{Annotation, Event, Matrix, MontageSpec, Recording};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const ANNOTATED_SUFFIX: &str = "_ng-annotated";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cache: CacheConfig,
    /// Registry log; `keymap.txt` inside the cache directory when unset
    pub keymap_path: Option<PathBuf>,
    /// Where annotated exports go; next to the source file when unset
    pub output_directory: Option<PathBuf>,
    /// How long a request for the first chunk waits for ingestion
    pub first_chunk_wait: Duration,
    pub montage_policy: UnresolvedPolicy,
    pub detector: DetectorConfig,
    /// Resample to this rate before detection
    pub target_sample_rate: Option<f64>,
    /// Feed only the standard 10-20 electrodes to the oracle
    pub standard_channels_only: bool,
    /// Description of exported event annotations
    pub annotation_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            keymap_path: None,
            output_directory: None,
            first_chunk_wait: Duration::from_secs(10),
            montage_policy: UnresolvedPolicy::default(),
            detector: DetectorConfig::default(),
            target_sample_rate: None,
            standard_channels_only: false,
            annotation_label: "epilepsy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Labels of the effective channels
    pub labels: Vec<String>,
    pub raw_labels: Vec<String>,
    pub sample_rate: f64,
    pub num_samples: usize,
    pub duration: f64,
    pub montage: Option<MontageSpec>,
    pub source_path: Option<String>,
    pub annotations: Vec<Annotation>,
    pub stored_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn montage_active(&self) -> bool {
        self.montage.is_some()
    }
}

/// Result of storing a montage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedMontage {
    pub labels: Vec<String>,
    /// Entries dropped under the skip policy
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRecording {
    pub path: PathBuf,
    pub file_key: String,
}

pub struct SessionService {
    config: SessionConfig,
    cache: TimeSeriesCache,
    registry: KeyRegistry,
    montage: MontageEngine,
    detector: WindowedEventDetector,
    reader: Arc<dyn RecordingReader>,
    writer: Arc<dyn RecordingWriter>,
    /// Per-session guard: writers replace raw and derived together, readers
    /// take a consistent snapshot of both
    session_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl SessionService {
    /// Service reading any supported format and exporting EDF+
    pub fn new(config: SessionConfig) -> Result<Self> {
        let writer = RecordingWriterFactory::create_writer("edf")?;
        Self::with_io(config, Arc::new(RecordingReaderFactory), Arc::from(writer))
    }

    pub fn with_io(
        config: SessionConfig,
        reader: Arc<dyn RecordingReader>,
        writer: Arc<dyn RecordingWriter>,
    ) -> Result<Self> {
        let cache = TimeSeriesCache::open(config.cache.clone())?;
        let keymap_path = config
            .keymap_path
            .clone()
            .unwrap_or_else(|| config.cache.directory.join("keymap.txt"));

        Ok(Self {
            registry: KeyRegistry::new(keymap_path),
            montage: MontageEngine::new(config.montage_policy),
            detector: WindowedEventDetector::new(config.detector.clone()),
            cache,
            reader,
            writer,
            session_locks: Mutex::new(HashMap::new()),
            config,
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<RwLock<()>> {
        Arc::clone(
            self.session_locks
                .lock()
                .entry(session_id.to_string())
                .or_default(),
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &TimeSeriesCache {
        &self.cache
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Read `path` and make it the session's raw recording.
    ///
    /// A montage already stored for the session is re-applied to the new data
    /// so the derived view never refers to a previous recording. Raw and
    /// derived are replaced under the session's write lock.
    pub fn ingest(&self, session_id: &str, path: &Path) -> Result<SessionInfo> {
        log::info!("Ingesting {} for session {}", path.display(), session_id);
        let recording = self.reader.read(path)?;

        let lock = self.session_lock(session_id);
        let _guard = lock.write();

        let derived = match self.cache.montage(session_id)? {
            Some(spec) => Some(self.derive(&spec, &recording.data, &recording.labels)?),
            None => None,
        };

        self.cache.store_raw(
            session_id,
            RawObject {
                data: recording.data,
                labels: recording.labels,
                sample_rate: recording.sample_rate,
                source_path: Some(path.display().to_string()),
                annotations: recording.annotations,
                stored_at: Utc::now(),
            },
        )?;

        if let Some((derived, _)) = derived {
            log::info!("Re-applied stored montage for session {}", session_id);
            self.cache.store_derived(session_id, derived)?;
        }

        self.info_snapshot(session_id)
    }

    /// Re-reference the session's raw channels and store the result
    pub fn set_montage(&self, session_id: &str, spec: MontageSpec) -> Result<AppliedMontage> {
        let lock = self.session_lock(session_id);
        let _guard = lock.write();

        let raw = self.cache.fetch_raw(session_id)?;
        let (derived, unresolved) = self.derive(&spec, &raw.data, &raw.labels)?;

        if !unresolved.is_empty() {
            log::warn!(
                "Session {}: montage entries not resolved: {}",
                session_id,
                unresolved.join(", ")
            );
        }

        let labels = derived.labels.clone();
        self.cache.store_derived(session_id, derived)?;
        Ok(AppliedMontage { labels, unresolved })
    }

    fn derive(
        &self,
        spec: &MontageSpec,
        data: &[Vec<f64>],
        labels: &[String],
    ) -> Result<(DerivedObject, Vec<String>)> {
        let derived = self.montage.apply(spec, data, labels)?;
        Ok((
            DerivedObject {
                data: derived.data,
                labels: derived.labels,
                montage: Some(spec.clone()),
                stored_at: Utc::now(),
            },
            derived.unresolved,
        ))
    }

    /// Samples `[start, end)` of the effective channels.
    ///
    /// The first chunk of a session may be requested while ingestion is still
    /// running, so `start == 0` waits up to `first_chunk_wait` for it.
    pub fn get_chunk(&self, session_id: &str, start: i64, end: i64) -> Result<Chunk> {
        if start == 0 {
            self.cache
                .await_raw(session_id, self.config.first_chunk_wait)?;
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.read();
        self.cache.chunk(session_id, start, end)
    }

    /// The `n`-th of `total` equal chunks
    pub fn get_chunk_ordinal(&self, session_id: &str, n: usize, total: usize) -> Result<Chunk> {
        if n == 0 {
            self.cache
                .await_raw(session_id, self.config.first_chunk_wait)?;
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.read();
        self.cache.chunk_ordinal(session_id, n, total)
    }

    pub fn get_sample_rate(&self, session_id: &str) -> Result<f64> {
        self.cache.sample_rate(session_id)
    }

    pub fn get_sample_count(&self, session_id: &str) -> Result<usize> {
        let lock = self.session_lock(session_id);
        let _guard = lock.read();
        self.cache.sample_count(session_id)
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let lock = self.session_lock(session_id);
        let _guard = lock.read();
        self.info_snapshot(session_id)
    }

    /// Caller holds the session lock
    fn info_snapshot(&self, session_id: &str) -> Result<SessionInfo> {
        let raw = self.cache.fetch_raw(session_id)?;
        let effective = self.cache.fetch_effective(session_id)?;
        let montage = self.cache.montage(session_id)?;
        let num_samples = effective.num_samples();

        Ok(SessionInfo {
            session_id: session_id.to_string(),
            labels: effective.labels().to_vec(),
            raw_labels: raw.labels.clone(),
            sample_rate: raw.sample_rate,
            num_samples,
            duration: num_samples as f64 / raw.sample_rate,
            montage,
            source_path: raw.source_path.clone(),
            annotations: raw.annotations.clone(),
            stored_at: raw.stored_at,
        })
    }

    pub fn run_detection<O: Oracle + ?Sized>(&self, session_id: &str, oracle: &O) -> Result<Vec<Event>> {
        self.run_detection_with_progress(session_id, oracle, None)
    }

    /// Score the effective matrix and return merged events, reporting
    /// progress on `progress` when given.
    ///
    /// Event times are in seconds of the recording regardless of resampling.
    pub fn run_detection_with_progress<O: Oracle + ?Sized>(
        &self,
        session_id: &str,
        oracle: &O,
        progress: Option<broadcast::Sender<DetectionProgress>>,
    ) -> Result<Vec<Event>> {
        let (effective, sample_rate) = {
            let lock = self.session_lock(session_id);
            let _guard = lock.read();
            (
                self.cache.fetch_effective(session_id)?,
                self.cache.sample_rate(session_id)?,
            )
        };

        let selected: Option<Matrix> = if self.config.standard_channels_only {
            let indices = select_standard_channels(effective.labels());
            if indices.is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "session {} has no standard 10-20 channels",
                    session_id
                )));
            }
            Some(indices.iter().map(|&i| effective.data()[i].clone()).collect())
        } else {
            None
        };
        let input: &[Vec<f64>] = selected.as_deref().unwrap_or(effective.data());

        let (resampled, rate) = match self.config.target_sample_rate {
            Some(target) if target != sample_rate => (Some(resample(input, sample_rate, target)?), target),
            _ => (None, sample_rate),
        };
        let input = resampled.as_deref().unwrap_or(input);

        log::info!(
            "Running detection for session {} on {} channels at {} Hz",
            session_id,
            input.len(),
            rate
        );

        let reporter = progress.map(|sender| ProgressReporter::new(session_id, sender));
        self.detector
            .detect_with_progress(input, rate, oracle, reporter.as_ref())
    }

    /// Write the session's recording with `events` added as annotations and
    /// register the result under a download key.
    pub fn export_annotated(&self, session_id: &str, events: &[Event]) -> Result<ExportedRecording> {
        let raw = self.cache.fetch_raw(session_id)?;
        let source = raw.source_path.as_deref().map(Path::new);

        let stem = source
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| session_id.to_string());
        let directory = self
            .config
            .output_directory
            .clone()
            .or_else(|| source.and_then(|p| p.parent()).map(Path::to_path_buf))
            .unwrap_or_else(|| self.cache.directory().to_path_buf());
        std::fs::create_dir_all(&directory)?;

        let path = directory.join(format!(
            "{}{}.{}",
            stem,
            ANNOTATED_SUFFIX,
            self.writer.default_extension()
        ));

        let mut annotations = raw.annotations.clone();
        annotations.extend(events.iter().map(|event| Annotation {
            onset: event.onset,
            duration: event.duration,
            description: self.config.annotation_label.clone(),
        }));

        let recording = Recording {
            data: raw.data.clone(),
            labels: raw.labels.clone(),
            sample_rate: raw.sample_rate,
            annotations,
        };
        self.writer.write(&path, &recording)?;

        let file_key = self.registry.generate_key(&path)?;
        log::info!(
            "Exported {} events for session {} to {} (key {})",
            events.len(),
            session_id,
            path.display(),
            file_key
        );
        Ok(ExportedRecording { path, file_key })
    }

    pub fn generate_key(&self, path: &Path) -> Result<String> {
        self.registry.generate_key(path)
    }

    pub fn resolve(&self, token: &str) -> Result<PathBuf> {
        self.registry.resolve(token)
    }
}
