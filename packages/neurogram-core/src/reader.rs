//! Recording reader and writer collaborators.
//!
//! New formats are added by implementing `RecordingReader` (and optionally
//! `RecordingWriter`) and registering the extension in the factories.

use crate::edf::{read_edf, write_edf};
use crate::error::{CoreError, Result};
use crate::types::Recording;
use std::path::Path;

/// Produces a channel-major matrix, labels and sample rate from a file
pub trait RecordingReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Recording>;

    /// Format name (e.g. "EDF")
    fn format_name(&self) -> &str;
}

/// Writes a recording (including its annotations) to a file
pub trait RecordingWriter: Send + Sync {
    fn write(&self, path: &Path, recording: &Recording) -> Result<()>;

    fn format_name(&self) -> &str;

    fn default_extension(&self) -> &str;
}

pub struct EdfRecordingReader;

impl RecordingReader for EdfRecordingReader {
    fn read(&self, path: &Path) -> Result<Recording> {
        read_edf(path)
    }

    fn format_name(&self) -> &str {
        "EDF"
    }
}

pub struct EdfRecordingWriter;

impl RecordingWriter for EdfRecordingWriter {
    fn write(&self, path: &Path, recording: &Recording) -> Result<()> {
        write_edf(path, recording)
    }

    fn format_name(&self) -> &str {
        "EDF"
    }

    fn default_extension(&self) -> &str {
        "edf"
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Picks a reader by file extension. Also usable directly as a reader that
/// dispatches on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingReaderFactory;

impl RecordingReaderFactory {
    pub fn create_reader(path: &Path) -> Result<Box<dyn RecordingReader>> {
        match extension_of(path).as_str() {
            "edf" => Ok(Box::new(EdfRecordingReader)),
            other => Err(CoreError::UnsupportedFormat(format!(
                "Unsupported file extension: '{}'",
                other
            ))),
        }
    }

    pub fn supported_extensions() -> Vec<&'static str> {
        vec!["edf"]
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::supported_extensions().contains(&extension_of(path).as_str())
    }
}

impl RecordingReader for RecordingReaderFactory {
    fn read(&self, path: &Path) -> Result<Recording> {
        Self::create_reader(path)?.read(path)
    }

    fn format_name(&self) -> &str {
        "auto"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingWriterFactory;

impl RecordingWriterFactory {
    pub fn create_writer(extension: &str) -> Result<Box<dyn RecordingWriter>> {
        match extension.to_lowercase().as_str() {
            "edf" => Ok(Box::new(EdfRecordingWriter)),
            other => Err(CoreError::UnsupportedFormat(format!(
                "Cannot write '{}' files",
                other
            ))),
        }
    }
}
