use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No cached recording for session: {0}")]
    NotFound(String),

    #[error("Timed out after {seconds}s waiting for session {session_id} to be cached")]
    Timeout { session_id: String, seconds: f64 },

    #[error("Invalid sample range [{start}, {end}) for {available} available samples")]
    Range { start: i64, end: i64, available: usize },

    #[error("Unknown file key: {0}")]
    KeyNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt recording file: {0}")]
    CorruptFile(String),

    #[error("Montage entries could not be resolved: {}", .0.join(", "))]
    UnresolvedChannels(Vec<String>),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt cache object {path}: {reason}")]
    CorruptCache { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode cache object: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
