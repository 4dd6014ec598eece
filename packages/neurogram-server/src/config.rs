use neurogram_core::{CacheConfig, DetectorConfig, SessionConfig, UnresolvedPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Directory holding the session cache objects
    pub cache_directory: PathBuf,
    /// Key registry log (defaults to keymap.txt in the cache directory)
    pub keymap_path: Option<PathBuf>,
    /// Where annotated exports are written (defaults to next to the source file)
    pub output_directory: Option<PathBuf>,
    /// Directory for uploaded recordings
    pub upload_directory: PathBuf,
    /// Maximum upload file size in bytes (default 500MB)
    pub max_upload_size: u64,
    /// Base directory for server-side files clients can ingest by relative path
    pub server_files_directory: Option<PathBuf>,
    /// How long a first-chunk request waits for ingestion
    pub first_chunk_wait_seconds: f64,
    pub detection_window_size: usize,
    pub detection_step_width: usize,
    pub detection_threshold: f64,
    /// Rate the detection model expects; `none` disables resampling
    pub model_sample_rate: Option<f64>,
    pub montage_policy: UnresolvedPolicy,
    /// CORS allowed origins (comma-separated in env var)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        Self {
            port: 8080,
            bind_addr: "0.0.0.0".to_string(),
            cache_directory: PathBuf::from("/tmp/neurogram"),
            keymap_path: None,
            output_directory: None,
            upload_directory: PathBuf::from("/tmp/neurogram-uploads"),
            max_upload_size: 524_288_000,
            server_files_directory: None,
            first_chunk_wait_seconds: 10.0,
            detection_window_size: detector.window_size,
            detection_step_width: detector.step_width,
            detection_threshold: detector.threshold,
            model_sample_rate: Some(500.0),
            montage_policy: UnresolvedPolicy::Skip,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            port: env::var("NEUROGRAM_PORT")
                .map(|v| v.parse().map_err(|_| ConfigError::InvalidPort))
                .unwrap_or(Ok(defaults.port))?,
            bind_addr: env::var("NEUROGRAM_BIND_ADDR").unwrap_or(defaults.bind_addr),
            cache_directory: env::var("CACHE_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_directory),
            keymap_path: env::var("KEYMAP_PATH").ok().map(PathBuf::from),
            output_directory: env::var("OUTPUT_DIRECTORY").ok().map(PathBuf::from),
            upload_directory: env::var("UPLOAD_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_directory),
            max_upload_size: parse_var("MAX_UPLOAD_SIZE", defaults.max_upload_size)?,
            server_files_directory: env::var("SERVER_FILES_DIRECTORY").ok().map(PathBuf::from),
            first_chunk_wait_seconds: parse_var(
                "FIRST_CHUNK_WAIT_SECONDS",
                defaults.first_chunk_wait_seconds,
            )?,
            detection_window_size: parse_var("DETECTION_WINDOW_SIZE", defaults.detection_window_size)?,
            detection_step_width: parse_var("DETECTION_STEP_WIDTH", defaults.detection_step_width)?,
            detection_threshold: parse_var("DETECTION_THRESHOLD", defaults.detection_threshold)?,
            model_sample_rate: match env::var("MODEL_SAMPLE_RATE") {
                Ok(v) => parse_optional_rate(&v)?,
                Err(_) => defaults.model_sample_rate,
            },
            montage_policy: parse_var("MONTAGE_POLICY", defaults.montage_policy)?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_window_size == 0 || self.detection_step_width == 0 {
            return Err(ConfigError::InvalidValue(
                "DETECTION_WINDOW_SIZE and DETECTION_STEP_WIDTH must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::InvalidValue(
                "DETECTION_THRESHOLD must be within [0, 1]".to_string(),
            ));
        }
        if !(self.first_chunk_wait_seconds >= 0.0) || !self.first_chunk_wait_seconds.is_finite() {
            return Err(ConfigError::InvalidValue(
                "FIRST_CHUNK_WAIT_SECONDS must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Core session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            cache: CacheConfig {
                directory: self.cache_directory.clone(),
                ..CacheConfig::default()
            },
            keymap_path: self.keymap_path.clone(),
            output_directory: self.output_directory.clone(),
            first_chunk_wait: Duration::from_secs_f64(self.first_chunk_wait_seconds),
            montage_policy: self.montage_policy,
            detector: DetectorConfig {
                window_size: self.detection_window_size,
                step_width: self.detection_step_width,
                threshold: self.detection_threshold,
                ..DetectorConfig::default()
            },
            target_sample_rate: self.model_sample_rate,
            standard_channels_only: true,
            ..SessionConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}='{}'", name, value))),
        Err(_) => Ok(default),
    }
}

fn parse_optional_rate(value: &str) -> Result<Option<f64>, ConfigError> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    match value.parse::<f64>() {
        Ok(rate) if rate > 0.0 => Ok(Some(rate)),
        _ => Err(ConfigError::InvalidValue(format!(
            "MODEL_SAMPLE_RATE='{}'",
            value
        ))),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detector_defaults() {
        let config = ServerConfig::default();
        let session = config.session_config();

        assert_eq!(session.detector.window_size, 250);
        assert_eq!(session.detector.step_width, 200);
        assert_eq!(session.target_sample_rate, Some(500.0));
        assert_eq!(session.first_chunk_wait, Duration::from_secs(10));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_optional_rate() {
        assert_eq!(parse_optional_rate("none").unwrap(), None);
        assert_eq!(parse_optional_rate(" 256 ").unwrap(), Some(256.0));
        assert!(parse_optional_rate("-3").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = ServerConfig {
            detection_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
