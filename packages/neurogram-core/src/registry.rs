//! Append-only log mapping opaque download tokens to file paths.

use crate::error::{CoreError, Result};
use fs2::FileExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

pub const TOKEN_LENGTH: usize = 16;

/// Token registry backed by a `token:path` line log.
///
/// Every append and read holds an advisory file lock, so several processes
/// can share one log.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    log_path: PathBuf,
}

impl KeyRegistry {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Register `path` under a fresh random token.
    ///
    /// Tokens are not checked for collisions.
    pub fn generate_key(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            CoreError::InvalidInput(format!("path is not valid UTF-8: {}", path.display()))
        })?;
        if path_str.contains('\n') || path_str.contains('\r') {
            return Err(CoreError::InvalidInput(
                "path must not contain line breaks".to_string(),
            ));
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.lock_exclusive()?;
        let written = file
            .write_all(format!("{}:{}\n", token, path_str).as_bytes())
            .and_then(|_| file.sync_data());
        file.unlock()?;
        written?;

        log::info!("Registered key {} for {}", token, path.display());
        Ok(token)
    }

    /// Path registered under `token`. The most recent record wins.
    pub fn resolve(&self, token: &str) -> Result<PathBuf> {
        let mut file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CoreError::KeyNotFound(token.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.lock_shared()?;
        let read = file.read_to_string(&mut contents);
        file.unlock()?;
        read?;

        contents
            .lines()
            .filter_map(|line| line.split_once(':'))
            .filter(|(key, _)| *key == token)
            .last()
            .map(|(_, path)| PathBuf::from(path.trim_end()))
            .ok_or_else(|| CoreError::KeyNotFound(token.to_string()))
    }
}
