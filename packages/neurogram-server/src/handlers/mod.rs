pub mod detection;
pub mod health;
pub mod keys;
pub mod sessions;

pub use detection::*;
pub use health::*;
pub use keys::*;
pub use sessions::*;

use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::error::{ApiError, ApiResult};

/// Run blocking core work on the blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> neurogram_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

/// Resolve a client-supplied relative path inside `base`.
///
/// Absolute paths and `..` components are rejected before touching the
/// filesystem; the canonical result must still live under the canonical base.
pub(crate) fn resolve_within(base: &Path, requested: &str) -> ApiResult<PathBuf> {
    let requested_path = PathBuf::from(requested);
    if requested_path.is_absolute() {
        warn!("Rejected absolute path: {}", requested);
        return Err(ApiError::BadRequest(
            "Absolute paths are not allowed".to_string(),
        ));
    }

    if requested.contains("..") {
        warn!("Rejected path traversal attempt: {}", requested);
        return Err(ApiError::BadRequest(
            "Path traversal sequences are not allowed".to_string(),
        ));
    }

    let canonical_base = base.canonicalize().map_err(|e| {
        error!("Server files directory invalid: {}", e);
        ApiError::Internal("Server configuration error".to_string())
    })?;

    let canonical_path = base.join(&requested_path).canonicalize().map_err(|_| {
        neurogram_core::CoreError::InvalidInput(format!("File not found: {}", requested))
    })?;

    if !canonical_path.starts_with(&canonical_base) {
        warn!(
            "Path traversal attempt: {} outside of {}",
            canonical_path.display(),
            canonical_base.display()
        );
        return Err(ApiError::Forbidden("Access denied".to_string()));
    }

    if !canonical_path.is_file() {
        return Err(neurogram_core::CoreError::InvalidInput(format!(
            "Not a file: {}",
            requested
        ))
        .into());
    }

    Ok(canonical_path)
}

/// True when `path` canonicalizes to somewhere under one of `roots`
pub(crate) fn is_within_any(path: &Path, roots: &[&Path]) -> bool {
    let Ok(canonical) = path.canonicalize() else {
        return false;
    };
    roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .any(|root| canonical.starts_with(root))
}

/// Sanitize filename for safe storage
pub(crate) fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .take(100)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("night 01 (a).edf"), "night01a.edf");
    }

    #[test]
    fn test_resolve_within_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rec.edf"), b"0").unwrap();

        assert!(resolve_within(dir.path(), "rec.edf").is_ok());
        assert!(matches!(
            resolve_within(dir.path(), "/etc/passwd"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            resolve_within(dir.path(), "../rec.edf"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            resolve_within(dir.path(), "missing.edf"),
            Err(ApiError::Core(neurogram_core::CoreError::InvalidInput(_)))
        ));
    }

    #[test]
    fn test_is_within_any() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.edf");
        std::fs::write(&file, b"0").unwrap();
        let other = TempDir::new().unwrap();

        assert!(is_within_any(&file, &[other.path(), dir.path()]));
        assert!(!is_within_any(&file, &[other.path()]));
        assert!(!is_within_any(&dir.path().join("nope"), &[dir.path()]));
    }
}
