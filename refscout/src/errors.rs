//! Error types for refscout.
//!
//! Only configuration problems are fatal to a run. Everything else that can go wrong while
//! indexing (unreadable files, bad exclusion patterns, a missing external search tool, a file
//! that takes too long to scan) is represented here so that callers can log it and move on:
//!
//! ```rust,ignore
//! match processor.search_file(&target, &candidate, &matcher) {
//!     Ok(matches) => all.extend(matches),
//!     Err(SearchError::Timeout { path, .. }) => warn!("gave up on {}", path.display()),
//!     Err(e) => debug!("skipping candidate: {}", e),
//! }
//! ```
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result type for indexing operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while scanning, matching or persisting state
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("External search tool error: {0}")]
    ExternalTool(String),
    #[error("Timed out after {limit:?} while processing {path}")]
    Timeout { path: PathBuf, limit: Duration },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Canonicalize the path and strip UNC prefixes so that
/// comparisons on Windows are consistent.
pub fn unify_path(original: &Path) -> PathBuf {
    let canonical = original
        .canonicalize()
        .unwrap_or_else(|_| original.to_path_buf());
    strip_unc_prefix(&canonical)
}

/// Strips the Windows UNC prefix (\\?\) from a path if present
fn strip_unc_prefix(p: &Path) -> PathBuf {
    let s = p.display().to_string();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        p.to_path_buf()
    }
}

impl SearchError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::CacheError(msg.into())
    }

    pub fn checkpoint_error(msg: impl Into<String>) -> Self {
        Self::CheckpointError(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn external_tool(msg: impl Into<String>) -> Self {
        Self::ExternalTool(msg.into())
    }

    pub fn timeout(path: impl Into<PathBuf>, limit: Duration) -> Self {
        Self::Timeout {
            path: path.into(),
            limit,
        }
    }

    /// Maps an I/O error on `path` to the most specific variant
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }

    /// Whether this error must abort a run before any scanning starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let path = Path::new("test.txt");
        let err = SearchError::file_not_found(path);
        assert!(matches!(err, SearchError::FileNotFound(_)));

        let err = SearchError::permission_denied(path);
        assert!(matches!(err, SearchError::PermissionDenied(_)));

        let err = SearchError::invalid_pattern("Invalid regex");
        assert!(matches!(err, SearchError::InvalidPattern(_)));

        let err = SearchError::cache_error("Cache corrupted");
        assert!(matches!(err, SearchError::CacheError(_)));

        let err = SearchError::timeout(path, Duration::from_secs(1));
        assert!(matches!(err, SearchError::Timeout { .. }));
    }

    #[test]
    fn test_error_messages() {
        let err = SearchError::invalid_pattern("Invalid regex: missing closing brace".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid pattern: Invalid regex: missing closing brace"
        );

        let err = SearchError::config_error("No scan directories specified");
        assert_eq!(
            err.to_string(),
            "Configuration error: No scan directories specified"
        );

        let err = SearchError::file_not_found("test.txt");
        assert_eq!(err.to_string(), "File not found: test.txt");

        let err = SearchError::external_tool("rg not found");
        assert_eq!(err.to_string(), "External search tool error: rg not found");
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let path = Path::new("gone.txt");
        let err = SearchError::from_io(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SearchError::FileNotFound(_)));

        let err = SearchError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SearchError::PermissionDenied(_)));

        let err = SearchError::from_io(path, io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, SearchError::IoError(_)));
    }

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(SearchError::config_error("missing patterns").is_fatal());
        assert!(!SearchError::cache_error("disk full").is_fatal());
        assert!(!SearchError::timeout("a.txt", Duration::from_secs(1)).is_fatal());
    }
}
