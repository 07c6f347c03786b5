//! Error types for the artifact store

use replay_artifact::ArtifactKind;
use std::path::PathBuf;

/// Errors during store operations
///
/// Malformed history lines are never reported here; they are counted by
/// [`crate::History`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error on a store file
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be encoded
    #[error("failed to encode {kind} artifact: {source}")]
    Encode {
        /// Kind being written
        kind: ArtifactKind,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Last-slot file exists but does not hold a JSON object
    #[error("last-slot file {path} is not a JSON object: {message}")]
    CorruptLast {
        /// Offending file
        path: PathBuf,
        /// Parse failure
        message: String,
    },

    /// Only JSON objects are stored
    #[error("{kind} artifact must be a JSON object")]
    NotAnObject {
        /// Kind being written
        kind: ArtifactKind,
    },
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_an_object_display() {
        let err = StoreError::NotAnObject {
            kind: ArtifactKind::ExecutionRequest,
        };
        assert_eq!(
            err.to_string(),
            "execution_request artifact must be a JSON object"
        );
    }

    #[test]
    fn io_error_mentions_path() {
        let err = StoreError::io_error(
            "/tmp/x.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/x.json"));
    }
}
