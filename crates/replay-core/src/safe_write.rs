//! Allow-listed file writes for agents
//!
//! Agents may only write text files with an allowed extension somewhere
//! below a single directory. Every write is atomic and described by a
//! [`WriteRecord`] the evaluator can re-check later.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Extensions an agent may write
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "md", "json"];

/// Proof of one completed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    /// Written file, allow-list directory joined with the relative path
    pub path: String,
    /// SHA-256 of the content, lowercase hex
    pub sha256: String,
    /// Content length in bytes
    pub bytes: u64,
}

/// Rejected or failed write
#[derive(Debug, thiserror::Error)]
pub enum SafeWriteError {
    /// Path is absolute or rooted
    #[error("unsafe path (absolute): {0}")]
    Absolute(String),

    /// Path leaves the allow-list directory or is empty
    #[error("unsafe path (escapes allow-list dir): {0}")]
    Escapes(String),

    /// Extension not in [`ALLOWED_EXTENSIONS`]
    #[error("disallowed extension '{extension}' for {path} (allowed: txt, md, json)")]
    DisallowedExtension {
        /// Requested path
        path: String,
        /// Offending extension, empty if none
        extension: String,
    },

    /// Filesystem failure
    #[error("write to {path} failed: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Check that `relative` stays inside `allow_dir` with an allowed extension
///
/// # Errors
///
/// Returns the reason the path is refused.
pub fn check_relative_path(allow_dir: &Path, relative: &str) -> Result<PathBuf, SafeWriteError> {
    let rel = Path::new(relative);
    if rel.is_absolute() || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(SafeWriteError::Absolute(relative.to_string()));
    }

    let mut normal = 0usize;
    for component in rel.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SafeWriteError::Escapes(relative.to_string()));
            }
        }
    }
    if normal == 0 {
        return Err(SafeWriteError::Escapes(relative.to_string()));
    }

    if !has_allowed_extension(rel) {
        return Err(SafeWriteError::DisallowedExtension {
            path: relative.to_string(),
            extension: rel
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        });
    }

    Ok(allow_dir.join(rel))
}

/// Check if `path` ends in one of [`ALLOWED_EXTENSIONS`], case-insensitively
#[must_use]
pub fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

/// SHA-256 of `data` as lowercase hex
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Atomically write `content` to `allow_dir/relative`
///
/// # Errors
///
/// Returns error if the path is refused or the write fails.
pub fn safe_write_text(
    allow_dir: &Path,
    relative: &str,
    content: &str,
) -> Result<WriteRecord, SafeWriteError> {
    let target = check_relative_path(allow_dir, relative)?;
    let parent = target.parent().unwrap_or(allow_dir);
    std::fs::create_dir_all(parent).map_err(|source| SafeWriteError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let data = content.as_bytes();
    let io_err = |source| SafeWriteError::Io {
        path: target.clone(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(data).map_err(io_err)?;
    tmp.persist(&target).map_err(|e| io_err(e.error))?;

    tracing::debug!(path = %target.display(), bytes = data.len(), "allow-listed write");
    Ok(WriteRecord {
        path: target.to_string_lossy().into_owned(),
        sha256: sha256_hex(data),
        bytes: data.len() as u64,
    })
}
