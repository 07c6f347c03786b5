//! Filesystem artifact store
//!
//! Layout under the store root, per [`ArtifactKind`]:
//!
//! ```text
//! last_execution_request.json    pretty JSON, replaced atomically
//! execution_requests.ndjson      one canonical JSON object per line
//! ...
//! ```
//!
//! Writers to the same kind are serialized by a per-kind lock. A history
//! reader snapshots the file length under the lock, so it sees either all
//! of a concurrently appended line or none of it.

use crate::error::{StoreError, StoreResult};
use crate::history::History;
use parking_lot::RwLock;
use replay_artifact::{canonical_json, ArtifactKind};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Storage seam used by the executor, evaluator and replay runner
pub trait ArtifactStore: Send + Sync {
    /// Atomically replace the last slot of `kind`
    ///
    /// # Errors
    ///
    /// Returns error if the artifact is not an object or the write fails.
    fn write_last(&self, kind: ArtifactKind, artifact: &Value) -> StoreResult<()>;

    /// Append one canonical line to the history of `kind`
    ///
    /// # Errors
    ///
    /// Returns error if the artifact is not an object or the write fails.
    fn append(&self, kind: ArtifactKind, artifact: &Value) -> StoreResult<()>;

    /// Read the last slot, `None` if nothing was written yet
    ///
    /// # Errors
    ///
    /// Returns error if the slot exists but cannot be read or parsed.
    fn read_last(&self, kind: ArtifactKind) -> StoreResult<Option<Value>>;

    /// Lazily read the history of `kind`
    ///
    /// A missing history file yields an empty sequence.
    ///
    /// # Errors
    ///
    /// Returns error if the history file exists but cannot be opened.
    fn read_history(&self, kind: ArtifactKind) -> StoreResult<History>;
}

/// [`ArtifactStore`] backed by a directory
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    locks: [RwLock<()>; 3],
}

impl FsArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io_error(&root, e))?;
        tracing::debug!(root = %root.display(), "artifact store opened");
        Ok(Self {
            root,
            locks: [RwLock::new(()), RwLock::new(()), RwLock::new(())],
        })
    }

    /// Store root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the last-slot file for `kind`
    #[must_use]
    pub fn last_path(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.last_file_name())
    }

    /// Path of the history file for `kind`
    #[must_use]
    pub fn history_path(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.history_file_name())
    }

    fn lock(&self, kind: ArtifactKind) -> &RwLock<()> {
        let slot = match kind {
            ArtifactKind::ExecutionRequest => 0,
            ArtifactKind::ExecutionResult => 1,
            ArtifactKind::EvaluationResult => 2,
        };
        &self.locks[slot]
    }
}

fn ensure_object(kind: ArtifactKind, artifact: &Value) -> StoreResult<()> {
    if artifact.is_object() {
        Ok(())
    } else {
        Err(StoreError::NotAnObject { kind })
    }
}

impl ArtifactStore for FsArtifactStore {
    fn write_last(&self, kind: ArtifactKind, artifact: &Value) -> StoreResult<()> {
        ensure_object(kind, artifact)?;
        let mut content = serde_json::to_string_pretty(artifact)
            .map_err(|source| StoreError::Encode { kind, source })?;
        content.push('\n');

        let path = self.last_path(kind);
        let _guard = self.lock(kind).write();

        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| StoreError::io_error(&self.root, e))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io_error(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io_error(&path, e.error))?;

        tracing::debug!(%kind, path = %path.display(), "last slot replaced");
        Ok(())
    }

    fn append(&self, kind: ArtifactKind, artifact: &Value) -> StoreResult<()> {
        ensure_object(kind, artifact)?;
        let mut line = canonical_json(artifact);
        line.push('\n');

        let path = self.history_path(kind);
        let _guard = self.lock(kind).write();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io_error(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io_error(&path, e))?;

        tracing::debug!(%kind, bytes = line.len(), "history line appended");
        Ok(())
    }

    fn read_last(&self, kind: ArtifactKind) -> StoreResult<Option<Value>> {
        let path = self.last_path(kind);
        let content = {
            let _guard = self.lock(kind).read();
            match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(StoreError::io_error(&path, e)),
            }
        };

        let text = content.strip_prefix('\u{feff}').unwrap_or(&content);
        match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => Ok(Some(value)),
            Ok(_) => Err(StoreError::CorruptLast {
                path,
                message: "top-level value is not an object".to_string(),
            }),
            Err(e) => Err(StoreError::CorruptLast {
                path,
                message: e.to_string(),
            }),
        }
    }

    fn read_history(&self, kind: ArtifactKind) -> StoreResult<History> {
        let path = self.history_path(kind);
        let _guard = self.lock(kind).read();

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(History::empty(kind.as_str())),
            Err(e) => return Err(StoreError::io_error(&path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| StoreError::io_error(&path, e))?
            .len();

        Ok(History::from_reader(
            kind.as_str(),
            BufReader::new(file.take(len)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_paths_follow_kind_names() {
        let dir = std::env::temp_dir();
        let store = FsArtifactStore {
            root: dir.clone(),
            locks: [RwLock::new(()), RwLock::new(()), RwLock::new(())],
        };
        assert_eq!(
            store.last_path(ArtifactKind::ExecutionResult),
            dir.join("last_execution_result.json")
        );
        assert_eq!(
            store.history_path(ArtifactKind::ExecutionRequest),
            dir.join("execution_requests.ndjson")
        );
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(ensure_object(ArtifactKind::ExecutionRequest, &json!({})).is_ok());
        assert!(matches!(
            ensure_object(ArtifactKind::ExecutionRequest, &json!([1])),
            Err(StoreError::NotAnObject { .. })
        ));
    }
}
