//! Built-in deterministic agent
//!
//! Supports one action, `write_public_note`: write `task_snapshot.content`
//! to an allow-listed file. The output depends only on the invocation and
//! the configured directory, so replays reproduce it exactly.

use crate::agent::{Agent, AgentInvocation};
use crate::config::DEFAULT_AGENT_ROLE;
use crate::error::AgentError;
use crate::safe_write::{safe_write_text, WriteRecord};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Action run when the snapshot names none
pub const DEFAULT_ACTION: &str = "write_public_note";

/// Writes notes under an allow-listed directory
#[derive(Debug, Clone)]
pub struct NoteAgent {
    role: String,
    generated_dir: PathBuf,
}

impl NoteAgent {
    /// Agent for the default `engineer` role
    #[must_use]
    pub fn new(generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: DEFAULT_AGENT_ROLE.to_string(),
            generated_dir: generated_dir.into(),
        }
    }

    /// With a different role
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// `<task_id>-<short request hash>.md`
    #[must_use]
    pub fn fallback_file_name(invocation: &AgentInvocation) -> String {
        format!(
            "{}-{}.md",
            invocation.task_id,
            invocation.request_hash.short()
        )
    }

    fn write_public_note(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        let content = invocation.snapshot_str("content").ok_or_else(|| {
            AgentError::Failed(
                "task_snapshot.content must be a non-empty string for action=write_public_note"
                    .to_string(),
            )
        })?;
        let file_name = invocation
            .snapshot_str("filename")
            .map_or_else(|| Self::fallback_file_name(invocation), str::to_string);

        let record = safe_write_text(&self.generated_dir, &file_name, content)
            .map_err(|e| AgentError::Failed(e.to_string()))?;
        Ok(note_output(&record))
    }
}

fn note_output(record: &WriteRecord) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("action".into(), json!(DEFAULT_ACTION));
    out.insert("note_path".into(), json!(record.path));
    out.insert("note_sha256".into(), json!(record.sha256));
    out.insert("note_bytes".into(), json!(record.bytes));
    out.insert("writes".into(), json!([record]));
    out
}

#[async_trait]
impl Agent for NoteAgent {
    fn role(&self) -> &str {
        &self.role
    }

    async fn execute(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        let action = invocation.snapshot_str("action").unwrap_or(DEFAULT_ACTION);
        tracing::debug!(task_id = %invocation.task_id, %action, "note agent invoked");
        match action {
            DEFAULT_ACTION => self.write_public_note(invocation),
            other => Err(AgentError::Failed(format!("unsupported action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_artifact::CanonicalHash;

    fn invocation(snapshot: Value) -> AgentInvocation {
        AgentInvocation {
            task_id: "T-1".into(),
            request_hash: CanonicalHash::compute(b"request"),
            agent_sequence: vec!["engineer".into()],
            task_snapshot: snapshot.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn writes_named_note() {
        let dir = tempfile::tempdir().unwrap();
        let agent = NoteAgent::new(dir.path());
        let out = agent
            .execute(&invocation(json!({"content": "hi", "filename": "hello.md"})))
            .await
            .unwrap();

        assert_eq!(out["action"], json!("write_public_note"));
        assert_eq!(out["note_bytes"], json!(2));
        assert_eq!(out["writes"].as_array().unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.md")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn falls_back_to_deterministic_name() {
        let dir = tempfile::tempdir().unwrap();
        let agent = NoteAgent::new(dir.path());
        let inv = invocation(json!({"content": "hi"}));
        agent.execute(&inv).await.unwrap();

        let expected = format!("T-1-{}.md", inv.request_hash.short());
        assert_eq!(NoteAgent::fallback_file_name(&inv), expected);
        assert!(dir.path().join(expected).exists());
    }

    #[tokio::test]
    async fn missing_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = NoteAgent::new(dir.path())
            .execute(&invocation(json!({"desc": "noop"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content"), "{err}");
    }

    #[tokio::test]
    async fn unsupported_action_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = NoteAgent::new(dir.path())
            .execute(&invocation(json!({"action": "delete_all", "content": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Failed("unsupported action: delete_all".into()));
    }

    #[tokio::test]
    async fn unsafe_filename_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = NoteAgent::new(dir.path().join("generated"))
            .execute(&invocation(json!({"content": "x", "filename": "../out.md"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Failed(_)));
        assert!(!dir.path().join("out.md").exists());
    }
}
