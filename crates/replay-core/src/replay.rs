//! Offline replay of stored requests
//!
//! A replay reads only on-disk history and calls the registered agents. The
//! replayed request is not appended to request history again; its result
//! and evaluation are stored like any other, carrying a `_replay` marker.

use crate::error::ReplayError;
use crate::evaluator::Evaluator;
use crate::executor::{Executor, SubmissionOrigin};
use replay_artifact::{ArtifactKind, CanonicalHash, Canonicalizer, EvaluationStatus};
use replay_store::{ArtifactStore, HistoryEntry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Which stored request to replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "value")]
pub enum ReplaySelector {
    /// Most recent request with this `task_id`
    TaskId(String),
    /// Most recent request with this canonical hash
    RequestHash(CanonicalHash),
    /// 0-based position among parsed history records
    Index(usize),
    /// Most recent request
    Latest,
}

impl Display for ReplaySelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskId(id) => write!(f, "task_id={id}"),
            Self::RequestHash(hash) => write!(f, "request_hash={hash}"),
            Self::Index(i) => write!(f, "index={i}"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// Outcome of one replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Canonical hash of the replayed request
    pub selected_request_hash: CanonicalHash,
    /// Hash of the earliest stored result for that request, if any
    pub original_hash: Option<CanonicalHash>,
    /// Hash of the result produced by the replay
    pub replay_hash: CanonicalHash,
    /// `original_hash == Some(replay_hash)`
    pub matched: bool,
    /// Status of the replay's evaluation
    pub evaluation_status: EvaluationStatus,
    /// Unparseable lines seen in request and result history
    pub skipped_history_lines: usize,
}

/// Re-runs stored requests and compares result hashes
pub struct ReplayRunner {
    executor: Arc<Executor>,
    evaluator: Arc<Evaluator>,
    store: Arc<dyn ArtifactStore>,
}

impl ReplayRunner {
    /// Create runner sharing the pipeline's executor and evaluator
    #[must_use]
    pub fn new(
        executor: Arc<Executor>,
        evaluator: Arc<Evaluator>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            executor,
            evaluator,
            store,
        }
    }

    fn canonicalizer(&self) -> &Canonicalizer {
        self.executor.canonicalizer()
    }

    /// Pick a request from history without running it
    ///
    /// Returns the stored request and the number of skipped lines.
    ///
    /// # Errors
    ///
    /// Returns error if history cannot be read or nothing matches.
    pub fn select(&self, selector: &ReplaySelector) -> Result<(Value, usize), ReplayError> {
        let snapshot = self
            .store
            .read_history(ArtifactKind::ExecutionRequest)?
            .read_all();
        let skipped = snapshot.skipped;
        let entries = snapshot.entries;

        let entry = match selector {
            ReplaySelector::Latest => entries.into_iter().last().ok_or(ReplayError::EmptyHistory)?,
            ReplaySelector::Index(index) => {
                let len = entries.len();
                if len == 0 {
                    return Err(ReplayError::EmptyHistory);
                }
                entries
                    .into_iter()
                    .nth(*index)
                    .ok_or(ReplayError::IndexOutOfRange { index: *index, len })?
            }
            ReplaySelector::TaskId(task_id) => {
                most_recent(entries, |a| a.get("task_id").and_then(Value::as_str) == Some(task_id))
                    .ok_or_else(|| not_found(selector))?
            }
            ReplaySelector::RequestHash(hash) => {
                most_recent(entries, |a| self.canonicalizer().hash(a) == *hash)
                    .ok_or_else(|| not_found(selector))?
            }
        };

        tracing::debug!(%selector, line = entry.line, "request selected for replay");
        Ok((entry.artifact, skipped))
    }

    /// Hash of the earliest stored result bound to `request_hash`
    ///
    /// # Errors
    ///
    /// Returns error if result history cannot be read.
    pub fn original_result_hash(
        &self,
        request_hash: CanonicalHash,
    ) -> Result<(Option<CanonicalHash>, usize), ReplayError> {
        let mut history = self.store.read_history(ArtifactKind::ExecutionResult)?;
        let wanted = request_hash.to_hex();
        let found = history
            .by_ref()
            .find(|e| e.artifact.get("request_hash").and_then(Value::as_str) == Some(wanted.as_str()))
            .map(|e| self.canonicalizer().hash(&e.artifact));
        // drain so malformed lines after the match are counted too
        history.by_ref().for_each(drop);
        Ok((found, history.skipped()))
    }

    /// Replay the selected request and compare result hashes
    ///
    /// # Errors
    ///
    /// Returns error if nothing matches, the executor is busy, or the
    /// store fails.
    pub async fn replay(&self, selector: &ReplaySelector) -> Result<ReplayReport, ReplayError> {
        let (request, request_skipped) = self.select(selector)?;
        let selected_request_hash = self.canonicalizer().hash(&request);
        let (original_hash, result_skipped) = self.original_result_hash(selected_request_hash)?;
        let skipped_history_lines = request_skipped + result_skipped;

        tracing::info!(
            %selector,
            request_hash = %selected_request_hash.short(),
            has_original = original_hash.is_some(),
            "replay started"
        );

        let marker = |matched: bool| {
            json!({
                "selected_request_hash": selected_request_hash,
                "skipped_history_lines": skipped_history_lines,
                "selector": selector.to_string(),
                "matched": matched,
            })
        };
        // both artifacts are written with `_replay` before the executor
        // returns to Idle, so a later submission always owns the last slots
        let (outcome, evaluation) = self
            .executor
            .submit_then(
                &request,
                SubmissionOrigin::Replay,
                |result_hash, fields| {
                    fields.insert("_replay".to_string(), marker(original_hash == Some(result_hash)));
                },
                |outcome| {
                    let mut extra = Map::new();
                    if let Some(replay) = outcome.result_value.get("_replay") {
                        extra.insert("_replay".to_string(), replay.clone());
                    }
                    self.evaluator
                        .consume_with(&outcome.result_value, Some(&extra))
                        .map_err(ReplayError::from)
                },
            )
            .await?;

        let replay_hash = outcome.result_hash;
        let matched = original_hash == Some(replay_hash);

        if matched {
            tracing::info!(replay_hash = %replay_hash.short(), "replay matched original");
        } else {
            tracing::warn!(
                replay_hash = %replay_hash.short(),
                original_hash = ?original_hash.map(|h| h.short()),
                "replay diverged from original"
            );
        }

        Ok(ReplayReport {
            selected_request_hash,
            original_hash,
            replay_hash,
            matched,
            evaluation_status: evaluation.evaluation.status,
            skipped_history_lines,
        })
    }
}

impl std::fmt::Debug for ReplayRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRunner")
            .field("executor", &self.executor)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

fn most_recent<F>(entries: Vec<HistoryEntry>, matches: F) -> Option<HistoryEntry>
where
    F: Fn(&Value) -> bool,
{
    entries.into_iter().rev().find(|e| matches(&e.artifact))
}

fn not_found(selector: &ReplaySelector) -> ReplayError {
    ReplayError::NotFound {
        selector: selector.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_display() {
        assert_eq!(ReplaySelector::TaskId("T-1".into()).to_string(), "task_id=T-1");
        assert_eq!(ReplaySelector::Index(3).to_string(), "index=3");
        assert_eq!(ReplaySelector::Latest.to_string(), "latest");
        let hash = CanonicalHash::compute(b"x");
        assert_eq!(
            ReplaySelector::RequestHash(hash).to_string(),
            format!("request_hash={}", hash.to_hex())
        );
    }

    #[test]
    fn report_serializes_hashes_as_hex() {
        let hash = CanonicalHash::compute(b"x");
        let report = ReplayReport {
            selected_request_hash: hash,
            original_hash: None,
            replay_hash: hash,
            matched: false,
            evaluation_status: EvaluationStatus::Fail,
            skipped_history_lines: 2,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["replay_hash"], json!(hash.to_hex()));
        assert_eq!(value["original_hash"], Value::Null);
        assert_eq!(value["evaluation_status"], json!("fail"));
    }
}
