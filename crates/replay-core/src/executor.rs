//! Executor (consumer)
//!
//! Turns a raw request into exactly one stored [`ExecutionResult`]. At most
//! one submission is in flight per executor; a second one is rejected with
//! [`ExecuteError::Busy`] instead of being queued. The executor stays out of
//! `Idle` until every write of a submission, including the follow-up passed
//! to [`Executor::submit_then`], has finished.
//!
//! Validation failures, agent failures and timeouts are not returned as
//! errors. They become `status: error` artifacts and go through the same
//! store path as successful results.

use crate::agent::{AgentInvocation, AgentRegistry};
use crate::config::PipelineConfig;
use crate::error::{AgentError, ConfigError, ExecuteError};
use crate::state_machine::{validate_transition, ExecutorState};
use parking_lot::Mutex;
use replay_artifact::{
    ArtifactKind, CanonicalHash, Canonicalizer, ErrorDetail, ExecutionRequest, ExecutionResult,
    SchemaId, SchemaValidator, ValidationReport,
};
use replay_store::ArtifactStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a submission came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOrigin {
    /// New request: recorded in the request last slot and history
    Fresh,
    /// Re-run of a stored request: last slot only, never re-appended
    Replay,
    /// Request already sitting in the last slot: appended to history only
    /// if it is not already the newest entry
    LastSlot,
}

impl SubmissionOrigin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Replay => "replay",
            Self::LastSlot => "last_slot",
        }
    }
}

/// What one submission produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// `Hash(Canonicalize(request))`
    pub request_hash: CanonicalHash,
    /// Stored result
    pub result: ExecutionResult,
    /// Stored result exactly as written
    pub result_value: Value,
    /// `Hash(Canonicalize(result))`
    pub result_hash: CanonicalHash,
    /// States visited, starting at `Validating`
    pub states: Vec<ExecutorState>,
}

impl ExecutionOutcome {
    /// Check if the agent was called
    #[inline]
    #[must_use]
    pub fn reached_executing(&self) -> bool {
        self.states.contains(&ExecutorState::Executing)
    }
}

/// Holds the executor out of `Idle` until dropped
struct ActiveRun<'a> {
    state: &'a Mutex<ExecutorState>,
    visited: Vec<ExecutorState>,
}

impl ActiveRun<'_> {
    fn advance(&mut self, to: ExecutorState) {
        let mut state = self.state.lock();
        let from = *state;
        if let Err(e) = validate_transition(from, to) {
            tracing::error!(error = %e, "executor state machine violated");
        }
        tracing::debug!(%from, %to, "executor transition");
        *state = to;
        self.visited.push(to);
    }

    fn current(&self) -> ExecutorState {
        *self.state.lock()
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let last = *state;
        if !last.is_terminal() {
            tracing::warn!(state = %last, "submission abandoned before completion");
        }
        *state = ExecutorState::Idle;
    }
}

/// Request consumer with single-flight admission
pub struct Executor {
    store: Arc<dyn ArtifactStore>,
    agents: Arc<AgentRegistry>,
    canonicalizer: Canonicalizer,
    validator: SchemaValidator,
    default_role: String,
    timeout: Option<Duration>,
    consumer_version: String,
    state: Mutex<ExecutorState>,
}

impl Executor {
    /// Create executor over `store` and `agents`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        agents: Arc<AgentRegistry>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            agents,
            canonicalizer: config.canonicalizer()?,
            validator: SchemaValidator::new(),
            default_role: config.default_agent_role.clone(),
            timeout: config.agent_timeout(),
            consumer_version: config.consumer_version.clone(),
            state: Mutex::new(ExecutorState::Idle),
        })
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Canonicalizer used for request and result hashes
    #[inline]
    #[must_use]
    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    fn begin(&self) -> Result<ActiveRun<'_>, ExecuteError> {
        let mut state = self.state.lock();
        if *state != ExecutorState::Idle {
            return Err(ExecuteError::Busy { state: *state });
        }
        *state = ExecutorState::Validating;
        Ok(ActiveRun {
            state: &self.state,
            visited: vec![ExecutorState::Validating],
        })
    }

    /// Run one request through validation, the agent and the store
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Busy`] if another submission is in flight,
    /// or a store error if an artifact could not be persisted.
    pub async fn submit(
        &self,
        raw: &Value,
        origin: SubmissionOrigin,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let (outcome, ()) = self
            .submit_then(raw, origin, |_, _| {}, |_| Ok::<_, ExecuteError>(()))
            .await?;
        Ok(outcome)
    }

    /// [`submit`](Self::submit) with hooks that run before returning to `Idle`
    ///
    /// `annotate` receives the result hash and may add allow-listed fields
    /// to the result before it is stored. `finish` runs after the result is
    /// stored, while later submissions are still rejected as busy, so its
    /// writes cannot interleave with another run.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Busy`] if another submission is in flight,
    /// a store error if an artifact could not be persisted, or whatever
    /// `finish` returns.
    pub async fn submit_then<T, E, A, F>(
        &self,
        raw: &Value,
        origin: SubmissionOrigin,
        annotate: A,
        finish: F,
    ) -> Result<(ExecutionOutcome, T), E>
    where
        A: FnOnce(CanonicalHash, &mut Map<String, Value>),
        F: FnOnce(&ExecutionOutcome) -> Result<T, E>,
        E: From<ExecuteError>,
    {
        let mut run = self.begin()?;
        let started = Instant::now();
        let request_hash = self.canonicalizer.hash(raw);
        tracing::info!(
            request_hash = %request_hash.short(),
            origin = origin.as_str(),
            "submission accepted"
        );

        let result = match self.admit(raw, request_hash) {
            Err(result) => {
                run.advance(ExecutorState::Error);
                result
            }
            Ok(request) => {
                self.record_request(raw, origin)?;
                run.advance(ExecutorState::Executing);
                let result = self.execute(&request, request_hash).await;
                run.advance(if result.is_success() {
                    ExecutorState::Success
                } else {
                    ExecutorState::Error
                });
                result
            }
        };

        let result = result.with_meta(json!({
            "consumer_version": self.consumer_version,
            "duration_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "origin": origin.as_str(),
        }));
        let mut result_value = serde_json::to_value(&result).map_err(ExecuteError::from)?;
        let unannotated_hash = self.canonicalizer.hash(&result_value);
        if let Some(fields) = result_value.as_object_mut() {
            annotate(unannotated_hash, fields);
        }
        self.store
            .write_last(ArtifactKind::ExecutionResult, &result_value)
            .map_err(ExecuteError::from)?;
        self.store
            .append(ArtifactKind::ExecutionResult, &result_value)
            .map_err(ExecuteError::from)?;

        let result_hash = self.canonicalizer.hash(&result_value);
        tracing::info!(
            request_hash = %request_hash.short(),
            result_hash = %result_hash.short(),
            status = ?result.status,
            state = %run.current(),
            "result recorded"
        );

        let outcome = ExecutionOutcome {
            request_hash,
            result,
            result_value,
            result_hash,
            states: std::mem::take(&mut run.visited),
        };
        let extra = finish(&outcome)?;
        drop(run);
        Ok((outcome, extra))
    }

    /// Request gate; on failure returns the error artifact to store
    fn admit(
        &self,
        raw: &Value,
        request_hash: CanonicalHash,
    ) -> Result<ExecutionRequest, ExecutionResult> {
        let report = self.validator.validate(SchemaId::ExecutionRequest, raw);
        let typed = if report.is_valid() {
            serde_json::from_value::<ExecutionRequest>(raw.clone()).map_err(|e| vec![e.to_string()])
        } else {
            Err(report.errors)
        };

        match typed {
            Ok(request) => Ok(request),
            Err(errors) => {
                tracing::warn!(
                    request_hash = %request_hash.short(),
                    violations = errors.len(),
                    "request failed validation"
                );
                let message = format!("execution_request failed validation: {}", errors.join("; "));
                Err(ExecutionResult::failure(
                    self.default_role.clone(),
                    request_hash,
                    now(),
                    ErrorDetail::new("ValidationError", message),
                    errors,
                ))
            }
        }
    }

    fn record_request(&self, raw: &Value, origin: SubmissionOrigin) -> Result<(), ExecuteError> {
        match origin {
            SubmissionOrigin::Fresh => {
                self.store.write_last(ArtifactKind::ExecutionRequest, raw)?;
                self.store.append(ArtifactKind::ExecutionRequest, raw)?;
            }
            SubmissionOrigin::Replay => {
                self.store.write_last(ArtifactKind::ExecutionRequest, raw)?;
            }
            SubmissionOrigin::LastSlot => {
                let newest = self
                    .store
                    .read_history(ArtifactKind::ExecutionRequest)?
                    .last()
                    .map(|entry| entry.artifact);
                if newest.as_ref() == Some(raw) {
                    tracing::debug!("last-slot request already recorded in history");
                } else {
                    self.store.append(ArtifactKind::ExecutionRequest, raw)?;
                }
            }
        }
        Ok(())
    }

    fn role_for<'r>(&'r self, request: &'r ExecutionRequest) -> &'r str {
        request.target_role().unwrap_or(&self.default_role)
    }

    async fn execute(&self, request: &ExecutionRequest, request_hash: CanonicalHash) -> ExecutionResult {
        let role = self.role_for(request).to_string();
        let invocation = AgentInvocation::from_request(request, request_hash);

        let output = match self.call_agent(&role, &invocation).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    task_id = %request.task_id,
                    %role,
                    error = %e,
                    "agent failed"
                );
                return ExecutionResult::failure(
                    role,
                    request_hash,
                    now(),
                    ErrorDetail::new(e.error_type(), e.to_string()),
                    Vec::new(),
                );
            }
        };

        let candidate = ExecutionResult::success(role.clone(), request_hash, now(), output);
        let report = serde_json::to_value(&candidate)
            .map(|value| self.validator.validate(SchemaId::ExecutionResult, &value))
            .unwrap_or_else(|e| ValidationReport::fail(vec![e.to_string()]));
        if report.is_valid() {
            return candidate;
        }

        tracing::warn!(%role, violations = report.errors.len(), "agent output failed result schema");
        ExecutionResult::failure(
            role,
            request_hash,
            now(),
            ErrorDetail::new(
                "ValidationError",
                format!("execution_result failed validation: {}", report.summary()),
            ),
            report.errors,
        )
    }

    async fn call_agent(
        &self,
        role: &str,
        invocation: &AgentInvocation,
    ) -> Result<Map<String, Value>, AgentError> {
        let agent = self.agents.get(role)?;
        match self.timeout {
            None => agent.execute(invocation).await,
            Some(deadline) => tokio::time::timeout(deadline, agent.execute(invocation))
                .await
                .map_err(|_| AgentError::Timeout {
                    secs: deadline.as_secs(),
                })?,
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("state", &self.state())
            .field("agents", &self.agents)
            .field("default_role", &self.default_role)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use async_trait::async_trait;
    use replay_artifact::ExecutionStatus;
    use replay_store::FsArtifactStore;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn role(&self) -> &str {
            "engineer"
        }

        async fn execute(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
            let mut out = Map::new();
            out.insert("task_id".into(), json!(invocation.task_id));
            Ok(out)
        }
    }

    fn executor(dir: &std::path::Path) -> Executor {
        let store = Arc::new(FsArtifactStore::open(dir).unwrap());
        let agents = Arc::new(AgentRegistry::new().with_agent(Arc::new(Echo)));
        Executor::new(store, agents, &PipelineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn success_walks_full_path() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let outcome = executor
            .submit(
                &json!({"task_id": "T-1", "payload": {"task_snapshot": {}}}),
                SubmissionOrigin::Fresh,
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.status, ExecutionStatus::Success);
        assert_eq!(
            outcome.states,
            vec![
                ExecutorState::Validating,
                ExecutorState::Executing,
                ExecutorState::Success
            ]
        );
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[test]
    fn busy_guard_rejects_second_entry() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let run = executor.begin().unwrap();
        assert!(matches!(
            executor.begin(),
            Err(ExecuteError::Busy {
                state: ExecutorState::Validating
            })
        ));
        drop(run);
        assert_eq!(executor.state(), ExecutorState::Idle);
        assert!(executor.begin().is_ok());
    }

    #[test]
    fn busy_until_back_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        for state in [ExecutorState::Success, ExecutorState::Error] {
            *executor.state.lock() = state;
            assert!(matches!(executor.begin(), Err(ExecuteError::Busy { state: s }) if s == state));
        }
        *executor.state.lock() = ExecutorState::Idle;
        assert!(executor.begin().is_ok());
    }

    #[tokio::test]
    async fn finish_runs_before_idle_and_annotation_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let request = json!({"task_id": "T-1", "payload": {"task_snapshot": {}}});
        let (outcome, seen) = executor
            .submit_then(
                &request,
                SubmissionOrigin::Fresh,
                |_, fields| {
                    fields.insert("_replay".into(), json!({"matched": true}));
                },
                |_| Ok::<_, ExecuteError>(executor.state()),
            )
            .await
            .unwrap();

        assert_eq!(seen, ExecutorState::Success);
        assert_eq!(executor.state(), ExecutorState::Idle);
        assert_eq!(outcome.result_value["_replay"]["matched"], true);
        let plain = executor.submit(&request, SubmissionOrigin::Fresh).await.unwrap();
        assert_eq!(plain.result_hash, outcome.result_hash);
    }

    #[tokio::test]
    async fn unknown_role_becomes_agent_error_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let outcome = executor
            .submit(
                &json!({"task_id": "T-1", "payload": {"agent_sequence": ["pm"], "task_snapshot": {}}}),
                SubmissionOrigin::Fresh,
            )
            .await
            .unwrap();
        let error = outcome.result.error.unwrap();
        assert_eq!(error.error_type, "AgentError");
        assert!(error.message.contains("pm"));
        assert_eq!(outcome.result.agent_role, "pm");
    }
}
