//! Pipeline facade
//!
//! Wires one store, one executor, one evaluator and a replay runner
//! together so a submission always ends with a stored result and a stored
//! evaluation.

use crate::agent::AgentRegistry;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, ReplayError};
use crate::evaluator::{EvaluationOutcome, Evaluator};
use crate::executor::{ExecutionOutcome, Executor, SubmissionOrigin};
use crate::note_agent::NoteAgent;
use crate::replay::{ReplayReport, ReplayRunner, ReplaySelector};
use replay_artifact::ArtifactKind;
use replay_store::{ArtifactStore, FsArtifactStore};
use serde_json::Value;
use std::sync::Arc;

/// Result and evaluation of one submission
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    /// Executor outcome
    pub execution: ExecutionOutcome,
    /// Evaluator outcome for that result
    pub evaluation: EvaluationOutcome,
}

/// Executor, evaluator and replay over one store
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn ArtifactStore>,
    executor: Arc<Executor>,
    evaluator: Arc<Evaluator>,
    replay: ReplayRunner,
}

impl Pipeline {
    /// Build over an existing store and agent set
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ArtifactStore>,
        agents: AgentRegistry,
    ) -> Result<Self, PipelineError> {
        let agents = Arc::new(agents);
        let executor = Arc::new(Executor::new(Arc::clone(&store), agents, &config)?);
        let evaluator = Arc::new(Evaluator::new(Arc::clone(&store), &config)?);
        let replay = ReplayRunner::new(
            Arc::clone(&executor),
            Arc::clone(&evaluator),
            Arc::clone(&store),
        );
        Ok(Self {
            config,
            store,
            executor,
            evaluator,
            replay,
        })
    }

    /// Filesystem store at `artifacts_dir` with the built-in [`NoteAgent`]
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the store
    /// directory cannot be created.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::open(&config.artifacts_dir)?);
        let agents = AgentRegistry::new().with_agent(Arc::new(
            NoteAgent::new(config.generated_dir()).with_role(config.default_agent_role.clone()),
        ));
        Self::new(config, store, agents)
    }

    /// Execute then evaluate a raw request
    ///
    /// # Errors
    ///
    /// Returns error if the executor is busy or the store fails.
    pub async fn submit(&self, raw: &Value) -> Result<PipelineRun, PipelineError> {
        self.run(raw, SubmissionOrigin::Fresh).await
    }

    /// Submit whatever is in the request last slot
    ///
    /// A missing slot is submitted as `null` and becomes a validation
    /// error artifact. The request is appended to history only when it is
    /// not already the newest entry there.
    ///
    /// # Errors
    ///
    /// Returns error if the executor is busy or the store fails.
    pub async fn consume_last(&self) -> Result<PipelineRun, PipelineError> {
        let raw = self
            .store
            .read_last(ArtifactKind::ExecutionRequest)?
            .unwrap_or_else(|| {
                tracing::warn!("no execution request in last slot");
                Value::Null
            });
        self.run(&raw, SubmissionOrigin::LastSlot).await
    }

    async fn run(&self, raw: &Value, origin: SubmissionOrigin) -> Result<PipelineRun, PipelineError> {
        let (execution, evaluation) = self
            .executor
            .submit_then(
                raw,
                origin,
                |_, _| {},
                |outcome| {
                    self.evaluator
                        .consume(&outcome.result_value)
                        .map_err(PipelineError::from)
                },
            )
            .await?;
        Ok(PipelineRun {
            execution,
            evaluation,
        })
    }

    /// Evaluate the result in the last slot
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub fn evaluate_last(&self) -> Result<EvaluationOutcome, PipelineError> {
        Ok(self.evaluator.evaluate_last()?)
    }

    /// Replay a stored request
    ///
    /// # Errors
    ///
    /// Returns error if nothing matches, the executor is busy, or the
    /// store fails.
    pub async fn replay(&self, selector: &ReplaySelector) -> Result<ReplayReport, ReplayError> {
        self.replay.replay(selector).await
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Shared executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Shared evaluator
    #[inline]
    #[must_use]
    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}
