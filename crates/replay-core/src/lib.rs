//! Replay Core - deterministic execution pipeline
//!
//! - [`Executor`]: single-flight state machine turning a request into a
//!   stored result
//! - [`Evaluator`]: pass/fail findings over a result
//! - [`ReplayRunner`]: re-runs a stored request and compares result hashes
//! - [`Pipeline`]: the three wired over one [`replay_store::ArtifactStore`]
//!
//! # Example
//!
//! ```rust,no_run
//! use replay_core::{Pipeline, PipelineConfig, ReplaySelector};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::open(PipelineConfig::new().with_artifacts_dir("artifacts"))?;
//!
//! let request = json!({
//!     "task_id": "T-1",
//!     "payload": {"task_snapshot": {"content": "hello"}}
//! });
//! let run = pipeline.submit(&request).await?;
//! println!("evaluation: {}", run.evaluation.evaluation.status);
//!
//! let report = pipeline.replay(&ReplaySelector::TaskId("T-1".into())).await?;
//! assert!(report.matched);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

mod agent;
mod config;
mod error;
mod evaluator;
mod executor;
mod note_agent;
mod pipeline;
mod replay;
mod safe_write;
mod state_machine;

pub use agent::{Agent, AgentInvocation, AgentRegistry};
pub use config::{PipelineConfig, DEFAULT_AGENT_ROLE, DEFAULT_AGENT_TIMEOUT_SECS};
pub use error::{
    AgentError, ConfigError, EvaluateError, ExecuteError, PipelineError, ReplayError,
    StateMachineError,
};
pub use evaluator::{codes, EvaluationOutcome, Evaluator, EVALUATOR_ROLE};
pub use executor::{ExecutionOutcome, Executor, SubmissionOrigin};
pub use note_agent::{NoteAgent, DEFAULT_ACTION};
pub use pipeline::{Pipeline, PipelineRun};
pub use replay::{ReplayReport, ReplayRunner, ReplaySelector};
pub use safe_write::{
    check_relative_path, safe_write_text, SafeWriteError, WriteRecord, ALLOWED_EXTENSIONS,
};
pub use state_machine::{allowed_transitions, validate_transition, ExecutorState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
