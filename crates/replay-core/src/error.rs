//! Error types for the execution pipeline
//!
//! Only rejections that produce no artifact surface here. Validation and
//! agent failures become error artifacts written through the store; see
//! [`AgentError::error_type`] for how they are labelled.

use crate::state_machine::ExecutorState;
use replay_artifact::CanonicalError;
use replay_store::StoreError;
use std::path::PathBuf;

/// Failure of the external agent collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Agent ran and reported failure
    #[error("agent failed: {0}")]
    Failed(String),

    /// No agent registered for the requested role
    #[error("no agent registered for role '{0}'")]
    UnknownRole(String),

    /// Agent did not finish before the deadline
    #[error("agent timed out after {secs}s")]
    Timeout {
        /// Deadline that expired
        secs: u64,
    },
}

impl AgentError {
    /// Value of `error.type` in the resulting error artifact
    #[inline]
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Timeout",
            _ => "AgentError",
        }
    }
}

/// Executor rejections
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// Another request is validating or executing
    #[error("executor busy: a request is already {state}")]
    Busy {
        /// State observed at submission
        state: ExecutorState,
    },

    /// Artifact could not be persisted
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Artifact could not be encoded
    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExecuteError {
    /// Check if this is a busy rejection
    #[inline]
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Evaluator failures
#[derive(Debug, thiserror::Error)]
pub enum EvaluateError {
    /// Artifact could not be read or persisted
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Artifact could not be encoded
    #[error("failed to encode evaluation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Replay failures
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// No history entry matches the selector
    #[error("no request in history matches {selector}")]
    NotFound {
        /// Selector as displayed
        selector: String,
    },

    /// Request history has no parseable entries
    #[error("request history is empty")]
    EmptyHistory,

    /// Index selector past the end of history
    #[error("history index {index} out of range ({len} requests)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Parsed request count
        len: usize,
    },

    /// Re-execution was rejected
    #[error("replay execution failed: {0}")]
    Execute(#[from] ExecuteError),

    /// Re-evaluation failed
    #[error("replay evaluation failed: {0}")]
    Evaluate(#[from] EvaluateError),

    /// History could not be read or slots written
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::PipelineConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An allow-list entry is not a valid field path
    #[error("invalid allow-list: {0}")]
    AllowList(#[from] CanonicalError),

    /// Default agent role is empty
    #[error("default agent role must not be empty")]
    EmptyDefaultRole,
}

/// Illegal executor state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: ExecutorState,
        /// Requested state
        to: ExecutorState,
    },
}

/// Pipeline facade errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Execution rejected
    #[error(transparent)]
    Execute(#[from] ExecuteError),

    /// Evaluation failed
    #[error(transparent)]
    Evaluate(#[from] EvaluateError),

    /// Store could not be opened or read
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_types() {
        assert_eq!(AgentError::Failed("x".into()).error_type(), "AgentError");
        assert_eq!(AgentError::UnknownRole("pm".into()).error_type(), "AgentError");
        assert_eq!(AgentError::Timeout { secs: 5 }.error_type(), "Timeout");
    }

    #[test]
    fn busy_display_names_state() {
        let err = ExecuteError::Busy {
            state: ExecutorState::Executing,
        };
        assert!(err.is_busy());
        assert_eq!(err.to_string(), "executor busy: a request is already executing");
    }

    #[test]
    fn replay_not_found_display() {
        let err = ReplayError::NotFound {
            selector: "task_id=T-9".into(),
        };
        assert_eq!(err.to_string(), "no request in history matches task_id=T-9");
    }
}
