//! Typed execution artifacts
//!
//! The store and the schema gates work on raw JSON so malformed input can be
//! reported rather than rejected at deserialization time. Once an instance
//! has passed its gate it is converted into one of these types.

use crate::hash::CanonicalHash;
use crate::schema::SchemaId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Artifact kinds managed by the pipeline
///
/// Each kind owns one last-slot file and one append-only history file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Submitted request
    ExecutionRequest,
    /// Executor output
    ExecutionResult,
    /// Evaluator output
    EvaluationResult,
}

impl ArtifactKind {
    /// All kinds
    pub const ALL: [Self; 3] = [
        Self::ExecutionRequest,
        Self::ExecutionResult,
        Self::EvaluationResult,
    ];

    /// Value of the `kind` field
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionRequest => "execution_request",
            Self::ExecutionResult => "execution_result",
            Self::EvaluationResult => "evaluation_result",
        }
    }

    /// Last-slot file name
    #[inline]
    #[must_use]
    pub const fn last_file_name(self) -> &'static str {
        match self {
            Self::ExecutionRequest => "last_execution_request.json",
            Self::ExecutionResult => "last_execution_result.json",
            Self::EvaluationResult => "last_evaluation_result.json",
        }
    }

    /// History file name
    #[inline]
    #[must_use]
    pub const fn history_file_name(self) -> &'static str {
        match self {
            Self::ExecutionRequest => "execution_requests.ndjson",
            Self::ExecutionResult => "execution_results.ndjson",
            Self::EvaluationResult => "evaluation_results.ndjson",
        }
    }

    /// Schema gating this kind
    #[inline]
    #[must_use]
    pub const fn schema(self) -> SchemaId {
        match self {
            Self::ExecutionRequest => SchemaId::ExecutionRequest,
            Self::ExecutionResult => SchemaId::ExecutionResult,
            Self::EvaluationResult => SchemaId::EvaluationResult,
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Unrecognized artifact kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown artifact kind: '{0}'")]
pub struct UnknownKind(pub String);

/// Request created once per task selection
///
/// `created_at` and `_meta` carry no identity; they are excluded from the
/// request hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Always `execution_request`; defaulted when absent
    #[serde(default = "default_request_kind")]
    pub kind: String,
    /// Correlation key
    pub task_id: String,
    /// Optional milestone grouping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    /// Optional human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Creation timestamp (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Agent routing plus the caller-supplied snapshot
    pub payload: RequestPayload,
    /// Transport metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ExecutionRequest {
    /// Build a request for `task_id` carrying `task_snapshot`
    #[must_use]
    pub fn new(task_id: impl Into<String>, task_snapshot: Map<String, Value>) -> Self {
        Self {
            kind: ArtifactKind::ExecutionRequest.as_str().to_string(),
            task_id: task_id.into(),
            milestone_id: None,
            title: None,
            created_at: None,
            payload: RequestPayload {
                agent_sequence: Vec::new(),
                task_snapshot,
            },
            meta: None,
        }
    }

    /// With agent sequence
    #[inline]
    #[must_use]
    pub fn with_agent_sequence<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload.agent_sequence = roles.into_iter().map(Into::into).collect();
        self
    }

    /// With creation timestamp
    #[inline]
    #[must_use]
    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    /// With title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// With milestone
    #[inline]
    #[must_use]
    pub fn with_milestone(mut self, milestone_id: impl Into<String>) -> Self {
        self.milestone_id = Some(milestone_id.into());
        self
    }

    /// Role that should execute this request, if the sequence names one
    #[inline]
    #[must_use]
    pub fn target_role(&self) -> Option<&str> {
        self.payload.agent_sequence.last().map(String::as_str)
    }
}

fn default_request_kind() -> String {
    ArtifactKind::ExecutionRequest.as_str().to_string()
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Agent roles in pipeline order; the last one executes
    #[serde(default)]
    pub agent_sequence: Vec<String>,
    /// Opaque caller snapshot, never mutated downstream
    pub task_snapshot: Map<String, Value>,
}

/// Executor outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Agent produced schema-valid output
    Success,
    /// Validation, agent or timeout failure
    Error,
}

/// Failure description carried by error artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Failure class, e.g. `ValidationError` or `AgentError`
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorDetail {
    /// Create detail
    #[inline]
    #[must_use]
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Executor output bound to its request through `request_hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Always `execution_result`
    pub kind: String,
    /// Role of the agent that ran (or would have run)
    pub agent_role: String,
    /// `Hash(Canonicalize(request))`
    pub request_hash: CanonicalHash,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Outcome
    pub status: ExecutionStatus,
    /// Agent output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    /// Failure description on error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Schema violations that caused the error
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Non-deterministic producer metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ExecutionResult {
    /// Successful result
    #[must_use]
    pub fn success(
        agent_role: impl Into<String>,
        request_hash: CanonicalHash,
        created_at: impl Into<String>,
        output: Map<String, Value>,
    ) -> Self {
        Self {
            kind: ArtifactKind::ExecutionResult.as_str().to_string(),
            agent_role: agent_role.into(),
            request_hash,
            created_at: created_at.into(),
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
            errors: Vec::new(),
            meta: None,
        }
    }

    /// Error artifact
    #[must_use]
    pub fn failure(
        agent_role: impl Into<String>,
        request_hash: CanonicalHash,
        created_at: impl Into<String>,
        error: ErrorDetail,
        errors: Vec<String>,
    ) -> Self {
        Self {
            kind: ArtifactKind::ExecutionResult.as_str().to_string(),
            agent_role: agent_role.into(),
            request_hash,
            created_at: created_at.into(),
            status: ExecutionStatus::Error,
            output: None,
            error: Some(error),
            errors,
            meta: None,
        }
    }

    /// With producer metadata
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Check if this is a success artifact
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Evaluator outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Every finding passed
    Pass,
    /// At least one finding failed
    Fail,
    /// The evaluated result did not pass its schema gate
    Error,
}

impl Display for EvaluationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        })
    }
}

/// One evaluator check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable check identifier
    pub code: String,
    /// Whether the check passed
    pub passed: bool,
    /// Explanation, mostly for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Finding {
    /// Passing finding
    #[inline]
    #[must_use]
    pub fn pass(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            passed: true,
            detail: None,
        }
    }

    /// Failing finding
    #[inline]
    #[must_use]
    pub fn fail(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Evaluator output bound to its result through `result_hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Always `evaluation_result`
    pub kind: String,
    /// Role of the evaluator
    pub agent_role: String,
    /// `Hash(Canonicalize(result))`
    pub result_hash: CanonicalHash,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Outcome
    pub status: EvaluationStatus,
    /// Individual checks
    pub findings: Vec<Finding>,
    /// Schema violations that caused an `error` status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Non-deterministic producer metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl EvaluationResult {
    /// Build from findings; status is `pass` iff every finding passed
    #[must_use]
    pub fn from_findings(
        agent_role: impl Into<String>,
        result_hash: CanonicalHash,
        created_at: impl Into<String>,
        findings: Vec<Finding>,
    ) -> Self {
        let status = if findings.iter().all(|f| f.passed) {
            EvaluationStatus::Pass
        } else {
            EvaluationStatus::Fail
        };
        Self {
            kind: ArtifactKind::EvaluationResult.as_str().to_string(),
            agent_role: agent_role.into(),
            result_hash,
            created_at: created_at.into(),
            status,
            findings,
            errors: Vec::new(),
            meta: None,
        }
    }

    /// Error artifact for a result that failed its schema gate
    #[must_use]
    pub fn failure(
        agent_role: impl Into<String>,
        result_hash: CanonicalHash,
        created_at: impl Into<String>,
        findings: Vec<Finding>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            kind: ArtifactKind::EvaluationResult.as_str().to_string(),
            agent_role: agent_role.into(),
            result_hash,
            created_at: created_at.into(),
            status: EvaluationStatus::Error,
            findings,
            errors,
            meta: None,
        }
    }

    /// With producer metadata
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
