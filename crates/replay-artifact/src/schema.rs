//! Data-driven schema gates
//!
//! Each artifact kind has a JSON Schema (draft 7) document embedded here.
//! The documents are plain data so any other consumer can gate on the same
//! contract; [`schema_document`] returns them verbatim.
//!
//! [`SchemaValidator::validate`] never fails: every outcome, including an
//! unusable schema, is reported as a [`ValidationReport`].

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Lowercase hex SHA-256 digest
const HASH_PATTERN: &str = "^[0-9a-f]{64}$";

/// Schema identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaId {
    /// Gate for incoming requests
    ExecutionRequest,
    /// Gate for executor output
    ExecutionResult,
    /// Gate for evaluator output
    EvaluationResult,
}

impl SchemaId {
    /// All schema identifiers
    pub const ALL: [Self; 3] = [
        Self::ExecutionRequest,
        Self::ExecutionResult,
        Self::EvaluationResult,
    ];

    /// Stable identifier string
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionRequest => "execution_request",
            Self::ExecutionResult => "execution_result",
            Self::EvaluationResult => "evaluation_result",
        }
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaId {
    type Err = UnknownSchema;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownSchema(s.to_string()))
    }
}

/// Unrecognized schema identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown schema: '{0}'")]
pub struct UnknownSchema(pub String);

/// Outcome of validating one instance
///
/// Serializes as `{"valid":true}` or `{"valid":false,"errors":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the instance satisfied the schema
    pub valid: bool,
    /// One message per violation, prefixed with the instance path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Passing report
    #[inline]
    #[must_use]
    pub fn pass() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Failing report
    #[inline]
    #[must_use]
    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    /// Check if the instance passed
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Violations joined into one line
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validates artifact instances against the embedded schemas
///
/// Schemas are compiled once per process and shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    /// Create validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `instance` against the schema named by `id`
    #[must_use]
    pub fn validate(&self, id: SchemaId, instance: &Value) -> ValidationReport {
        let compiled = match id {
            SchemaId::ExecutionRequest => &*REQUEST_SCHEMA,
            SchemaId::ExecutionResult => &*RESULT_SCHEMA,
            SchemaId::EvaluationResult => &*EVALUATION_SCHEMA,
        };

        let schema = match compiled {
            Ok(schema) => schema,
            Err(message) => {
                return ValidationReport::fail(vec![format!("schema {id} unavailable: {message}")])
            }
        };

        match schema.validate(instance) {
            Ok(()) => ValidationReport::pass(),
            Err(errors) => {
                let mut messages: Vec<String> = errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            format!("/: {e}")
                        } else {
                            format!("{path}: {e}")
                        }
                    })
                    .collect();
                messages.sort();
                ValidationReport::fail(messages)
            }
        }
    }
}

static REQUEST_SCHEMA: Lazy<Result<JSONSchema, String>> =
    Lazy::new(|| compile(&schema_document(SchemaId::ExecutionRequest)));
static RESULT_SCHEMA: Lazy<Result<JSONSchema, String>> =
    Lazy::new(|| compile(&schema_document(SchemaId::ExecutionResult)));
static EVALUATION_SCHEMA: Lazy<Result<JSONSchema, String>> =
    Lazy::new(|| compile(&schema_document(SchemaId::EvaluationResult)));

fn compile(document: &Value) -> Result<JSONSchema, String> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(document)
        .map_err(|e| e.to_string())
}

/// The JSON Schema document for `id`
#[must_use]
pub fn schema_document(id: SchemaId) -> Value {
    match id {
        SchemaId::ExecutionRequest => request_document(),
        SchemaId::ExecutionResult => result_document(),
        SchemaId::EvaluationResult => evaluation_document(),
    }
}

fn request_document() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ExecutionRequest",
        "type": "object",
        "required": ["task_id", "payload"],
        "properties": {
            "kind": { "const": "execution_request" },
            "task_id": { "type": "string", "minLength": 1 },
            "milestone_id": { "type": ["string", "null"] },
            "title": { "type": ["string", "null"] },
            "created_at": { "type": ["string", "null"] },
            "payload": {
                "type": "object",
                "required": ["task_snapshot"],
                "properties": {
                    "agent_sequence": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 1 }
                    },
                    "task_snapshot": { "type": "object" }
                }
            },
            "_meta": { "type": ["object", "null"] }
        }
    })
}

fn result_document() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ExecutionResult",
        "type": "object",
        "required": ["kind", "agent_role", "request_hash", "created_at", "status"],
        "properties": {
            "kind": { "const": "execution_result" },
            "agent_role": { "type": "string", "minLength": 1 },
            "request_hash": { "type": "string", "pattern": HASH_PATTERN },
            "created_at": { "type": "string" },
            "status": { "enum": ["success", "error"] },
            "output": { "type": "object" },
            "error": {
                "type": "object",
                "required": ["type", "message"],
                "properties": {
                    "type": { "type": "string" },
                    "message": { "type": "string" }
                }
            },
            "errors": { "type": "array", "items": { "type": "string" } },
            "_meta": { "type": ["object", "null"] },
            "_replay": { "type": ["object", "null"] }
        },
        "allOf": [
            {
                "if": { "properties": { "status": { "const": "success" } } },
                "then": { "required": ["output"] }
            },
            {
                "if": { "properties": { "status": { "const": "error" } } },
                "then": { "required": ["error"] }
            }
        ]
    })
}

fn evaluation_document() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "EvaluationResult",
        "type": "object",
        "required": ["kind", "agent_role", "result_hash", "created_at", "status", "findings"],
        "properties": {
            "kind": { "const": "evaluation_result" },
            "agent_role": { "type": "string", "minLength": 1 },
            "result_hash": { "type": "string", "pattern": HASH_PATTERN },
            "created_at": { "type": "string" },
            "status": { "enum": ["pass", "fail", "error"] },
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["code", "passed"],
                    "properties": {
                        "code": { "type": "string", "minLength": 1 },
                        "passed": { "type": "boolean" },
                        "detail": { "type": ["string", "null"] }
                    }
                }
            },
            "errors": { "type": "array", "items": { "type": "string" } },
            "_meta": { "type": ["object", "null"] },
            "_replay": { "type": ["object", "null"] }
        }
    })
}
