//! Replay Artifact System
//!
//! Canonical form, content hashing and schema gates for the three artifact
//! kinds that flow through the execution pipeline.
//!
//! # Core Concepts
//!
//! - [`Canonicalizer`]: deterministic bytes, with an [`AllowList`] of
//!   non-deterministic fields stripped first
//! - [`CanonicalHash`]: SHA-256 over canonical bytes
//! - [`SchemaValidator`]: data-driven gate returning a [`ValidationReport`]
//! - [`ExecutionRequest`], [`ExecutionResult`], [`EvaluationResult`]: typed
//!   artifacts bound to each other by hash
//!
//! # Example
//!
//! ```rust
//! use replay_artifact::Canonicalizer;
//! use serde_json::json;
//!
//! let canonicalizer = Canonicalizer::default();
//! let a = json!({"task_id": "T-1", "created_at": "2026-01-01T00:00:00Z"});
//! let b = json!({"created_at": "2099-01-01T00:00:00Z", "task_id": "T-1"});
//! assert_eq!(canonicalizer.hash(&a), canonicalizer.hash(&b));
//! ```

#![warn(unreachable_pub)]

// Core modules
mod artifact;
mod canonical;
mod hash;
mod schema;

// Re-exports
pub use artifact::{
    ArtifactKind, ErrorDetail, EvaluationResult, EvaluationStatus, ExecutionRequest,
    ExecutionResult, ExecutionStatus, Finding, RequestPayload, UnknownKind,
};
pub use canonical::{
    canonical_json, AllowList, CanonicalError, Canonicalizer, FieldPath, Segment,
    DEFAULT_ALLOW_LIST,
};
pub use hash::{CanonicalHash, HashError, SHORT_HASH_LEN};
pub use schema::{schema_document, SchemaId, SchemaValidator, UnknownSchema, ValidationReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
