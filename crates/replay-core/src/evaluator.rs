//! Result evaluator
//!
//! [`Evaluator::evaluate`] does not mutate the result it is given. It only
//! reads the files the result claims to have written, so its findings can
//! change if those files change. [`Evaluator::consume`] adds the usual
//! gate-then-store step.

use crate::config::PipelineConfig;
use crate::error::{ConfigError, EvaluateError};
use crate::executor::now;
use crate::safe_write::{has_allowed_extension, sha256_hex, WriteRecord};
use replay_artifact::{
    ArtifactKind, CanonicalHash, Canonicalizer, EvaluationResult, ExecutionResult,
    ExecutionStatus, Finding, SchemaId, SchemaValidator,
};
use replay_store::ArtifactStore;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Role recorded on every evaluation
pub const EVALUATOR_ROLE: &str = "evaluator";

/// Fields every result must carry
const REQUIRED_RESULT_FIELDS: &[&str] = &["kind", "agent_role", "request_hash", "created_at", "status"];

/// Finding codes
pub mod codes {
    /// Result passed its schema gate
    pub const RESULT_SCHEMA_VALID: &str = "result_schema_valid";
    /// Required result fields are present
    pub const REQUIRED_FIELDS_PRESENT: &str = "required_fields_present";
    /// Result status is `success`
    pub const EXECUTION_SUCCEEDED: &str = "execution_succeeded";
    /// Output is a non-empty object
    pub const OUTPUT_PRESENT: &str = "output_present";
    /// `output.writes` entries parse as write records
    pub const WRITE_RECORDS_WELL_FORMED: &str = "write_records_well_formed";
    /// Every write is under the generated directory
    pub const WRITES_ALLOW_LISTED: &str = "writes_allow_listed";
    /// Written files still match their records
    pub const WRITES_VERIFIED: &str = "writes_verified";
    /// A result exists to evaluate
    pub const EXECUTION_RESULT_PRESENT: &str = "execution_result_present";
}

/// What one evaluation produced
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// Hash of the evaluated result
    pub result_hash: CanonicalHash,
    /// Stored evaluation
    pub evaluation: EvaluationResult,
    /// Stored evaluation exactly as written
    pub evaluation_value: Value,
    /// `Hash(Canonicalize(evaluation))`
    pub evaluation_hash: CanonicalHash,
}

/// Produces pass/fail evaluations of execution results
pub struct Evaluator {
    store: Arc<dyn ArtifactStore>,
    canonicalizer: Canonicalizer,
    validator: SchemaValidator,
    generated_dir: PathBuf,
    verify_writes: bool,
    evaluator_version: String,
}

impl Evaluator {
    /// Create evaluator over `store`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(store: Arc<dyn ArtifactStore>, config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            canonicalizer: config.canonicalizer()?,
            validator: SchemaValidator::new(),
            generated_dir: config.generated_dir(),
            verify_writes: config.verify_writes,
            evaluator_version: config.evaluator_version.clone(),
        })
    }

    /// Evaluate a raw result without storing anything
    #[must_use]
    pub fn evaluate(&self, result: &Value) -> EvaluationResult {
        let result_hash = self.canonicalizer.hash(result);

        let report = self.validator.validate(SchemaId::ExecutionResult, result);
        let typed = if report.is_valid() {
            serde_json::from_value::<ExecutionResult>(result.clone()).map_err(|e| vec![e.to_string()])
        } else {
            Err(report.errors)
        };
        let typed = match typed {
            Ok(typed) => typed,
            Err(errors) => {
                tracing::warn!(
                    result_hash = %result_hash.short(),
                    violations = errors.len(),
                    "result failed schema gate"
                );
                let finding = Finding::fail(codes::RESULT_SCHEMA_VALID, errors.join("; "));
                return EvaluationResult::failure(EVALUATOR_ROLE, result_hash, now(), vec![finding], errors);
            }
        };

        let mut findings = vec![
            Finding::pass(codes::RESULT_SCHEMA_VALID),
            required_fields(result),
            execution_succeeded(&typed),
            output_present(&typed),
        ];

        match write_records(&typed) {
            Ok(records) => {
                findings.push(Finding::pass(codes::WRITE_RECORDS_WELL_FORMED));
                findings.push(self.allow_listed(&records));
                if self.verify_writes {
                    findings.push(verified(&records));
                }
            }
            Err(detail) => findings.push(Finding::fail(codes::WRITE_RECORDS_WELL_FORMED, detail)),
        }

        EvaluationResult::from_findings(EVALUATOR_ROLE, result_hash, now(), findings)
    }

    /// Evaluate `result`, gate the evaluation and store it
    ///
    /// # Errors
    ///
    /// Returns error if the evaluation cannot be encoded or stored.
    pub fn consume(&self, result: &Value) -> Result<EvaluationOutcome, EvaluateError> {
        self.consume_with(result, None)
    }

    /// [`consume`](Self::consume), storing `extra` fields on the evaluation
    ///
    /// `extra` should only carry allow-listed keys such as `_replay`; they
    /// are validated with the evaluation but do not change its hash.
    ///
    /// # Errors
    ///
    /// Returns error if the evaluation cannot be encoded or stored.
    pub fn consume_with(
        &self,
        result: &Value,
        extra: Option<&Map<String, Value>>,
    ) -> Result<EvaluationOutcome, EvaluateError> {
        let evaluation = self.evaluate(result);
        self.record(evaluation, extra)
    }

    /// Evaluate the result in the last slot
    ///
    /// A missing slot is itself a failed evaluation, bound to the hash of
    /// JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns error if the slot cannot be read or the evaluation stored.
    pub fn evaluate_last(&self) -> Result<EvaluationOutcome, EvaluateError> {
        match self.store.read_last(ArtifactKind::ExecutionResult)? {
            Some(result) => self.consume(&result),
            None => {
                tracing::warn!("no execution result to evaluate");
                let evaluation = EvaluationResult::from_findings(
                    EVALUATOR_ROLE,
                    self.canonicalizer.hash(&Value::Null),
                    now(),
                    vec![Finding::fail(
                        codes::EXECUTION_RESULT_PRESENT,
                        "no execution result recorded",
                    )],
                );
                self.record(evaluation, None)
            }
        }
    }

    fn record(
        &self,
        evaluation: EvaluationResult,
        extra: Option<&Map<String, Value>>,
    ) -> Result<EvaluationOutcome, EvaluateError> {
        let evaluation = evaluation.with_meta(json!({ "evaluator_version": self.evaluator_version }));
        let mut evaluation_value = serde_json::to_value(&evaluation)?;
        attach(&mut evaluation_value, extra);

        let report = self
            .validator
            .validate(SchemaId::EvaluationResult, &evaluation_value);
        let evaluation = if report.is_valid() {
            evaluation
        } else {
            tracing::error!(errors = %report.summary(), "evaluation failed its own schema gate");
            let errored = EvaluationResult::failure(
                EVALUATOR_ROLE,
                evaluation.result_hash,
                evaluation.created_at.clone(),
                evaluation.findings.clone(),
                report.errors,
            )
            .with_meta(json!({ "evaluator_version": self.evaluator_version }));
            evaluation_value = serde_json::to_value(&errored)?;
            attach(&mut evaluation_value, extra);
            errored
        };

        self.store
            .write_last(ArtifactKind::EvaluationResult, &evaluation_value)?;
        self.store
            .append(ArtifactKind::EvaluationResult, &evaluation_value)?;

        let evaluation_hash = self.canonicalizer.hash(&evaluation_value);
        tracing::info!(
            result_hash = %evaluation.result_hash.short(),
            status = %evaluation.status,
            "evaluation recorded"
        );
        Ok(EvaluationOutcome {
            result_hash: evaluation.result_hash,
            evaluation,
            evaluation_value,
            evaluation_hash,
        })
    }

    fn allow_listed(&self, records: &[WriteRecord]) -> Finding {
        let outside: Vec<&str> = records
            .iter()
            .filter(|r| !is_under(&self.generated_dir, Path::new(&r.path)))
            .map(|r| r.path.as_str())
            .collect();
        if outside.is_empty() {
            Finding::pass(codes::WRITES_ALLOW_LISTED)
        } else {
            Finding::fail(
                codes::WRITES_ALLOW_LISTED,
                format!("writes outside {}: {}", self.generated_dir.display(), outside.join(", ")),
            )
        }
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("generated_dir", &self.generated_dir)
            .field("verify_writes", &self.verify_writes)
            .finish_non_exhaustive()
    }
}

fn attach(value: &mut Value, extra: Option<&Map<String, Value>>) {
    if let (Some(fields), Some(extra)) = (value.as_object_mut(), extra) {
        fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn required_fields(result: &Value) -> Finding {
    let missing: Vec<&str> = REQUIRED_RESULT_FIELDS
        .iter()
        .copied()
        .filter(|f| result.get(*f).map_or(true, Value::is_null))
        .collect();
    if missing.is_empty() {
        Finding::pass(codes::REQUIRED_FIELDS_PRESENT)
    } else {
        Finding::fail(codes::REQUIRED_FIELDS_PRESENT, format!("missing: {}", missing.join(", ")))
    }
}

fn execution_succeeded(result: &ExecutionResult) -> Finding {
    match (&result.status, &result.error) {
        (ExecutionStatus::Success, _) => Finding::pass(codes::EXECUTION_SUCCEEDED),
        (ExecutionStatus::Error, Some(error)) => Finding::fail(
            codes::EXECUTION_SUCCEEDED,
            format!("{}: {}", error.error_type, error.message),
        ),
        (ExecutionStatus::Error, None) => Finding::fail(codes::EXECUTION_SUCCEEDED, "status is error"),
    }
}

fn output_present(result: &ExecutionResult) -> Finding {
    match &result.output {
        Some(output) if !output.is_empty() => Finding::pass(codes::OUTPUT_PRESENT),
        Some(_) => Finding::fail(codes::OUTPUT_PRESENT, "output is empty"),
        None => Finding::fail(codes::OUTPUT_PRESENT, "output is missing"),
    }
}

/// Parse `output.writes`; absent means no writes
fn write_records(result: &ExecutionResult) -> Result<Vec<WriteRecord>, String> {
    let Some(writes) = result.output.as_ref().and_then(|o| o.get("writes")) else {
        return Ok(Vec::new());
    };
    let records: Vec<WriteRecord> =
        serde_json::from_value(writes.clone()).map_err(|e| format!("output.writes: {e}"))?;
    for (i, record) in records.iter().enumerate() {
        let hex_ok = record.sha256.len() == 64
            && record
                .sha256
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !hex_ok {
            return Err(format!("output.writes[{i}].sha256 is not a sha256 hex digest"));
        }
        if record.path.is_empty() {
            return Err(format!("output.writes[{i}].path is empty"));
        }
    }
    Ok(records)
}

fn verified(records: &[WriteRecord]) -> Finding {
    let mut problems = Vec::new();
    for record in records {
        match std::fs::read(&record.path) {
            Ok(data) => {
                if data.len() as u64 != record.bytes {
                    problems.push(format!("{}: {} bytes on disk, {} recorded", record.path, data.len(), record.bytes));
                } else if sha256_hex(&data) != record.sha256 {
                    problems.push(format!("{}: sha256 mismatch", record.path));
                }
            }
            Err(e) => problems.push(format!("{}: {e}", record.path)),
        }
    }
    if problems.is_empty() {
        Finding::pass(codes::WRITES_VERIFIED)
    } else {
        Finding::fail(codes::WRITES_VERIFIED, problems.join("; "))
    }
}

/// Lexical containment with an allowed extension
fn is_under(dir: &Path, path: &Path) -> bool {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    !escapes && path.starts_with(dir) && path != dir && has_allowed_extension(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_artifact::{ErrorDetail, EvaluationStatus};
    use replay_store::FsArtifactStore;

    fn evaluator(dir: &Path) -> Evaluator {
        let store = Arc::new(FsArtifactStore::open(dir.join("artifacts")).unwrap());
        let config = PipelineConfig::default()
            .with_artifacts_dir(dir.join("artifacts"))
            .with_generated_dir(dir.join("generated"));
        Evaluator::new(store, &config).unwrap()
    }

    fn success_with(output: Value) -> Value {
        let result = ExecutionResult::success(
            "engineer",
            CanonicalHash::compute(b"request"),
            "2026-01-01T00:00:00Z",
            output.as_object().cloned().unwrap_or_default(),
        );
        serde_json::to_value(result).unwrap()
    }

    fn finding<'a>(evaluation: &'a EvaluationResult, code: &str) -> &'a Finding {
        evaluation.findings.iter().find(|f| f.code == code).unwrap()
    }

    #[test]
    fn plain_success_passes() {
        let dir = tempfile::tempdir().unwrap();
        let evaluation = evaluator(dir.path()).evaluate(&success_with(json!({"answer": 42})));
        assert_eq!(evaluation.status, EvaluationStatus::Pass, "{evaluation:?}");
        assert_eq!(evaluation.agent_role, EVALUATOR_ROLE);
    }

    #[test]
    fn empty_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let evaluation = evaluator(dir.path()).evaluate(&success_with(json!({})));
        assert_eq!(evaluation.status, EvaluationStatus::Fail);
        assert!(!finding(&evaluation, codes::OUTPUT_PRESENT).passed);
    }

    #[test]
    fn error_result_fails_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let result = ExecutionResult::failure(
            "engineer",
            CanonicalHash::compute(b"request"),
            "now",
            ErrorDetail::new("AgentError", "boom"),
            Vec::new(),
        );
        let evaluation = evaluator(dir.path()).evaluate(&serde_json::to_value(result).unwrap());
        assert_eq!(evaluation.status, EvaluationStatus::Fail);
        let f = finding(&evaluation, codes::EXECUTION_SUCCEEDED);
        assert_eq!(f.detail.as_deref(), Some("AgentError: boom"));
    }

    #[test]
    fn schema_invalid_result_is_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let evaluation = evaluator(dir.path()).evaluate(&json!({"kind": "execution_result"}));
        assert_eq!(evaluation.status, EvaluationStatus::Error);
        assert!(!evaluation.errors.is_empty());
        assert_eq!(evaluation.findings.len(), 1);
    }

    #[test]
    fn verified_write_passes_and_tampering_fails() {
        let dir = tempfile::tempdir().unwrap();
        let generated = dir.path().join("generated");
        let record = crate::safe_write::safe_write_text(&generated, "a.md", "hello").unwrap();
        let evaluator = evaluator(dir.path());
        let result = success_with(json!({"writes": [record]}));

        let evaluation = evaluator.evaluate(&result);
        assert_eq!(evaluation.status, EvaluationStatus::Pass, "{evaluation:?}");

        std::fs::write(generated.join("a.md"), "tampered").unwrap();
        let evaluation = evaluator.evaluate(&result);
        assert!(!finding(&evaluation, codes::WRITES_VERIFIED).passed);
    }

    #[test]
    fn writes_outside_generated_dir_fail() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("elsewhere.md");
        std::fs::write(&outside, "x").unwrap();
        let record = WriteRecord {
            path: outside.to_string_lossy().into_owned(),
            sha256: sha256_hex(b"x"),
            bytes: 1,
        };
        let evaluation = evaluator(dir.path()).evaluate(&success_with(json!({"writes": [record]})));
        assert!(!finding(&evaluation, codes::WRITES_ALLOW_LISTED).passed);
        assert!(finding(&evaluation, codes::WRITES_VERIFIED).passed);
    }

    #[test]
    fn malformed_write_records_fail() {
        let dir = tempfile::tempdir().unwrap();
        let evaluation = evaluator(dir.path())
            .evaluate(&success_with(json!({"writes": [{"path": "x.md", "sha256": "zz", "bytes": 1}]})));
        assert!(!finding(&evaluation, codes::WRITE_RECORDS_WELL_FORMED).passed);
        assert!(evaluation.findings.iter().all(|f| f.code != codes::WRITES_VERIFIED));
    }

    #[test]
    fn evaluate_does_not_mutate_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = success_with(json!({"answer": 1}));
        let before = result.clone();
        let _ = evaluator(dir.path()).evaluate(&result);
        assert_eq!(result, before);
    }

    #[test]
    fn missing_last_result_fails_and_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = evaluator(dir.path());
        let outcome = evaluator.evaluate_last().unwrap();
        assert_eq!(outcome.evaluation.status, EvaluationStatus::Fail);
        assert_eq!(
            outcome.evaluation.findings,
            vec![Finding::fail(
                codes::EXECUTION_RESULT_PRESENT,
                "no execution result recorded"
            )]
        );
        let stored = evaluator
            .store
            .read_last(ArtifactKind::EvaluationResult)
            .unwrap()
            .unwrap();
        assert_eq!(stored, outcome.evaluation_value);
    }

    #[test]
    fn extra_fields_are_stored_without_changing_hash() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = evaluator(dir.path());
        let result = success_with(json!({"answer": 42}));

        let mut extra = Map::new();
        extra.insert("_replay".into(), json!({"matched": true}));
        let marked = evaluator.consume_with(&result, Some(&extra)).unwrap();
        let plain = evaluator.consume(&result).unwrap();

        assert_eq!(marked.evaluation_value["_replay"], json!({"matched": true}));
        assert!(plain.evaluation_value.get("_replay").is_none());
        assert_eq!(marked.evaluation_hash, plain.evaluation_hash);
        assert_eq!(marked.evaluation.status, EvaluationStatus::Pass);
    }

    #[test]
    fn disabling_verification_skips_file_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path().join("artifacts")).unwrap());
        let config = PipelineConfig::default()
            .with_generated_dir(dir.path().join("generated"))
            .with_verify_writes(false);
        let evaluator = Evaluator::new(store, &config).unwrap();
        let record = WriteRecord {
            path: dir.path().join("generated/gone.md").to_string_lossy().into_owned(),
            sha256: sha256_hex(b"x"),
            bytes: 1,
        };
        let evaluation = evaluator.evaluate(&success_with(json!({"writes": [record]})));
        assert_eq!(evaluation.status, EvaluationStatus::Pass, "{evaluation:?}");
    }
}
