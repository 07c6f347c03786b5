//! Subcommand handlers
//!
//! Each handler prints one JSON document on stdout and returns the process
//! exit code.

use anyhow::{Context, Result};
use clap::ArgMatches;
use replay_artifact::{schema_document, ArtifactKind, CanonicalHash, SchemaId, SchemaValidator};
use replay_core::{Pipeline, PipelineConfig, PipelineRun, ReplaySelector};
use replay_store::{ArtifactStore, FsArtifactStore};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Build the pipeline configuration from `--config` and flag overrides
pub(crate) fn load_config(matches: &ArgMatches) -> Result<PipelineConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = matches.get_one::<PathBuf>("artifacts-dir") {
        config = config.with_artifacts_dir(dir);
    }
    if let Some(secs) = matches.get_one::<u64>("timeout-secs") {
        config = config.with_agent_timeout_secs(*secs);
    }
    Ok(config)
}

pub(crate) async fn dispatch(matches: &ArgMatches) -> Result<i32> {
    let config = load_config(matches)?;
    match matches.subcommand() {
        Some(("submit", args)) => {
            let path = args
                .get_one::<PathBuf>("request")
                .context("--request is required")?;
            let raw = read_json(path)?;
            let run = open(config)?.submit(&raw).await?;
            emit(&run_summary(&run))
        }
        Some(("consume", _)) => {
            let run = open(config)?.consume_last().await?;
            emit(&run_summary(&run))
        }
        Some(("evaluate", _)) => {
            let outcome = open(config)?.evaluate_last()?;
            emit(&json!({
                "result_hash": outcome.result_hash,
                "evaluation_hash": outcome.evaluation_hash,
                "evaluation_status": outcome.evaluation.status,
                "findings": outcome.evaluation.findings,
            }))
        }
        Some(("replay", args)) => {
            let selector = selector(args)?;
            let report = open(config)?
                .replay(&selector)
                .await
                .with_context(|| format!("replay of {selector} failed"))?;
            emit(&serde_json::to_value(&report)?)?;
            Ok(i32::from(!report.matched))
        }
        Some(("history", args)) => {
            let kind = kind_arg(args, "kind")?.context("kind is required")?;
            emit(&history_summary(&config.artifacts_dir, kind)?)
        }
        Some(("schema", args)) => {
            let id: SchemaId = args
                .get_one::<String>("id")
                .context("schema id is required")?
                .parse()?;
            emit(&schema_document(id))
        }
        Some(("hash", args)) => {
            let path = args.get_one::<PathBuf>("file").context("--file is required")?;
            let kind = kind_arg(args, "kind")?;
            emit(&hash_file(path, &config, kind)?)
        }
        Some((other, _)) => anyhow::bail!("unknown command: {other}"),
        None => anyhow::bail!("no command given"),
    }
}

fn open(config: PipelineConfig) -> Result<Pipeline> {
    let dir = config.artifacts_dir.clone();
    Pipeline::open(config).with_context(|| format!("failed to open pipeline at {}", dir.display()))
}

fn emit(value: &Value) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(0)
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn kind_arg(args: &ArgMatches, name: &str) -> Result<Option<ArtifactKind>> {
    args.get_one::<String>(name)
        .map(|s| s.parse::<ArtifactKind>())
        .transpose()
        .map_err(Into::into)
}

/// Replay selector from `--task-id`, `--request-hash` or `--index`; latest otherwise
pub(crate) fn selector(args: &ArgMatches) -> Result<ReplaySelector> {
    if let Some(task_id) = args.get_one::<String>("task-id") {
        return Ok(ReplaySelector::TaskId(task_id.clone()));
    }
    if let Some(hash) = args.get_one::<String>("request-hash") {
        let hash: CanonicalHash = hash
            .parse()
            .with_context(|| format!("invalid request hash '{hash}'"))?;
        return Ok(ReplaySelector::RequestHash(hash));
    }
    if let Some(index) = args.get_one::<usize>("index") {
        return Ok(ReplaySelector::Index(*index));
    }
    Ok(ReplaySelector::Latest)
}

pub(crate) fn run_summary(run: &PipelineRun) -> Value {
    let result = &run.execution.result;
    json!({
        "request_hash": run.execution.request_hash,
        "result_hash": run.execution.result_hash,
        "result_status": result.status,
        "agent_role": result.agent_role,
        "error": result.error,
        "evaluation_status": run.evaluation.evaluation.status,
    })
}

pub(crate) fn history_summary(artifacts_dir: &Path, kind: ArtifactKind) -> Result<Value> {
    let store = FsArtifactStore::open(artifacts_dir)
        .with_context(|| format!("failed to open store at {}", artifacts_dir.display()))?;
    let snapshot = store.read_history(kind)?.read_all();
    Ok(json!({
        "kind": kind,
        "records": snapshot.entries.len(),
        "skipped": snapshot.skipped,
    }))
}

pub(crate) fn hash_file(path: &Path, config: &PipelineConfig, kind: Option<ArtifactKind>) -> Result<Value> {
    let value = read_json(path)?;
    let hash = config.canonicalizer()?.hash(&value);
    let mut out = json!({ "hash": hash });
    if let Some(kind) = kind {
        let report = SchemaValidator::new().validate(kind.schema(), &value);
        out["validation"] = serde_json::to_value(report)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli;
    use pretty_assertions::assert_eq;

    fn sub(args: &[&str]) -> ArgMatches {
        let matches = cli::build().try_get_matches_from(args.iter().copied()).unwrap();
        matches.subcommand().unwrap().1.clone()
    }

    #[test]
    fn selector_defaults_to_latest() {
        assert_eq!(selector(&sub(&["replayctl", "replay"])).unwrap(), ReplaySelector::Latest);
        assert_eq!(
            selector(&sub(&["replayctl", "replay", "--index", "2"])).unwrap(),
            ReplaySelector::Index(2)
        );
    }

    #[test]
    fn selector_rejects_bad_hash() {
        assert!(selector(&sub(&["replayctl", "replay", "--request-hash", "xyz"])).is_err());
    }

    #[test]
    fn flags_override_config() {
        let matches = cli::build()
            .try_get_matches_from(["replayctl", "--timeout-secs", "7", "--artifacts-dir", "/x", "consume"])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.agent_timeout_secs, 7);
        assert_eq!(config.artifacts_dir, PathBuf::from("/x"));
    }

    #[test]
    fn hash_ignores_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, r#"{"task_id":"T-1","created_at":"2026-01-01","payload":{"task_snapshot":{}}}"#).unwrap();
        std::fs::write(&b, r#"{"payload":{"task_snapshot":{}},"task_id":"T-1"}"#).unwrap();

        let config = PipelineConfig::default();
        let ha = hash_file(&a, &config, Some(ArtifactKind::ExecutionRequest)).unwrap();
        let hb = hash_file(&b, &config, None).unwrap();
        assert_eq!(ha["hash"], hb["hash"]);
        assert_eq!(ha["validation"], json!({"valid": true}));
        assert!(hb.get("validation").is_none());
    }

    #[test]
    fn history_counts_records_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("execution_requests.ndjson"),
            "{\"task_id\":\"T-1\"}\nbroken\n{\"task_id\":\"T-2\"}\n",
        )
        .unwrap();
        let summary = history_summary(dir.path(), ArtifactKind::ExecutionRequest).unwrap();
        assert_eq!(
            summary,
            json!({"kind": "execution_request", "records": 2, "skipped": 1})
        );
    }

    #[tokio::test]
    async fn submit_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let request = dir.path().join("request.json");
        std::fs::write(
            &request,
            r#"{"task_id":"T-1","payload":{"task_snapshot":{"content":"hi"}}}"#,
        )
        .unwrap();
        let artifacts = dir.path().join("artifacts");
        let artifacts = artifacts.to_str().unwrap();
        let request = request.to_str().unwrap();

        let submit = cli::build()
            .try_get_matches_from(["replayctl", "--artifacts-dir", artifacts, "submit", "--request", request])
            .unwrap();
        assert_eq!(dispatch(&submit).await.unwrap(), 0);

        let replay = cli::build()
            .try_get_matches_from(["replayctl", "--artifacts-dir", artifacts, "replay", "--task-id", "T-1"])
            .unwrap();
        assert_eq!(dispatch(&replay).await.unwrap(), 0);
    }
}
