//! Testing utilities for the replay workspace
//!
//! Shared fixtures: sample requests, scripted agents and pipelines over a
//! temporary directory.

#![allow(missing_docs)]

use async_trait::async_trait;
use replay_core::{Agent, AgentError, AgentInvocation, AgentRegistry, Pipeline, PipelineConfig};
use replay_store::FsArtifactStore;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Request the built-in note agent can complete
pub fn sample_request(task_id: &str) -> Value {
    json!({
        "kind": "execution_request",
        "task_id": task_id,
        "title": "Write a note",
        "created_at": "2026-01-01T00:00:00Z",
        "payload": {
            "agent_sequence": ["pm", "planner", "engineer"],
            "task_snapshot": {"content": format!("note for {task_id}\n")}
        }
    })
}

/// `{task_id, payload: {task_snapshot: {desc: "noop"}}}` with a timestamp
pub fn noop_request(task_id: &str, created_at: &str) -> Value {
    json!({
        "task_id": task_id,
        "created_at": created_at,
        "payload": {"task_snapshot": {"desc": "noop"}}
    })
}

/// Deterministic agent that echoes its snapshot and counts calls
#[derive(Debug, Default)]
pub struct EchoAgent {
    role: Option<String>,
    calls: AtomicUsize,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn role(&self) -> &str {
        self.role.as_deref().unwrap_or("engineer")
    }

    async fn execute(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = Map::new();
        out.insert("task_id".into(), json!(invocation.task_id));
        out.insert("echo".into(), Value::Object(invocation.task_snapshot.clone()));
        Ok(out)
    }
}

/// Agent that always fails
#[derive(Debug)]
pub struct FailingAgent(pub String);

#[async_trait]
impl Agent for FailingAgent {
    fn role(&self) -> &str {
        "engineer"
    }

    async fn execute(&self, _: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        Err(AgentError::Failed(self.0.clone()))
    }
}

/// Agent whose output changes on every call
#[derive(Debug, Default)]
pub struct DriftingAgent {
    counter: AtomicUsize,
}

#[async_trait]
impl Agent for DriftingAgent {
    fn role(&self) -> &str {
        "engineer"
    }

    async fn execute(&self, _: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut out = Map::new();
        out.insert("run".into(), json!(n));
        Ok(out)
    }
}

/// Agent that sleeps before answering
#[derive(Debug)]
pub struct SlowAgent(pub Duration);

#[async_trait]
impl Agent for SlowAgent {
    fn role(&self) -> &str {
        "engineer"
    }

    async fn execute(&self, _: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        tokio::time::sleep(self.0).await;
        let mut out = Map::new();
        out.insert("slept".into(), json!(true));
        Ok(out)
    }
}

/// Agent that blocks until released, for holding the executor busy
#[derive(Debug, Default)]
pub struct GatedAgent {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a call is in flight
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the in-flight call finish
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for GatedAgent {
    fn role(&self) -> &str {
        "engineer"
    }

    async fn execute(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        let mut out = Map::new();
        out.insert("task_id".into(), json!(invocation.task_id));
        Ok(out)
    }
}

/// Pipeline over a temporary directory; the directory lives as long as this
pub struct TestPipeline {
    pub dir: TempDir,
    pub pipeline: Pipeline,
}

impl TestPipeline {
    pub fn store(&self) -> &Arc<dyn replay_store::ArtifactStore> {
        self.pipeline.store()
    }
}

/// Config rooted in `dir`
pub fn test_config(dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig::new()
        .with_artifacts_dir(dir.join("artifacts"))
        .with_generated_dir(dir.join("generated"))
}

/// Pipeline with one agent
pub fn pipeline_with(agent: Arc<dyn Agent>) -> TestPipeline {
    pipeline_with_config(agent, |config| config)
}

/// Pipeline with one agent and an adjusted config
pub fn pipeline_with_config(
    agent: Arc<dyn Agent>,
    adjust: impl FnOnce(PipelineConfig) -> PipelineConfig,
) -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();
    let config = adjust(test_config(dir.path()));
    let store = Arc::new(FsArtifactStore::open(&config.artifacts_dir).unwrap());
    let pipeline = Pipeline::new(config, store, AgentRegistry::new().with_agent(agent)).unwrap();
    TestPipeline { dir, pipeline }
}

/// Pipeline with the built-in note agent
pub fn note_pipeline() -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::open(test_config(dir.path())).unwrap();
    TestPipeline { dir, pipeline }
}
