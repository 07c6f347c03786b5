//! Agent collaborator seam
//!
//! The executor treats an agent as an opaque async function from an
//! [`AgentInvocation`] to an output object. Agents are looked up by role
//! in an [`AgentRegistry`].

use crate::error::AgentError;
use async_trait::async_trait;
use replay_artifact::{CanonicalHash, ExecutionRequest};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an agent may read
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInvocation {
    /// Correlation key of the request
    pub task_id: String,
    /// Hash binding the eventual result to the request
    pub request_hash: CanonicalHash,
    /// Roles named by the request, in order
    pub agent_sequence: Vec<String>,
    /// Caller snapshot, read-only
    pub task_snapshot: Map<String, Value>,
}

impl AgentInvocation {
    /// Invocation for a validated request
    #[must_use]
    pub fn from_request(request: &ExecutionRequest, request_hash: CanonicalHash) -> Self {
        Self {
            task_id: request.task_id.clone(),
            request_hash,
            agent_sequence: request.payload.agent_sequence.clone(),
            task_snapshot: request.payload.task_snapshot.clone(),
        }
    }

    /// String field of the snapshot, `None` if absent or blank
    #[must_use]
    pub fn snapshot_str(&self, key: &str) -> Option<&str> {
        self.task_snapshot
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// External agent collaborator
///
/// Replay determinism holds only for agents whose output is a function of
/// the invocation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Role this agent answers to
    fn role(&self) -> &str;

    /// Produce an output object for the invocation
    async fn execute(&self, invocation: &AgentInvocation) -> Result<Map<String, Value>, AgentError>;
}

/// Agents keyed by role
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its role, replacing any previous one
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let role = agent.role().to_string();
        if self.agents.insert(role.clone(), agent).is_some() {
            tracing::debug!(%role, "agent replaced");
        }
    }

    /// With agent registered
    #[inline]
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Look up agent for `role`
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownRole`] if nothing is registered.
    pub fn get(&self, role: &str) -> Result<Arc<dyn Agent>, AgentError> {
        self.agents
            .get(role)
            .cloned()
            .ok_or_else(|| AgentError::UnknownRole(role.to_string()))
    }

    /// Check if `role` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.agents.contains_key(role)
    }

    /// Registered roles, sorted
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }

    /// Number of registered agents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if no agents are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(&'static str);

    #[async_trait]
    impl Agent for Fixed {
        fn role(&self) -> &str {
            self.0
        }

        async fn execute(&self, _: &AgentInvocation) -> Result<Map<String, Value>, AgentError> {
            let mut out = Map::new();
            out.insert("role".into(), json!(self.0));
            Ok(out)
        }
    }

    #[test]
    fn lookup_by_role() {
        let registry = AgentRegistry::new()
            .with_agent(Arc::new(Fixed("engineer")))
            .with_agent(Arc::new(Fixed("planner")));
        assert_eq!(registry.roles(), vec!["engineer", "planner"]);
        assert!(registry.get("engineer").is_ok());
        assert_eq!(
            registry.get("pm").err(),
            Some(AgentError::UnknownRole("pm".into()))
        );
    }

    #[test]
    fn register_replaces_same_role() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Fixed("engineer")));
        registry.register(Arc::new(Fixed("engineer")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_str_ignores_blank_values() {
        let mut snapshot = Map::new();
        snapshot.insert("content".into(), json!("  "));
        snapshot.insert("filename".into(), json!("a.md"));
        snapshot.insert("count".into(), json!(3));
        let invocation = AgentInvocation {
            task_id: "T-1".into(),
            request_hash: CanonicalHash::compute(b"r"),
            agent_sequence: Vec::new(),
            task_snapshot: snapshot,
        };
        assert_eq!(invocation.snapshot_str("content"), None);
        assert_eq!(invocation.snapshot_str("filename"), Some("a.md"));
        assert_eq!(invocation.snapshot_str("count"), None);
    }

    #[tokio::test]
    async fn agents_are_callable_through_registry() {
        let registry = AgentRegistry::new().with_agent(Arc::new(Fixed("engineer")));
        let invocation = AgentInvocation {
            task_id: "T-1".into(),
            request_hash: CanonicalHash::compute(b"r"),
            agent_sequence: vec!["engineer".into()],
            task_snapshot: Map::new(),
        };
        let out = registry
            .get("engineer")
            .unwrap()
            .execute(&invocation)
            .await
            .unwrap();
        assert_eq!(out["role"], json!("engineer"));
    }
}
