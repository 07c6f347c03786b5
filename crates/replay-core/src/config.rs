//! Pipeline configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! artifacts_dir = "artifacts"
//! agent_timeout_secs = 60
//! allow_list = ["created_at", "_meta.*", "_replay.*"]
//! ```

use crate::error::ConfigError;
use replay_artifact::{AllowList, Canonicalizer, DEFAULT_ALLOW_LIST};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for one agent call
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;

/// Role used when a request names no agent sequence
pub const DEFAULT_AGENT_ROLE: &str = "engineer";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding last slots and histories
    pub artifacts_dir: PathBuf,
    /// Allow-listed output directory for agent writes
    ///
    /// Defaults to `<artifacts_dir>/generated`.
    pub generated_dir: Option<PathBuf>,
    /// Agent deadline in seconds, `0` disables it
    pub agent_timeout_secs: u64,
    /// Role executed when `agent_sequence` is empty
    pub default_agent_role: String,
    /// Field paths excluded from canonical hashing
    pub allow_list: Vec<String>,
    /// Recorded in result `_meta`
    pub consumer_version: String,
    /// Recorded in evaluation `_meta`
    pub evaluator_version: String,
    /// Re-hash written files during evaluation
    pub verify_writes: bool,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With artifacts directory
    #[inline]
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    /// With explicit generated-output directory
    #[inline]
    #[must_use]
    pub fn with_generated_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.generated_dir = Some(dir.into());
        self
    }

    /// With agent timeout, `0` disables it
    #[inline]
    #[must_use]
    pub fn with_agent_timeout_secs(mut self, secs: u64) -> Self {
        self.agent_timeout_secs = secs;
        self
    }

    /// With default agent role
    #[inline]
    #[must_use]
    pub fn with_default_agent_role(mut self, role: impl Into<String>) -> Self {
        self.default_agent_role = role.into();
        self
    }

    /// With allow-list patterns
    #[inline]
    #[must_use]
    pub fn with_allow_list<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list = paths.into_iter().map(Into::into).collect();
        self
    }

    /// With write verification toggled
    #[inline]
    #[must_use]
    pub fn with_verify_writes(mut self, verify: bool) -> Self {
        self.verify_writes = verify;
        self
    }

    /// Resolved generated-output directory
    #[must_use]
    pub fn generated_dir(&self) -> PathBuf {
        self.generated_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join("generated"))
    }

    /// Agent deadline, `None` when disabled
    #[inline]
    #[must_use]
    pub fn agent_timeout(&self) -> Option<Duration> {
        (self.agent_timeout_secs > 0).then(|| Duration::from_secs(self.agent_timeout_secs))
    }

    /// Canonicalizer for the configured allow-list
    ///
    /// # Errors
    ///
    /// Returns error if an allow-list entry is malformed.
    pub fn canonicalizer(&self) -> Result<Canonicalizer, ConfigError> {
        Ok(Canonicalizer::new(AllowList::parse(&self.allow_list)?))
    }

    /// Check field consistency
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_agent_role.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultRole);
        }
        AllowList::parse(&self.allow_list)?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            generated_dir: None,
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            default_agent_role: DEFAULT_AGENT_ROLE.to_string(),
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|p| (*p).to_string()).collect(),
            consumer_version: concat!("replay-executor/", env!("CARGO_PKG_VERSION")).to_string(),
            evaluator_version: concat!("replay-evaluator/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn toml_overrides_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            artifacts_dir = "/var/replay"
            agent_timeout_secs = 0
            allow_list = ["created_at"]
            "#,
        )
        .unwrap();
        assert_eq!(config.artifacts_dir, PathBuf::from("/var/replay"));
        assert_eq!(config.generated_dir(), PathBuf::from("/var/replay/generated"));
        assert_eq!(config.agent_timeout(), None);
        assert_eq!(config.allow_list, vec!["created_at".to_string()]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("artifact_dir = \"x\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn bad_allow_list_is_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("allow_list = [\"a..b\"]"),
            Err(ConfigError::AllowList(_))
        ));
    }

    #[test]
    fn empty_role_is_rejected() {
        let config = PipelineConfig::new().with_default_agent_role(" ");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDefaultRole)));
    }

    #[test]
    fn default_timeout_is_five_minutes() {
        assert_eq!(
            PipelineConfig::default().agent_timeout(),
            Some(Duration::from_secs(300))
        );
    }
}
