//! Configuration loading and validation for Stepwise.
//!
//! Loads loop defaults from `stepwise.toml` with environment variable
//! overrides. Every field has a default, so an empty or missing file is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `stepwise.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum model steps per run (0 = unlimited, discouraged)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Overall run timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,

    /// Per-step timeout in seconds (0 = none)
    #[serde(default)]
    pub step_timeout_secs: u64,

    /// Per-tool-handler timeout in seconds
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Execute approved tool calls of one step concurrently
    #[serde(default = "default_true")]
    pub parallel_tools: bool,

    /// Capacity of the event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Human approval settings
    #[serde(default)]
    pub approval: ApprovalConfig,
}

fn default_max_steps() -> usize {
    10
}
fn default_handler_timeout_secs() -> u64 {
    30
}
fn default_event_buffer() -> usize {
    128
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Tool names that need approval. Empty means every backend tool does
    /// (when an approver is configured at all).
    #[serde(default)]
    pub require_for: Vec<String>,

    /// How long a pending approval waits for a decision
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_approval_timeout_secs() -> u64 {
    300
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_for: Vec::new(),
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LoopConfig {
    /// Load configuration from the default path (`./stepwise.toml`).
    ///
    /// Environment variables take precedence over the file:
    /// - `STEPWISE_MAX_STEPS`
    /// - `STEPWISE_TIMEOUT_SECS`
    /// - `STEPWISE_PARALLEL_TOOLS`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The default config file location.
    pub fn default_path() -> PathBuf {
        PathBuf::from("stepwise.toml")
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`LoopConfig::load`]).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("STEPWISE_MAX_STEPS") {
            self.max_steps = parse_env("STEPWISE_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("STEPWISE_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("STEPWISE_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("STEPWISE_PARALLEL_TOOLS") {
            self.parallel_tools = parse_env("STEPWISE_PARALLEL_TOOLS", &raw)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handler_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "handler_timeout_secs must be > 0".into(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be > 0".into(),
            ));
        }

        if self.approval.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "approval.timeout_secs must be > 0".into(),
            ));
        }

        if self.max_steps == 0 {
            tracing::warn!("max_steps = 0 disables the step limit");
        }

        Ok(())
    }

    /// Overall run timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Per-step timeout, if any.
    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{raw}'")))
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout_secs: 0,
            step_timeout_secs: 0,
            handler_timeout_secs: default_handler_timeout_secs(),
            parallel_tools: true,
            event_buffer: default_event_buffer(),
            approval: ApprovalConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
