use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Top-level Strand configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrandConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Engine-wide execution defaults. Passed to `Flow::initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to steps that declare none (0 = no timeout).
    #[serde(default)]
    pub default_step_timeout_secs: u64,
    /// Concurrency bound for parallel steps that declare none (0 = one worker per sub-step).
    #[serde(default)]
    pub default_max_concurrency: usize,
    /// Reject dependency names that resolve in more than one registry.
    #[serde(default)]
    pub strict_dependencies: bool,
    /// Backoff between step retries.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Capacity of the flow event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: 0,
            default_max_concurrency: 0,
            strict_dependencies: false,
            retry: RetryConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn default_step_timeout(&self) -> Option<Duration> {
        (self.default_step_timeout_secs > 0)
            .then(|| Duration::from_secs(self.default_step_timeout_secs))
    }

    pub fn default_max_concurrency(&self) -> Option<usize> {
        (self.default_max_concurrency > 0).then_some(self.default_max_concurrency)
    }
}

fn default_event_capacity() -> usize { 256 }

/// Retry backoff configuration for step attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 10_000 }

/// Logging configuration for the binary's subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Include module targets in log lines.
    #[serde(default)]
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            with_target: false,
        }
    }
}

fn default_log_filter() -> String { "strand=info,warn".to_string() }

impl StrandConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StrandError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| StrandError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let retry = &self.engine.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(StrandError::Config(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                retry.initial_backoff_ms, retry.max_backoff_ms
            )));
        }
        if self.engine.event_capacity == 0 {
            return Err(StrandError::Config("engine.event_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
