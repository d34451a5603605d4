//! Configuration types for Palaver.
//!
//! `PalaverConfig` is the top-level `config.toml`: session TTL window, cache
//! sweep cadence, and completion endpoint settings. All fields have defaults
//! so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalaverConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

impl Default for PalaverConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

/// Session cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding TTL window in seconds; every write resets all of a session's
    /// cache keys to this.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the in-memory cache sweeps for expired keys, milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// The TTL window as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of the completion API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Hard timeout for a completion call, seconds.
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_completion_timeout_secs() -> u64 {
    30
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    /// The completion timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
