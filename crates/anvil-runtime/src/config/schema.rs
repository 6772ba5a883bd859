//! Configuration schema definitions.

use std::collections::HashMap;
use std::time::Duration;

use anvil_core::middleware::{RateLimitMode, RateLimitSettings};
use anvil_core::queue::FullQueuePolicy;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnvilConfig {
    /// Dispatch engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Duplicate-update suppression settings.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Rate limiting settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Engine
// =============================================================================

/// Dispatch engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent pipeline workers.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Queue capacity as a multiple of `parallelism`.
    #[serde(default = "default_queue_multiplier")]
    pub queue_multiplier: usize,

    /// What happens when the queue is at capacity.
    #[serde(default)]
    pub full_queue_policy: FullQueuePolicy,

    /// How long workers may keep draining after a stop request, in
    /// milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            queue_multiplier: default_queue_multiplier(),
            full_queue_policy: FullQueuePolicy::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Derived queue capacity.
    pub fn queue_capacity(&self) -> usize {
        (self.parallelism * self.queue_multiplier).max(1)
    }

    /// Drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_parallelism() -> usize {
    4
}

fn default_queue_multiplier() -> usize {
    8
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

// =============================================================================
// Dedup
// =============================================================================

/// Duplicate-update suppression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Whether the dedup stage is part of the default pipeline.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How long an update id stays remembered, in milliseconds.
    #[serde(default = "default_dedup_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_ms: default_dedup_ttl_ms(),
        }
    }
}

impl DedupConfig {
    /// TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_dedup_ttl_ms() -> u64 {
    60_000
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Updates allowed per user per window. `None` disables the check.
    #[serde(default)]
    pub per_user: Option<u32>,

    /// Updates allowed per chat per window. `None` disables the check.
    #[serde(default)]
    pub per_chat: Option<u32>,

    /// Window length in milliseconds.
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,

    /// Hard (silent drop) or soft (warn then drop) enforcement.
    #[serde(default)]
    pub mode: RateLimitMode,

    /// Warning text sent in soft mode.
    #[serde(default = "default_warn_text")]
    pub warn_text: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_user: None,
            per_chat: None,
            window_ms: default_rate_window_ms(),
            mode: RateLimitMode::default(),
            warn_text: default_warn_text(),
        }
    }
}

impl RateLimitConfig {
    /// Returns `true` when at least one limit is configured.
    pub fn is_active(&self) -> bool {
        self.per_user.is_some() || self.per_chat.is_some()
    }

    /// Converts to the middleware's settings type.
    pub fn to_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            per_user: self.per_user,
            per_chat: self.per_chat,
            window: Duration::from_millis(self.window_ms),
            mode: self.mode,
            warn_text: self.warn_text.clone(),
        }
    }
}

fn default_rate_window_ms() -> u64 {
    60_000
}

fn default_warn_text() -> String {
    "You are sending messages too fast. Please slow down.".to_string()
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Include thread IDs in log output.
    #[serde(default)]
    pub thread_ids: bool,

    /// Per-module level overrides, e.g. `anvil_core = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// The level as a lowercase directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line compact output.
    #[default]
    Compact,
    /// Default `tracing` formatting.
    Full,
    /// Multi-line human-friendly output.
    Pretty,
    /// Newline-delimited JSON (requires the `json-log` feature).
    #[cfg(feature = "json-log")]
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = AnvilConfig::default();
        assert_eq!(config.engine.parallelism, 4);
        assert_eq!(config.engine.queue_capacity(), 32);
        assert_eq!(config.engine.drain_timeout(), Duration::from_secs(5));
        assert!(config.dedup.enabled);
        assert_eq!(config.dedup.ttl(), Duration::from_secs(60));
        assert!(!config.rate_limit.is_active());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_rate_limit_settings_conversion() {
        let config = RateLimitConfig {
            per_user: Some(5),
            per_chat: Some(30),
            window_ms: 30_000,
            mode: RateLimitMode::Soft,
            warn_text: "easy there".to_string(),
        };
        let settings = config.to_settings();
        assert_eq!(settings.per_user, Some(5));
        assert_eq!(settings.per_chat, Some(30));
        assert_eq!(settings.window, Duration::from_secs(30));
        assert_eq!(settings.mode, RateLimitMode::Soft);
        assert_eq!(settings.warn_text, "easy there");
    }
}
