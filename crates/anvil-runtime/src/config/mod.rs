//! Configuration module for the anvil runtime.
//!
//! Provides layered TOML + environment configuration for the dispatch
//! engine, dedup, rate limiting, and logging.

pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_file, ConfigLoader, Profile};
pub use schema::{
    AnvilConfig, DedupConfig, EngineConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    RateLimitConfig,
};
