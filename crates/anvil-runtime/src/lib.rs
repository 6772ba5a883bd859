//! Anvil Runtime - Orchestration layer for the Anvil dispatch engine.
//!
//! This crate provides:
//! - Engine lifecycle orchestration ([`Orchestrator`])
//! - Layered configuration (TOML files + `ANVIL_*` environment variables)
//! - Logging configuration
//!
//! The core dispatch types (queue, pipeline, middleware, registry) live in
//! `anvil-core`; this crate wires them together into a running engine.
//!
//! ```ignore
//! use anvil_core::handler::handler_fn;
//! use anvil_core::registry::HandlerDescriptor;
//! use anvil_runtime::{load_config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!
//!     let orchestrator = Orchestrator::builder()
//!         .config(config)
//!         .register(HandlerDescriptor::command(
//!             "ping",
//!             handler_fn("ping", |_ctx| async { Ok(()) }),
//!         ))
//!         .source(my_source)
//!         .build();
//!
//!     // Run until Ctrl+C / SIGTERM
//!     orchestrator.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;

// Re-exports
pub use config::{
    load_config, load_config_from_file, AnvilConfig, ConfigLoader, DedupConfig, EngineConfig,
    LoggingConfig, Profile, RateLimitConfig,
};
pub use error::{ConfigError, ConfigResult, OrchestratorError, OrchestratorResult};
pub use logging::LoggingBuilder;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, Phase};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the runtime entry points plus the commonly used logging
/// macros: `trace!`, `debug!`, `info!`, `warn!`, `error!`.
pub mod prelude {
    pub use crate::config::{load_config, AnvilConfig};
    pub use crate::orchestrator::{Orchestrator, Phase};
    pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};
}
