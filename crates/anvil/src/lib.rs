//! # Anvil
//!
//! A bounded, middleware-driven update dispatch engine for chat bots.
//!
//! ## Overview
//!
//! Anvil sits between an update source (long polling, webhooks, a message
//! broker) and your handlers. It buffers incoming updates in a bounded
//! queue, pushes each one through an ordered middleware pipeline, and
//! routes whatever survives to the matching handler.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌───────────────────┐    ┌─────────────────────────────────────────┐
//! │  Source  │───▶│ BackpressureQueue │───▶│ worker: boundary ▸ metrics ▸ logging ▸  │
//! │          │    │   (bounded)       │───▶│         dedup ▸ rate limit ▸ command ▸  │
//! └──────────┘    └───────────────────┘───▶│         router ──▶ handler              │
//!                                          └─────────────────────────────────────────┘
//! ```
//!
//! - **Source**: Pushes [`UpdateContext`]s into the engine via an `UpdateSink`
//! - **Queue**: Bounded; producers wait or drop when it is full
//! - **Pipeline**: Fixed-order middleware, each stage may stop an update
//! - **Router**: Matches command literals and regex patterns to handlers
//! - **Orchestrator**: Owns workers and the drain-on-shutdown sequence
//!
//! [`UpdateContext`]: anvil_core::update::UpdateContext
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use anvil::prelude::*;
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
//!     orchestrator.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `json-log`: Newline-delimited JSON log output

pub use anvil_core as core;
pub use anvil_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use anvil::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use anvil_runtime::config::load_config;
    pub use anvil_runtime::orchestrator::{Orchestrator, OrchestratorBuilder, Phase};

    // Handlers and routing
    pub use anvil_core::handler::{handler_fn, BoxedHandler, UpdateHandler};
    pub use anvil_core::registry::{HandlerDescriptor, HandlerRegistry, MatchRule};

    // Update model
    pub use anvil_core::update::{ChatRef, UpdateContext, UpdateScope, UserRef};

    // Sources and transports - for custom integrations
    pub use anvil_core::source::{UpdateSink, UpdateSource};
    pub use anvil_core::state::StateBackend;
    pub use anvil_core::transport::TransportClient;

    // Middleware - for custom pipeline stages
    pub use anvil_core::middleware::{Middleware, MiddlewareFactory, Next};

    // Stats
    pub use anvil_core::stats::{StatsCollector, StatsSnapshot};
}
