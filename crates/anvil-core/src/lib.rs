//! # Anvil Core
//!
//! The dispatch engine of the Anvil bot framework.
//!
//! This crate provides everything between "an update arrived" and "a
//! handler ran": the bounded ingestion queue, the middleware pipeline,
//! routing, and the collaborators the built-in middleware depends on.
//!
//! ## Architecture
//!
//! Updates flow through three stages:
//!
//! ```text
//! ┌──────────┐     ┌────────────────────┐     ┌─────────────────────────┐
//! │  Source  │────▶│ BackpressureQueue  │────▶│  Pipeline (per worker)  │
//! │ (adapter)│     │  (bounded, MPMC)   │────▶│  boundary → ... → router│
//! └──────────┘     └────────────────────┘────▶│        → handler        │
//!                                             └─────────────────────────┘
//! ```
//!
//! - **Ingestion**: an [`UpdateSource`] pushes [`UpdateContext`]s through
//!   an [`UpdateSink`] into the [`BackpressureQueue`]. A full queue either
//!   suspends the producer or drops the update, per [`FullQueuePolicy`].
//! - **Pipeline**: each worker runs dequeued updates through the
//!   [`BuiltPipeline`](middleware::BuiltPipeline) — exception boundary,
//!   metrics, logging, dedup, rate limiting, command parsing, and finally
//!   the router.
//! - **Routing**: the [`HandlerRegistry`] picks a handler by command
//!   literal or text pattern, binds typed arguments via `clap`, and the
//!   router invokes it.
//!
//! Lifecycle (worker spawning, graceful drain, lost-update accounting)
//! lives in `anvil-runtime`; this crate is runtime-agnostic apart from
//! needing a tokio reactor for its background sweeps.
//!
//! ## Example
//!
//! ```rust,ignore
//! use anvil_core::prelude::*;
//! use std::sync::Arc;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(HandlerDescriptor::command(
//!     "echo",
//!     handler_fn("echo", |ctx: UpdateContext| async move {
//!         println!("{:?}", ctx.payload());
//!         Ok(())
//!     }),
//! ));
//!
//! let stats = StatsCollector::new();
//! let registry = Arc::new(registry);
//! let pipeline = Pipeline::new();
//! pipeline.add_fn(|_| Arc::new(ExceptionBoundary::new()) as _)?;
//! pipeline.add_fn(|_| Arc::new(CommandParseMiddleware::new()) as _)?;
//! {
//!     let stats = stats.clone();
//!     pipeline.add_fn(move |_| {
//!         Arc::new(RouterMiddleware::new(Arc::clone(&registry), stats.clone())) as _
//!     })?;
//! }
//! let built = pipeline.build(Arc::new(NoopTerminal))?;
//! ```

pub mod cache;
pub mod command;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod queue;
pub mod rate;
pub mod registry;
pub mod source;
pub mod state;
pub mod stats;
pub mod transport;
pub mod update;

pub use cache::TtlCache;
pub use command::{parse_command, shell_split, ParsedCommand};
pub use error::{
    BackendError, BackendResult, BoxError, DispatchError, DispatchResult, PipelineError,
    QueueError, QueueResult, SendError, SourceError,
};
pub use handler::{handler_fn, BoxedHandler, FnHandler, UpdateHandler};
pub use middleware::{
    BoxedMiddleware, BuiltPipeline, CommandParseMiddleware, DedupMiddleware, DedupMode,
    ExceptionBoundary, LoggingMiddleware, MetricsMiddleware, Middleware, MiddlewareFactory, Next,
    NoopTerminal, Pipeline, RateLimitBackend, RateLimitMiddleware, RateLimitMode,
    RateLimitSettings, RouterMiddleware, Terminal,
};
pub use queue::{BackpressureQueue, FullQueuePolicy};
pub use rate::{RateWindow, RateWindowStore};
pub use registry::{ArgBinder, HandlerDescriptor, HandlerFactory, HandlerRegistry, MatchRule};
pub use source::{UpdateSink, UpdateSource};
pub use state::{MemoryStateBackend, StateBackend};
pub use stats::{DropReason, HandlerSnapshot, Measurement, StatsCollector, StatsSnapshot};
pub use transport::TransportClient;
pub use update::{item_keys, ChatRef, Items, UpdateContext, UpdateScope, UserRef};

/// Prelude for common imports.
pub mod prelude {
    pub use super::error::{BoxError, DispatchError, DispatchResult};
    pub use super::handler::{handler_fn, BoxedHandler, UpdateHandler};
    pub use super::middleware::{
        BuiltPipeline, CommandParseMiddleware, ExceptionBoundary, Middleware, Next, NoopTerminal,
        Pipeline, RouterMiddleware, Terminal,
    };
    pub use super::queue::{BackpressureQueue, FullQueuePolicy};
    pub use super::registry::{HandlerDescriptor, HandlerRegistry};
    pub use super::stats::StatsCollector;
    pub use super::update::{item_keys, ChatRef, UpdateContext, UserRef};
}
