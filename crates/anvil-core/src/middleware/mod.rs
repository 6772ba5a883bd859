//! Middleware pipeline for update processing.
//!
//! A [`Pipeline`] is an ordered, immutable-once-built chain of middleware
//! factories. Each invocation of the built pipeline:
//!
//! 1. Creates one fresh [`UpdateScope`],
//! 2. Constructs every middleware from its factory against that scope,
//! 3. Threads the update through the chain in registration order,
//! 4. Invokes the terminal when the chain runs out.
//!
//! Middleware *instances* are therefore per-update; long-lived state (a
//! dedup cache, rate windows, the stats collector) is captured in the
//! factory closure and shared across updates, while anything resolved from
//! the scope is isolated to the one invocation.
//!
//! The default chain, outermost first: exception boundary, metrics,
//! logging, dedup, rate limit, command parsing, router.

mod boundary;
mod command;
mod dedup;
mod logging;
mod metrics;
mod rate_limit;
mod router;

pub use boundary::ExceptionBoundary;
pub use command::CommandParseMiddleware;
pub use dedup::{DedupMiddleware, DedupMode};
pub use logging::LoggingMiddleware;
pub use metrics::MetricsMiddleware;
pub use rate_limit::{RateLimitBackend, RateLimitMiddleware, RateLimitMode, RateLimitSettings};
pub use router::RouterMiddleware;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{DispatchResult, PipelineError};
use crate::update::{UpdateContext, UpdateScope};

/// One stage of the update pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes the update, deciding whether to invoke the rest of the
    /// chain via `next`.
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()>;
}

/// Type-erased middleware instance.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Constructs a middleware instance for one pipeline invocation.
pub type MiddlewareFactory = Arc<dyn Fn(&UpdateScope) -> BoxedMiddleware + Send + Sync>;

/// The stage invoked when the middleware chain runs out.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Consumes the update at the end of the chain.
    async fn call(&self, ctx: UpdateContext) -> DispatchResult<()>;
}

/// Terminal that does nothing. The router normally consumes updates
/// before the chain reaches this point.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTerminal;

#[async_trait]
impl Terminal for NoopTerminal {
    async fn call(&self, _ctx: UpdateContext) -> DispatchResult<()> {
        Ok(())
    }
}

/// Handle to the remainder of the chain for the current invocation.
pub struct Next<'a> {
    chain: &'a [BoxedMiddleware],
    terminal: &'a dyn Terminal,
}

impl Next<'_> {
    /// Invokes the next middleware, or the terminal if none remain.
    pub async fn run(self, ctx: UpdateContext) -> DispatchResult<()> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(
                    ctx,
                    Next {
                        chain: rest,
                        terminal: self.terminal,
                    },
                )
                .await
            }
            None => self.terminal.call(ctx).await,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Ordered middleware registration, frozen by [`build`](Self::build).
///
/// `add` is safe to call from multiple threads before the build; any call
/// after the build fails with [`PipelineError::Frozen`].
#[derive(Default)]
pub struct Pipeline {
    factories: Mutex<Vec<MiddlewareFactory>>,
    built: AtomicBool,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware factory to the chain.
    pub fn add(&self, factory: MiddlewareFactory) -> Result<(), PipelineError> {
        if self.built.load(Ordering::Acquire) {
            return Err(PipelineError::Frozen);
        }
        self.factories.lock().push(factory);
        Ok(())
    }

    /// Appends a factory closure to the chain.
    pub fn add_fn<F>(&self, factory: F) -> Result<(), PipelineError>
    where
        F: Fn(&UpdateScope) -> BoxedMiddleware + Send + Sync + 'static,
    {
        self.add(Arc::new(factory))
    }

    /// Number of registered middleware factories.
    pub fn len(&self) -> usize {
        self.factories.lock().len()
    }

    /// Returns `true` if no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.lock().is_empty()
    }

    /// Freezes the pipeline and composes it with the given terminal.
    ///
    /// Building twice is an error: the first build owns the chain.
    pub fn build(&self, terminal: Arc<dyn Terminal>) -> Result<BuiltPipeline, PipelineError> {
        if self.built.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::Frozen);
        }
        let factories: Arc<[MiddlewareFactory]> =
            self.factories.lock().clone().into();
        Ok(BuiltPipeline {
            factories,
            terminal,
        })
    }
}

/// The composed, immutable entry point produced by [`Pipeline::build`].
#[derive(Clone)]
pub struct BuiltPipeline {
    factories: Arc<[MiddlewareFactory]>,
    terminal: Arc<dyn Terminal>,
}

impl BuiltPipeline {
    /// Runs one update through the chain inside a fresh dependency scope.
    pub async fn invoke(&self, ctx: UpdateContext) -> DispatchResult<()> {
        let scope = Arc::new(UpdateScope::new());
        let chain: Vec<BoxedMiddleware> =
            self.factories.iter().map(|f| f(&scope)).collect();
        let ctx = ctx.with_scope(scope);
        Next {
            chain: &chain,
            terminal: self.terminal.as_ref(),
        }
        .run(ctx)
        .await
    }
}

impl std::fmt::Debug for BuiltPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltPipeline")
            .field("stages", &self.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{ChatRef, UserRef};
    use std::sync::atomic::AtomicUsize;

    fn ctx() -> UpdateContext {
        UpdateContext::new("test", "1", ChatRef(1), UserRef(1))
    }

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
            self.log.lock().push(self.label);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_middleware_runs_in_registration_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        for label in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            pipeline
                .add_fn(move |_scope| {
                    Arc::new(Tag {
                        label,
                        log: Arc::clone(&log),
                    }) as BoxedMiddleware
                })
                .unwrap();
        }

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        built.invoke(ctx()).await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_add_after_build_is_frozen() {
        let pipeline = Pipeline::new();
        let _built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        let err = pipeline
            .add_fn(|_scope| Arc::new(NoopMiddleware) as BoxedMiddleware)
            .unwrap_err();
        assert_eq!(err, PipelineError::Frozen);
    }

    #[tokio::test]
    async fn test_build_twice_is_frozen() {
        let pipeline = Pipeline::new();
        let _built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        assert!(pipeline.build(Arc::new(NoopTerminal)).is_err());
    }

    struct NoopMiddleware;

    #[async_trait]
    impl Middleware for NoopMiddleware {
        async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
            next.run(ctx).await
        }
    }

    struct ScopeProbe;

    #[async_trait]
    impl Middleware for ScopeProbe {
        async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
            // Each invocation sees its own scope; a counter placed there
            // never leaks across updates.
            let scope = ctx.scope().expect("pipeline attaches a scope");
            assert!(scope.get::<usize>().is_none());
            scope.insert(1usize);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_fresh_scope_per_invocation() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new();
        {
            let constructions = Arc::clone(&constructions);
            pipeline
                .add_fn(move |_scope| {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    Arc::new(ScopeProbe) as BoxedMiddleware
                })
                .unwrap();
        }

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        built.invoke(ctx()).await.unwrap();
        built.invoke(ctx()).await.unwrap();

        // The factory ran once per invocation.
        assert_eq!(constructions.load(Ordering::SeqCst), 2);
    }
}
