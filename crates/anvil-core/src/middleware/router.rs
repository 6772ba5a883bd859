//! Routing stage: matches updates to handlers and invokes them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{Middleware, Next};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::BoxedHandler;
use crate::registry::HandlerRegistry;
use crate::stats::StatsCollector;
use crate::update::{item_keys, UpdateContext, UpdateScope};

/// Matches each update against the registry and invokes the winner.
///
/// A matched handler is the endpoint: the rest of the chain is not
/// invoked. When nothing matches, the fallback handler runs if one is
/// configured; otherwise the update continues to the terminal untouched.
/// Handler failures surface as [`DispatchError::Handler`] after being
/// recorded, leaving the error logging to the outer stages.
pub struct RouterMiddleware {
    registry: Arc<HandlerRegistry>,
    stats: StatsCollector,
}

impl RouterMiddleware {
    /// Creates the router over a frozen registry.
    pub fn new(registry: Arc<HandlerRegistry>, stats: StatsCollector) -> Self {
        Self { registry, stats }
    }

    async fn invoke(&self, handler: BoxedHandler, ctx: UpdateContext) -> DispatchResult<()> {
        let name = handler.name().to_string();
        ctx.items().set(item_keys::HANDLER, name.clone());

        let measurement = self.stats.begin(&name);
        match handler.handle(ctx).await {
            Ok(()) => {
                measurement.complete();
                Ok(())
            }
            Err(source) => {
                measurement.error();
                Err(DispatchError::handler(name, source))
            }
        }
    }
}

#[async_trait]
impl Middleware for RouterMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        if let Some(descriptor) = self.registry.find_for(&ctx) {
            trace!(
                update_id = %ctx.update_id(),
                handler = %descriptor.name(),
                "update matched"
            );
            let scope = match ctx.scope() {
                Some(scope) => Arc::clone(scope),
                None => Arc::new(UpdateScope::new()),
            };
            let handler = descriptor.resolve(&scope);
            return self.invoke(handler, ctx).await;
        }

        if let Some(fallback) = self.registry.fallback() {
            trace!(update_id = %ctx.update_id(), "no match, invoking fallback");
            return self.invoke(Arc::clone(fallback), ctx).await;
        }

        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::handler_fn;
    use crate::middleware::{BoxedMiddleware, Pipeline, Terminal};
    use crate::registry::HandlerDescriptor;
    use crate::update::{ChatRef, UserRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTerminal(Arc<AtomicUsize>);

    #[async_trait]
    impl Terminal for CountingTerminal {
        async fn call(&self, _ctx: UpdateContext) -> DispatchResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx() -> UpdateContext {
        UpdateContext::new("test", "1", ChatRef(1), UserRef(1))
    }

    fn router_pipeline(
        registry: HandlerRegistry,
        stats: StatsCollector,
    ) -> (crate::middleware::BuiltPipeline, Arc<AtomicUsize>) {
        let registry = Arc::new(registry);
        let reached_terminal = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new();
        {
            let stats = stats.clone();
            pipeline
                .add_fn(move |_| {
                    Arc::new(RouterMiddleware::new(Arc::clone(&registry), stats.clone()))
                        as BoxedMiddleware
                })
                .unwrap();
        }
        let built = pipeline
            .build(Arc::new(CountingTerminal(Arc::clone(&reached_terminal))))
            .unwrap();
        (built, reached_terminal)
    }

    #[tokio::test]
    async fn test_matched_handler_is_the_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let handler = handler_fn("hello", move |_ctx| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });

        let mut registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::command("hello", handler));

        let stats = StatsCollector::new();
        let (built, reached_terminal) = router_pipeline(registry, stats.clone());

        built.invoke(ctx().with_command("hello")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reached_terminal.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().handlers["hello"].requests, 1);
    }

    #[tokio::test]
    async fn test_no_match_without_fallback_reaches_terminal() {
        let stats = StatsCollector::new();
        let (built, reached_terminal) = router_pipeline(HandlerRegistry::new(), stats);

        built.invoke(ctx().with_text("nothing matches")).await.unwrap();
        assert_eq!(reached_terminal.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_runs_when_nothing_matches() {
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&fallback_calls);
        let fallback = handler_fn("fallback", move |_ctx| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });

        let mut registry = HandlerRegistry::new();
        registry.set_fallback(fallback);

        let stats = StatsCollector::new();
        let (built, reached_terminal) = router_pipeline(registry, stats.clone());

        built.invoke(ctx().with_text("anything")).await.unwrap();

        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(reached_terminal.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().handlers["fallback"].requests, 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_named_and_recorded() {
        let failing = handler_fn("broken", |_ctx| async {
            Err::<(), BoxError>("kaput".into())
        });

        let mut registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::command("go", failing));

        let stats = StatsCollector::new();
        let (built, _) = router_pipeline(registry, stats.clone());

        let err = built.invoke(ctx().with_command("go")).await.unwrap_err();
        match err {
            DispatchError::Handler { handler, .. } => assert_eq!(handler, "broken"),
            other => panic!("unexpected error: {other}"),
        }

        let snap = stats.snapshot();
        assert_eq!(snap.handlers["broken"].requests, 1);
        assert_eq!(snap.handlers["broken"].errors, 1);
    }

    #[tokio::test]
    async fn test_handler_name_lands_in_item_bag() {
        let handler = handler_fn("echo", |_ctx| async { Ok::<(), BoxError>(()) });
        let mut registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::command("echo", handler));

        let (built, _) = router_pipeline(registry, StatsCollector::new());

        let update = ctx().with_command("echo");
        let items = update.items_handle();
        built.invoke(update).await.unwrap();
        assert_eq!(
            items.get::<String>(item_keys::HANDLER).as_deref(),
            Some("echo")
        );
    }
}
