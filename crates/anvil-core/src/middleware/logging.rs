//! Structured logging around update processing.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::error::DispatchResult;
use crate::update::{item_keys, UpdateContext};

/// Logs receipt and outcome of every update.
///
/// The handler name is read from the item bag *after* the inner chain
/// returns, so the entry reflects whatever the router actually selected.
/// Handler errors are logged here with their handler name and elapsed time
/// and then re-raised for the boundary; cancellation passes through
/// silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Creates the middleware.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        let update_id = ctx.update_id().to_string();
        let chat = ctx.chat();
        let user = ctx.user();
        let items = ctx.items_handle();

        debug!(update_id = %update_id, chat = %chat, user = %user, "processing update");
        let start = Instant::now();

        let result = next.run(ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let handler: Option<String> = items.get(item_keys::HANDLER);

        match &result {
            Ok(()) => {
                debug!(
                    update_id = %update_id,
                    handler = handler.as_deref().unwrap_or("-"),
                    elapsed_ms,
                    "update processed"
                );
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                warn!(
                    update_id = %update_id,
                    handler = handler.as_deref().unwrap_or("-"),
                    elapsed_ms,
                    error = %err,
                    "update failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::middleware::{BoxedMiddleware, NoopTerminal, Pipeline};
    use crate::update::{ChatRef, UserRef};
    use std::sync::Arc;

    struct Failing;

    #[async_trait]
    impl Middleware for Failing {
        async fn handle(&self, _ctx: UpdateContext, _next: Next<'_>) -> DispatchResult<()> {
            Err(DispatchError::handler("boom", "deliberate".into()))
        }
    }

    #[tokio::test]
    async fn test_errors_are_reraised_after_logging() {
        let pipeline = Pipeline::new();
        pipeline
            .add_fn(|_| Arc::new(LoggingMiddleware) as BoxedMiddleware)
            .unwrap();
        pipeline.add_fn(|_| Arc::new(Failing) as BoxedMiddleware).unwrap();

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        let ctx = UpdateContext::new("test", "1", ChatRef(1), UserRef(1));
        let err = built.invoke(ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
    }
}
