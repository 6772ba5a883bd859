//! Outermost exception boundary.

use async_trait::async_trait;
use tracing::error;

use super::{Middleware, Next};
use crate::error::DispatchResult;
use crate::update::UpdateContext;

/// Catches every error escaping the inner chain so one poisoned update can
/// never take down a worker.
///
/// Cancellation is swallowed silently; any other error is logged at
/// `error` level with the update id and discarded. This middleware never
/// returns `Err`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionBoundary;

impl ExceptionBoundary {
    /// Creates the boundary.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for ExceptionBoundary {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        let update_id = ctx.update_id().to_string();
        let transport = ctx.transport().to_string();

        match next.run(ctx).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => {
                error!(
                    update_id = %update_id,
                    transport = %transport,
                    error = %err,
                    "update processing failed"
                );
                Ok(())
            }
        }
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

    struct Cancelling;

    #[async_trait]
    impl Middleware for Cancelling {
        async fn handle(&self, _ctx: UpdateContext, _next: Next<'_>) -> DispatchResult<()> {
            Err(DispatchError::Cancelled)
        }
    }

    fn ctx() -> UpdateContext {
        UpdateContext::new("test", "1", ChatRef(1), UserRef(1))
    }

    #[tokio::test]
    async fn test_boundary_swallows_handler_errors() {
        let pipeline = Pipeline::new();
        pipeline
            .add_fn(|_| Arc::new(ExceptionBoundary) as BoxedMiddleware)
            .unwrap();
        pipeline.add_fn(|_| Arc::new(Failing) as BoxedMiddleware).unwrap();

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        assert!(built.invoke(ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_boundary_swallows_cancellation() {
        let pipeline = Pipeline::new();
        pipeline
            .add_fn(|_| Arc::new(ExceptionBoundary) as BoxedMiddleware)
            .unwrap();
        pipeline
            .add_fn(|_| Arc::new(Cancelling) as BoxedMiddleware)
            .unwrap();

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        assert!(built.invoke(ctx()).await.is_ok());
    }
}
