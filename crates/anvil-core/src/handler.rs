//! Handler trait and function-handler adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::update::UpdateContext;

/// Type-erased handler shared across the registry.
pub type BoxedHandler = Arc<dyn UpdateHandler>;

/// Processes one matched update.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Stable name used for stats measurements and log fields.
    fn name(&self) -> &str;

    /// Handles the update. Errors are recorded against this handler and
    /// logged; they never affect other in-flight updates.
    async fn handle(&self, ctx: UpdateContext) -> Result<(), BoxError>;
}

/// Wraps an async function as an [`UpdateHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

/// Creates a named handler from an async function.
///
/// # Example
///
/// ```rust,ignore
/// let echo = handler_fn("echo", |ctx: UpdateContext| async move {
///     println!("{:?}", ctx.text());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<FnHandler<F>>
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        func,
    })
}

#[async_trait]
impl<F, Fut> UpdateHandler for FnHandler<F>
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: UpdateContext) -> Result<(), BoxError> {
        (self.func)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{ChatRef, UserRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let handler = handler_fn("count", move |_ctx| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), crate::error::BoxError>(())
            }
        });

        let ctx = UpdateContext::new("test", "1", ChatRef(1), UserRef(1));
        handler.handle(ctx).await.unwrap();
        assert_eq!(handler.name(), "count");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
