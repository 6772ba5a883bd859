//! Command-parsing stage.

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::command::parse_command;
use crate::error::DispatchResult;
use crate::update::UpdateContext;

/// Default command prefix.
pub const DEFAULT_PREFIX: char = '/';

/// Annotates command updates with their parsed token, payload, and
/// argument list.
///
/// Pure pass-through: every update continues down the chain whether or
/// not it carried a command, and parsing never fails.
#[derive(Debug, Clone, Copy)]
pub struct CommandParseMiddleware {
    prefix: char,
}

impl Default for CommandParseMiddleware {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX,
        }
    }
}

impl CommandParseMiddleware {
    /// Creates the stage with the default `/` prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the stage with a custom prefix.
    pub fn with_prefix(prefix: char) -> Self {
        Self { prefix }
    }
}

#[async_trait]
impl Middleware for CommandParseMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        let parsed = ctx.text().and_then(|text| parse_command(text, self.prefix));

        let ctx = match parsed {
            Some(parsed) => {
                let ctx = ctx.with_command(parsed.command).with_args(parsed.args);
                match parsed.payload {
                    Some(payload) => ctx.with_payload(payload),
                    None => ctx,
                }
            }
            None => ctx,
        };

        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{BoxedMiddleware, Pipeline, Terminal};
    use crate::update::{ChatRef, UserRef};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Capture {
        seen: Arc<Mutex<Vec<UpdateContext>>>,
    }

    #[async_trait]
    impl Terminal for Capture {
        async fn call(&self, ctx: UpdateContext) -> DispatchResult<()> {
            self.seen.lock().push(ctx);
            Ok(())
        }
    }

    fn ctx(text: &str) -> UpdateContext {
        UpdateContext::new("test", "1", ChatRef(1), UserRef(1)).with_text(text)
    }

    async fn run(text: &str) -> UpdateContext {
        let seen: Arc<Mutex<Vec<UpdateContext>>> = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline
            .add_fn(|_| Arc::new(CommandParseMiddleware::new()) as BoxedMiddleware)
            .unwrap();
        let built = pipeline
            .build(Arc::new(Capture {
                seen: Arc::clone(&seen),
            }))
            .unwrap();
        built.invoke(ctx(text)).await.unwrap();
        let mut seen = seen.lock();
        seen.pop().unwrap()
    }

    #[tokio::test]
    async fn test_command_update_is_annotated() {
        let out = run(r#"/greet "big world" now"#).await;
        assert_eq!(out.command(), Some("greet"));
        assert_eq!(out.args().unwrap(), &["big world", "now"]);
        assert_eq!(out.payload(), Some(r#""big world" now"#));
    }

    #[tokio::test]
    async fn test_plain_text_passes_through_unannotated() {
        let out = run("just chatting").await;
        assert_eq!(out.command(), None);
        assert_eq!(out.args(), None);
        assert_eq!(out.text(), Some("just chatting"));
    }
}
