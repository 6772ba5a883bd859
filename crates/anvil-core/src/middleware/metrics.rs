//! Whole-pipeline latency accounting.

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::error::DispatchResult;
use crate::stats::StatsCollector;
use crate::update::UpdateContext;

/// Reserved snapshot entry holding end-to-end pipeline latency.
pub const PIPELINE_ENTRY: &str = "pipeline";

/// Measures end-to-end latency of every update, matched or not.
///
/// Recorded under the reserved [`PIPELINE_ENTRY`] name alongside the
/// per-handler figures the router records. Errors propagate untouched
/// after being counted.
pub struct MetricsMiddleware {
    stats: StatsCollector,
}

impl MetricsMiddleware {
    /// Creates the middleware against the shared collector.
    pub fn new(stats: StatsCollector) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        let measurement = self.stats.begin(PIPELINE_ENTRY);
        match next.run(ctx).await {
            Ok(()) => {
                measurement.complete();
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                // Shutdown is not a failure; drop the half-finished sample.
                drop(measurement);
                Err(err)
            }
            Err(err) => {
                measurement.error();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{BoxedMiddleware, NoopTerminal, Pipeline};
    use crate::update::{ChatRef, UserRef};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_pipeline_latency_per_update() {
        let stats = StatsCollector::new();
        let pipeline = Pipeline::new();
        {
            let stats = stats.clone();
            pipeline
                .add_fn(move |_| Arc::new(MetricsMiddleware::new(stats.clone())) as BoxedMiddleware)
                .unwrap();
        }

        let built = pipeline.build(Arc::new(NoopTerminal)).unwrap();
        for id in 0..3 {
            let ctx = UpdateContext::new("test", id.to_string(), ChatRef(1), UserRef(1));
            built.invoke(ctx).await.unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.handlers[PIPELINE_ENTRY].requests, 3);
        assert_eq!(snap.handlers[PIPELINE_ENTRY].errors, 0);
    }
}
