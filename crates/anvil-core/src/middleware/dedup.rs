//! Duplicate-update suppression.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{Middleware, Next};
use crate::cache::TtlCache;
use crate::error::DispatchResult;
use crate::state::StateBackend;
use crate::stats::{DropReason, StatsCollector};
use crate::update::UpdateContext;

/// Backend scope under which dedup markers are stored.
const DEDUP_SCOPE: &str = "dedup";

/// Where first-sighting markers live.
#[derive(Clone)]
pub enum DedupMode {
    /// Process-local TTL set. Correct for a single instance.
    Local(Arc<TtlCache<String>>),
    /// Shared state backend. Correct across replicas consuming the same
    /// update stream.
    Distributed(Arc<dyn StateBackend>),
}

/// Suppresses updates whose id was already seen within the TTL window.
///
/// The check is atomic insert-if-absent, so two replicas (or two workers)
/// racing on the same id admit exactly one. Duplicates are counted in the
/// stats and logged at `debug`, then dropped without touching the rest of
/// the chain. A duplicate is not an error.
pub struct DedupMiddleware {
    mode: DedupMode,
    ttl: Duration,
    stats: StatsCollector,
}

impl DedupMiddleware {
    /// Creates a dedup stage with a process-local TTL set.
    pub fn local(ttl: Duration, stats: StatsCollector) -> Self {
        Self {
            mode: DedupMode::Local(Arc::new(TtlCache::new(ttl))),
            ttl,
            stats,
        }
    }

    /// Creates a dedup stage backed by shared state.
    pub fn distributed(backend: Arc<dyn StateBackend>, ttl: Duration, stats: StatsCollector) -> Self {
        Self {
            mode: DedupMode::Distributed(backend),
            ttl,
            stats,
        }
    }

    /// Creates a dedup stage from an explicit mode. The local cache in
    /// [`DedupMode::Local`] must have been built with the same TTL.
    pub fn new(mode: DedupMode, ttl: Duration, stats: StatsCollector) -> Self {
        Self { mode, ttl, stats }
    }

    async fn first_sighting(&self, update_id: &str) -> DispatchResult<bool> {
        match &self.mode {
            DedupMode::Local(cache) => Ok(cache.try_add(update_id.to_string())),
            DedupMode::Distributed(backend) => Ok(backend
                .set_if_absent(DEDUP_SCOPE, update_id, json!(true), Some(self.ttl))
                .await?),
        }
    }
}

#[async_trait]
impl Middleware for DedupMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        if self.first_sighting(ctx.update_id()).await? {
            return next.run(ctx).await;
        }

        debug!(update_id = %ctx.update_id(), "duplicate update suppressed");
        self.stats.record_dropped(DropReason::Dedup);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{BoxedMiddleware, Pipeline, Terminal};
    use crate::state::MemoryStateBackend;
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

    fn ctx(id: &str) -> UpdateContext {
        UpdateContext::new("test", id, ChatRef(1), UserRef(1))
    }

    fn dedup_pipeline(middleware: Arc<DedupMiddleware>) -> (crate::middleware::BuiltPipeline, Arc<AtomicUsize>) {
        let reached = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new();
        pipeline
            .add_fn(move |_| Arc::clone(&middleware) as BoxedMiddleware)
            .unwrap();
        let built = pipeline
            .build(Arc::new(CountingTerminal(Arc::clone(&reached))))
            .unwrap();
        (built, reached)
    }

    #[tokio::test]
    async fn test_duplicate_within_ttl_is_dropped() {
        let stats = StatsCollector::new();
        let middleware = Arc::new(DedupMiddleware::local(
            Duration::from_secs(60),
            stats.clone(),
        ));
        let (built, reached) = dedup_pipeline(middleware);

        built.invoke(ctx("a")).await.unwrap();
        built.invoke(ctx("a")).await.unwrap();
        built.invoke(ctx("b")).await.unwrap();

        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().dropped_dedup, 1);
    }

    #[tokio::test]
    async fn test_same_id_passes_again_after_ttl() {
        let stats = StatsCollector::new();
        let middleware = Arc::new(DedupMiddleware::local(
            Duration::from_millis(100),
            stats.clone(),
        ));
        let (built, reached) = dedup_pipeline(middleware);

        built.invoke(ctx("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        built.invoke(ctx("a")).await.unwrap();

        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().dropped_dedup, 0);
    }

    #[tokio::test]
    async fn test_distributed_mode_shares_markers() {
        let backend = Arc::new(MemoryStateBackend::new());
        let stats = StatsCollector::new();
        // Two middleware instances over the same backend model two replicas.
        let first = Arc::new(DedupMiddleware::distributed(
            Arc::clone(&backend) as Arc<dyn StateBackend>,
            Duration::from_secs(60),
            stats.clone(),
        ));
        let second = Arc::new(DedupMiddleware::distributed(
            backend as Arc<dyn StateBackend>,
            Duration::from_secs(60),
            stats.clone(),
        ));

        let (built_a, reached_a) = dedup_pipeline(first);
        let (built_b, reached_b) = dedup_pipeline(second);

        built_a.invoke(ctx("a")).await.unwrap();
        built_b.invoke(ctx("a")).await.unwrap();

        assert_eq!(reached_a.load(Ordering::SeqCst) + reached_b.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().dropped_dedup, 1);
    }
}
