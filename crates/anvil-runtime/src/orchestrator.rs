//! Engine lifecycle orchestration.
//!
//! The [`Orchestrator`] owns everything with a lifetime: the bounded
//! queue, the worker pool, the source task, and the shutdown sequence.
//! It moves through four phases:
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──▶ Draining ──▶ Stopped
//! ```
//!
//! `start` assembles the default pipeline (exception boundary, metrics,
//! logging, dedup, rate limit, command parsing, router), spawns
//! `parallelism` workers over the shared queue, and hands the source an
//! [`UpdateSink`]. `stop` closes the queue, lets workers drain buffered
//! updates within the drain timeout, then fires the abort token and
//! forcibly aborts any worker that ignores it; whatever is still buffered
//! is accounted as lost.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use anvil_runtime::Orchestrator;
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(config)
//!     .registry(registry)
//!     .source(my_source)
//!     .build();
//!
//! orchestrator.run().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::signal;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use anvil_core::middleware::{
    BoxedMiddleware, BuiltPipeline, CommandParseMiddleware, DedupMiddleware, ExceptionBoundary,
    LoggingMiddleware, MetricsMiddleware, MiddlewareFactory, NoopTerminal, Pipeline,
    RateLimitMiddleware, RouterMiddleware,
};
use anvil_core::queue::BackpressureQueue;
use anvil_core::registry::HandlerRegistry;
use anvil_core::source::{UpdateSink, UpdateSource};
use anvil_core::state::StateBackend;
use anvil_core::stats::{StatsCollector, StatsSnapshot};
use anvil_core::transport::TransportClient;
use anvil_core::update::UpdateContext;
use tokio_util::sync::CancellationToken;

use crate::config::AnvilConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging;

/// Environment variable overriding the configured drain timeout, read at
/// stop time.
pub const DRAIN_TIMEOUT_ENV: &str = "ANVIL_DRAIN_TIMEOUT_MS";

/// How long workers get to observe the abort token before their tasks are
/// forcibly aborted.
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built but not started.
    Idle,
    /// Workers and source are live.
    Running,
    /// Stop requested; workers are consuming the remaining buffer.
    Draining,
    /// Fully shut down. Terminal.
    Stopped,
}

/// Owns the queue, the worker pool, and the shutdown sequence.
pub struct Orchestrator {
    config: AnvilConfig,
    registry: Arc<HandlerRegistry>,
    source: Arc<dyn UpdateSource>,
    transport: Option<Arc<dyn TransportClient>>,
    backend: Option<Arc<dyn StateBackend>>,
    extra_middleware: Vec<MiddlewareFactory>,
    stats: StatsCollector,
    queue: Arc<BackpressureQueue<UpdateContext>>,
    /// Fired only when the drain timeout expires; carried by every update
    /// so in-flight handlers can observe the abort.
    abort: CancellationToken,
    phase: Mutex<Phase>,
    workers: Mutex<Option<JoinSet<()>>>,
    source_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Creates an orchestrator builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// The shared statistics collector.
    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Point-in-time statistics snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Starts the worker pool and the update source.
    ///
    /// Fails with [`OrchestratorError::AlreadyStarted`] outside the `Idle`
    /// phase; the orchestrator is single-use.
    pub async fn start(&self) -> OrchestratorResult<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Idle {
                return Err(OrchestratorError::AlreadyStarted);
            }
            *phase = Phase::Running;
        }

        let pipeline = self.build_pipeline()?;

        let parallelism = self.config.engine.parallelism;
        let mut workers = JoinSet::new();
        for worker_id in 0..parallelism {
            let queue = Arc::clone(&self.queue);
            let pipeline = pipeline.clone();
            let stats = self.stats.clone();
            let abort = self.abort.clone();
            workers.spawn(async move {
                loop {
                    match queue.recv(&abort).await {
                        Ok(Some(update)) => {
                            stats.set_queue_depth(queue.len());
                            // The boundary swallows everything except
                            // cancellation, which needs no handling here.
                            let _ = pipeline.invoke(update).await;
                        }
                        Ok(None) => {
                            debug!(worker_id, "queue exhausted, worker exiting");
                            break;
                        }
                        Err(_) => {
                            debug!(worker_id, "worker aborted");
                            break;
                        }
                    }
                }
            });
        }
        *self.workers.lock() = Some(workers);

        let sink = UpdateSink::new(
            Arc::clone(&self.queue),
            self.stats.clone(),
            self.abort.clone(),
        );
        let source = Arc::clone(&self.source);
        let abort = self.abort.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = source.start(sink, abort).await {
                error!(error = %e, "update source failed");
            }
        });
        *self.source_task.lock() = Some(handle);

        info!(
            parallelism,
            queue_capacity = self.queue.capacity(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Stops the source, drains the queue, and accounts lost updates.
    ///
    /// Returns the number of updates still buffered when the drain ended.
    /// The drain timeout comes from the configuration unless
    /// [`DRAIN_TIMEOUT_ENV`] overrides it.
    pub async fn stop(&self) -> OrchestratorResult<u64> {
        self.stop_with(&CancellationToken::new()).await
    }

    /// Like [`stop`](Self::stop), but the caller's token can cut the drain
    /// short: when it fires, in-flight work is cancelled as if the drain
    /// timeout had expired.
    pub async fn stop_with(&self, cancel: &CancellationToken) -> OrchestratorResult<u64> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Running {
                return Err(OrchestratorError::NotRunning);
            }
            *phase = Phase::Draining;
        }
        info!("orchestrator draining");

        if let Err(e) = self.source.stop().await {
            warn!(error = %e, "update source failed to stop cleanly");
        }

        // No new items after this point; workers run the buffer dry and
        // observe `None`.
        self.queue.complete();

        let drain = self.drain_timeout();
        let mut workers = self
            .workers
            .lock()
            .take()
            .ok_or(OrchestratorError::NotRunning)?;

        let drained = tokio::select! {
            joined = timeout(drain, async {
                while workers.join_next().await.is_some() {}
            }) => joined.is_ok(),
            _ = cancel.cancelled() => false,
        };

        if !drained {
            warn!(
                timeout_ms = drain.as_millis() as u64,
                "updates still in flight after drain, cancelling workers"
            );
            self.abort.cancel();
            // Handlers that watch the token exit within the grace window;
            // anything still running after that is forcibly aborted.
            let yielded = timeout(ABORT_GRACE, async {
                while workers.join_next().await.is_some() {}
            })
            .await
            .is_ok();
            if !yielded {
                workers.abort_all();
                while workers.join_next().await.is_some() {}
            }
        }

        if let Some(handle) = self.source_task.lock().take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let lost = self.queue.drain().len() as u64;
        if lost > 0 {
            self.stats.record_lost(lost);
            warn!(lost, "updates lost at shutdown");
        }
        self.stats.set_queue_depth(0);

        *self.phase.lock() = Phase::Stopped;
        info!(lost, "orchestrator stopped");
        Ok(lost)
    }

    /// Runs until a shutdown signal (Ctrl+C or SIGTERM) is received.
    pub async fn run(&self) -> OrchestratorResult<u64> {
        logging::init_from_config(&self.config.logging);
        self.start().await?;

        info!("anvil is now running. Press Ctrl+C to stop.");
        Self::wait_for_shutdown().await;

        self.stop().await
    }

    /// Runs until the given future resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> OrchestratorResult<u64>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    /// Waits for shutdown signals (Ctrl+C or SIGTERM).
    async fn wait_for_shutdown() {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM handler");

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C, shutting down");
        }
    }

    fn drain_timeout(&self) -> Duration {
        std::env::var(DRAIN_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.engine.drain_timeout())
    }

    /// Assembles the default pipeline in its fixed order, with any custom
    /// stages between command parsing and the router.
    fn build_pipeline(&self) -> OrchestratorResult<BuiltPipeline> {
        let pipeline = Pipeline::new();

        pipeline.add_fn(|_| Arc::new(ExceptionBoundary::new()) as BoxedMiddleware)?;
        {
            let stats = self.stats.clone();
            pipeline
                .add_fn(move |_| Arc::new(MetricsMiddleware::new(stats.clone())) as BoxedMiddleware)?;
        }
        pipeline.add_fn(|_| Arc::new(LoggingMiddleware::new()) as BoxedMiddleware)?;

        if self.config.dedup.enabled {
            let ttl = self.config.dedup.ttl();
            let dedup = Arc::new(match &self.backend {
                Some(backend) => {
                    DedupMiddleware::distributed(Arc::clone(backend), ttl, self.stats.clone())
                }
                None => DedupMiddleware::local(ttl, self.stats.clone()),
            });
            pipeline.add_fn(move |_| Arc::clone(&dedup) as BoxedMiddleware)?;
        }

        if self.config.rate_limit.is_active() {
            let settings = self.config.rate_limit.to_settings();
            let transport = self.transport.clone();
            let rate_limit = Arc::new(match &self.backend {
                Some(backend) => RateLimitMiddleware::distributed(
                    settings,
                    Arc::clone(backend),
                    transport,
                    self.stats.clone(),
                ),
                None => RateLimitMiddleware::local(settings, transport, self.stats.clone()),
            });
            pipeline.add_fn(move |_| Arc::clone(&rate_limit) as BoxedMiddleware)?;
        }

        pipeline.add_fn(|_| Arc::new(CommandParseMiddleware::new()) as BoxedMiddleware)?;

        for factory in &self.extra_middleware {
            pipeline.add(Arc::clone(factory))?;
        }

        {
            let registry = Arc::clone(&self.registry);
            let stats = self.stats.clone();
            pipeline.add_fn(move |_| {
                Arc::new(RouterMiddleware::new(Arc::clone(&registry), stats.clone()))
                    as BoxedMiddleware
            })?;
        }

        Ok(pipeline.build(Arc::new(NoopTerminal))?)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// OrchestratorBuilder
// =============================================================================

/// Builder for an [`Orchestrator`].
///
/// A source is mandatory; everything else has a default. Without a state
/// backend the dedup and rate-limit stages run process-locally.
pub struct OrchestratorBuilder {
    config: AnvilConfig,
    registry: HandlerRegistry,
    source: Option<Arc<dyn UpdateSource>>,
    transport: Option<Arc<dyn TransportClient>>,
    backend: Option<Arc<dyn StateBackend>>,
    extra_middleware: Vec<MiddlewareFactory>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    /// Creates a builder with default configuration and an empty registry.
    pub fn new() -> Self {
        Self {
            config: AnvilConfig::default(),
            registry: HandlerRegistry::new(),
            source: None,
            transport: None,
            backend: None,
            extra_middleware: Vec::new(),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: AnvilConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the handler registry.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one handler descriptor.
    pub fn register(mut self, descriptor: anvil_core::registry::HandlerDescriptor) -> Self {
        self.registry.register(descriptor);
        self
    }

    /// Sets the fallback handler for unmatched updates.
    pub fn fallback(mut self, handler: anvil_core::handler::BoxedHandler) -> Self {
        self.registry.set_fallback(handler);
        self
    }

    /// Sets the update source (required).
    pub fn source(mut self, source: Arc<dyn UpdateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the outbound transport used for soft rate-limit warnings.
    pub fn transport(mut self, transport: Arc<dyn TransportClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a shared state backend, switching dedup and rate limiting to
    /// their distributed modes.
    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Appends a custom middleware stage, placed between command parsing
    /// and the router.
    pub fn middleware(mut self, factory: MiddlewareFactory) -> Self {
        self.extra_middleware.push(factory);
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Panics
    ///
    /// Panics if no source was provided.
    pub fn build(self) -> Orchestrator {
        let source = self.source.expect("an update source is required");
        let queue = Arc::new(BackpressureQueue::new(
            self.config.engine.queue_capacity(),
            self.config.engine.full_queue_policy,
        ));

        Orchestrator {
            config: self.config,
            registry: Arc::new(self.registry),
            source,
            transport: self.transport,
            backend: self.backend,
            extra_middleware: self.extra_middleware,
            stats: StatsCollector::new(),
            queue,
            abort: CancellationToken::new(),
            phase: Mutex::new(Phase::Idle),
            workers: Mutex::new(None),
            source_task: Mutex::new(None),
        }
    }
}
