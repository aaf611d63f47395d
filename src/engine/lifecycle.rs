//! Lifecycle coordinator: startup order, the listen loop, drain and cleanup.
//!
//! Phases run `Starting -> Listening -> Draining -> Cleanup -> Stopped`.
//! Startup connects the store before any worker exists. Shutdown stops
//! listening, drains the pool, then reclaims every tracked scratch
//! resource, even when a second interrupt cuts the drain short.

use crate::config;
use crate::engine::ingest::Ingestor;
use crate::engine::inflight::Inflight;
use crate::engine::pool::{DrainOutcome, WorkerPool};
use crate::error::{Error, Result};
use crate::feed::FeedClient;
use crate::filter::Filter;
use crate::processor::BuildProcessor;
use crate::queue::BoundedDispatchQueue;
use crate::resources::{CleanupReport, ResourceTracker};
use crate::telemetry::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Lifecycle phase of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Listening,
    Draining,
    Cleanup,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Starting => "starting",
            Phase::Listening => "listening",
            Phase::Draining => "draining",
            Phase::Cleanup => "cleanup",
            Phase::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Settings for a coordinator run.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub topic: String,
    /// Upper bound on the drain wait. `None` waits for every build.
    pub drain_timeout: Option<Duration>,
    /// Delay before resubscribing after a transient feed error.
    pub resubscribe_delay: Duration,
    /// How often drain progress is logged.
    pub progress_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            workers: config::default_workers(),
            queue_capacity: config::DEFAULT_QUEUE_CAPACITY,
            topic: config::DEFAULT_TOPIC.to_string(),
            drain_timeout: None,
            resubscribe_delay: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// All inflight builds finished.
    Graceful,
    /// The drain timeout elapsed first.
    TimedOut { remaining: usize },
    /// A second interrupt arrived during the drain.
    Forced,
}

/// Report returned once the coordinator reaches [`Phase::Stopped`].
#[derive(Debug)]
pub struct Shutdown {
    pub kind: ShutdownKind,
    pub cleanup: CleanupReport,
    /// Set when listening ended on a non-transient feed error.
    pub feed_error: Option<Error>,
}

impl Shutdown {
    /// Process exit status: 0 only for a graceful, error-free shutdown.
    pub fn exit_code(&self) -> i32 {
        match (self.kind, &self.feed_error) {
            (ShutdownKind::Graceful, None) => 0,
            _ => 1,
        }
    }
}

/// Interrupt notifications, one message per Ctrl-C.
pub type Interrupts = mpsc::Receiver<()>;

/// Owns the shared structures and drives the phases.
pub struct Coordinator {
    config: LifecycleConfig,
    queue: Arc<BoundedDispatchQueue>,
    inflight: Arc<Inflight>,
    resources: Arc<ResourceTracker>,
    ingestor: Ingestor,
    pool: WorkerPool,
    phase: watch::Sender<Phase>,
}

impl Coordinator {
    /// Run the startup phase.
    ///
    /// `connect` establishes the store connection and builds the processor.
    /// If it fails nothing else is started and the error is returned.
    pub async fn start<F, Fut>(
        config: LifecycleConfig,
        filter: Filter,
        resources: Arc<ResourceTracker>,
        connect: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn BuildProcessor>>>,
    {
        let (phase, _) = watch::channel(Phase::Starting);
        info!(phase = %Phase::Starting, "connecting to store");

        let processor = connect().await.inspect_err(|e| {
            error!(error = %e, "startup failed, no workers started");
        })?;

        let queue = Arc::new(BoundedDispatchQueue::new(config.queue_capacity));
        let inflight = Arc::new(Inflight::new());
        let pool = WorkerPool::start(
            config.workers,
            Arc::clone(&queue),
            Arc::clone(&inflight),
            processor,
        );
        let ingestor = Ingestor::new(Arc::new(filter), Arc::clone(&queue), Arc::clone(&inflight));

        Ok(Self {
            config,
            queue,
            inflight,
            resources,
            ingestor,
            pool,
            phase,
        })
    }

    /// Like [`start`](Self::start), but gives up when an interrupt arrives
    /// before the connect step finishes. Returns `Ok(None)` in that case;
    /// nothing has been started.
    pub async fn start_or_interrupt<F, Fut>(
        config: LifecycleConfig,
        filter: Filter,
        resources: Arc<ResourceTracker>,
        connect: F,
        interrupts: &mut Interrupts,
    ) -> Result<Option<Self>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn BuildProcessor>>>,
    {
        tokio::select! {
            started = Self::start(config, filter, resources, connect) => started.map(Some),
            Some(()) = interrupts.recv() => {
                warn!("interrupted during startup");
                Ok(None)
            }
        }
    }

    /// Watch phase changes.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn inflight(&self) -> usize {
        self.inflight.current()
    }

    pub fn queue(&self) -> &BoundedDispatchQueue {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    fn enter(&self, phase: Phase) {
        info!(%phase, "lifecycle phase");
        self.phase.send_replace(phase);
    }

    /// Listen until interrupted, then drain and clean up.
    pub async fn run(self, feed: Arc<dyn FeedClient>, mut interrupts: Interrupts) -> Shutdown {
        self.enter(Phase::Listening);

        let feed_error = tokio::select! {
            err = self.listen(feed.as_ref()) => {
                error!(error = %err, "feed failed, shutting down");
                Some(err)
            }
            Some(()) = interrupts.recv() => None,
        };

        self.enter(Phase::Draining);
        info!(
            inflight = self.inflight.current(),
            "waiting for workers to finish, interrupt again to exit now"
        );
        let kind = self.drain(&mut interrupts).await;

        self.enter(Phase::Cleanup);
        let cleanup = self.resources.cleanup().await;

        self.enter(Phase::Stopped);
        Shutdown {
            kind,
            cleanup,
            feed_error,
        }
    }

    /// Subscribe and ingest forever. Returns only on a non-transient error.
    async fn listen(&self, feed: &dyn FeedClient) -> Error {
        loop {
            info!(topic = %self.config.topic, "listening");
            match self.listen_once(feed).await {
                Ok(()) => warn!("feed ended the subscription, resubscribing"),
                Err(e) if e.is_transient() => warn!(error = %e, "feed error, resubscribing"),
                Err(e) => return e,
            }
            metrics::feed_resubscribes().add(1, &[]);
            tokio::time::sleep(self.config.resubscribe_delay).await;
        }
    }

    async fn listen_once(&self, feed: &dyn FeedClient) -> Result<()> {
        let mut subscription = feed.subscribe(&self.config.topic).await?;
        while let Some(delivery) = subscription.next().await? {
            self.ingestor.on_delivery(delivery).await;
        }
        Ok(())
    }

    async fn drain(&self, interrupts: &mut Interrupts) -> ShutdownKind {
        let drain = self.pool.stop_and_drain(self.config.drain_timeout);
        tokio::pin!(drain);

        let mut progress = tokio::time::interval(self.config.progress_interval);
        progress.tick().await;

        loop {
            tokio::select! {
                outcome = &mut drain => {
                    return match outcome {
                        DrainOutcome::Drained => {
                            info!("workers finished, performing final cleanup");
                            ShutdownKind::Graceful
                        }
                        DrainOutcome::TimedOut { remaining } => {
                            self.pool.abort().await;
                            ShutdownKind::TimedOut { remaining }
                        }
                    };
                }
                Some(()) = interrupts.recv() => {
                    warn!(inflight = self.inflight.current(), "second interrupt, exiting now");
                    self.pool.abort().await;
                    return ShutdownKind::Forced;
                }
                _ = progress.tick() => {
                    info!(
                        inflight = self.inflight.current(),
                        queued = self.queue.len(),
                        "draining"
                    );
                }
            }
        }
    }
}
