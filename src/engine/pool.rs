//! Worker pool: N tasks pulling builds from the dispatch queue.

use crate::engine::inflight::Inflight;
use crate::model::BuildEvent;
use crate::processor::BuildProcessor;
use crate::queue::BoundedDispatchQueue;
use crate::telemetry::build::{record_result, start_build_span};
use crate::telemetry::metrics;
use futures::FutureExt;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every admitted build finished and all workers exited.
    Drained,
    /// The timeout elapsed with builds still inflight.
    TimedOut { remaining: usize },
}

/// A fixed set of worker tasks sharing one dispatch queue.
pub struct WorkerPool {
    queue: Arc<BoundedDispatchQueue>,
    inflight: Arc<Inflight>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `n` workers on the current tokio runtime.
    pub fn start(
        n: usize,
        queue: Arc<BoundedDispatchQueue>,
        inflight: Arc<Inflight>,
        processor: Arc<dyn BuildProcessor>,
    ) -> Self {
        let handles = (0..n)
            .map(|index| {
                let worker = Worker {
                    index,
                    queue: Arc::clone(&queue),
                    inflight: Arc::clone(&inflight),
                    processor: Arc::clone(&processor),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!(workers = n, "worker pool started");

        Self {
            queue,
            inflight,
            handles: Mutex::new(handles),
            size: n,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop admissions and wait for inflight builds to finish.
    ///
    /// The caller stops feeding the queue first. Workers are never
    /// interrupted; on [`DrainOutcome::Drained`] they have all exited by the
    /// time this returns. Safe to call more than once.
    pub async fn stop_and_drain(&self, timeout: Option<Duration>) -> DrainOutcome {
        self.queue.close();

        if !self.inflight.wait_idle_for(timeout).await {
            let remaining = self.inflight.current();
            warn!(remaining, "drain timed out");
            return DrainOutcome::TimedOut { remaining };
        }

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                // Worker bodies catch panics, so this is a cancelled task.
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        debug!("worker pool drained");
        DrainOutcome::Drained
    }

    /// Abort workers still running and wait until their tasks are gone.
    ///
    /// Only for forced shutdown. Once this returns no build future is
    /// alive, so child processes tied to those futures have been killed.
    pub async fn abort(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        self.queue.close();

        let mut aborted = 0;
        for handle in &handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "worker task ended abnormally");
                }
            }
        }
        warn!(aborted, "worker pool aborted");
    }
}

struct Worker {
    index: usize,
    queue: Arc<BoundedDispatchQueue>,
    inflight: Arc<Inflight>,
    processor: Arc<dyn BuildProcessor>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.index, "worker started");
        while let Some(event) = self.queue.take().await {
            self.handle(event).await;
            self.inflight.complete();
        }
        debug!(worker = self.index, "worker exiting, queue closed");
    }

    /// Process one build. Errors and panics stop here.
    async fn handle(&self, event: BuildEvent) {
        let span = start_build_span(self.index, &event);
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.processor.process(&event))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = span.in_scope(|| match outcome {
            Ok(Ok(_)) => {
                info!(duration_ms = elapsed_ms as u64, "build processed");
                "ok"
            }
            Ok(Err(e)) => {
                error!(duration_ms = elapsed_ms as u64, error = %e, "build processing failed");
                "error"
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "build processing panicked");
                "panic"
            }
        });

        record_result(&span, result);
        metrics::builds_processed().add(1, &[KeyValue::new("result", result)]);
        metrics::processing_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("platform", event.platform.clone())]);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
