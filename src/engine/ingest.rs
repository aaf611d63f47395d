//! Ingestor: feed delivery -> ack -> filter -> dispatch queue.

use crate::engine::inflight::Inflight;
use crate::feed::Delivery;
use crate::filter::{Filter, Rejection};
use crate::model::{BuildEvent, BuildId};
use crate::queue::{BoundedDispatchQueue, PutOutcome};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the ingestor did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The body carried no decodable build payload.
    Malformed,
    /// The filter rejected the build.
    Filtered(Rejection),
    /// Queued. `displaced` names the older build evicted to make room.
    Admitted {
        build_id: BuildId,
        displaced: Option<BuildId>,
    },
    /// The queue is closed; the build was discarded.
    Closed,
}

/// Single ingestion path in front of the dispatch queue.
#[derive(Clone)]
pub struct Ingestor {
    filter: Arc<Filter>,
    queue: Arc<BoundedDispatchQueue>,
    inflight: Arc<Inflight>,
}

impl Ingestor {
    pub fn new(
        filter: Arc<Filter>,
        queue: Arc<BoundedDispatchQueue>,
        inflight: Arc<Inflight>,
    ) -> Self {
        Self {
            filter,
            queue,
            inflight,
        }
    }

    /// Handle one delivery.
    ///
    /// The delivery is acknowledged before anything else, so a crash after
    /// this point loses the build rather than seeing it redelivered.
    pub async fn on_delivery(&self, delivery: Delivery) -> IngestOutcome {
        if let Err(e) = delivery.ack.acknowledge().await {
            warn!(error = %e, "failed to acknowledge delivery");
        }

        let event = match BuildEvent::from_body(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping delivery without a usable build payload");
                metrics::builds_received().add(1, &[KeyValue::new("result", "malformed")]);
                return IngestOutcome::Malformed;
            }
        };

        self.offer(event)
    }

    /// Filter and enqueue a decoded build.
    pub fn offer(&self, event: BuildEvent) -> IngestOutcome {
        if let Err(reason) = self.filter.check(&event) {
            debug!(build_id = %event.build_id, platform = %event.platform,
                build_type = %event.build_type, %reason, "build filtered");
            metrics::builds_received().add(1, &[KeyValue::new("result", "filtered")]);
            metrics::builds_filtered().add(1, &[KeyValue::new("reason", reason.as_str())]);
            return IngestOutcome::Filtered(reason);
        }

        let build_id = event.build_id.clone();
        // Count before the put: a worker may finish the build before
        // try_put even returns.
        self.inflight.admit();
        match self.queue.try_put(event) {
            PutOutcome::Admitted => {
                debug!(build_id = %build_id, "build queued");
                metrics::builds_received().add(1, &[KeyValue::new("result", "admitted")]);
                IngestOutcome::Admitted {
                    build_id,
                    displaced: None,
                }
            }
            PutOutcome::Displaced(old) => {
                warn!(build_id = %old.build_id, platform = %old.platform,
                    "did not process build, backlog too big");
                metrics::builds_received().add(1, &[KeyValue::new("result", "admitted")]);
                metrics::builds_dropped().add(1, &[KeyValue::new("platform", old.platform)]);
                // The evicted build counts as finished without processing.
                self.inflight.complete();
                IngestOutcome::Admitted {
                    build_id,
                    displaced: Some(old.build_id),
                }
            }
            PutOutcome::Closed(_) => {
                self.inflight.complete();
                debug!(build_id = %build_id, "queue closed, build discarded");
                metrics::builds_received().add(1, &[KeyValue::new("result", "closed")]);
                IngestOutcome::Closed
            }
        }
    }
}
