//! Bounded dispatch queue with drop-oldest backpressure.
//!
//! Producers never block: when the queue is full the oldest pending build
//! is evicted to make room, and handed back to the producer so it can be
//! logged. Consumers wait asynchronously until a build arrives or the
//! queue is closed.

use crate::model::BuildEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// What happened to a build offered with [`BoundedDispatchQueue::try_put`].
#[derive(Debug)]
#[must_use]
pub enum PutOutcome {
    /// Inserted into free capacity.
    Admitted,
    /// Inserted after evicting the oldest pending build, returned here.
    Displaced(BuildEvent),
    /// The queue no longer admits builds; the offered one is handed back.
    Closed(BuildEvent),
}

impl PutOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, PutOutcome::Admitted | PutOutcome::Displaced(_))
    }
}

struct Inner {
    items: VecDeque<BuildEvent>,
    closed: bool,
}

/// Fixed-capacity FIFO shared by the ingestor and the worker pool.
pub struct BoundedDispatchQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    available: Notify,
}

impl BoundedDispatchQueue {
    /// Create a queue holding at most `capacity` builds.
    ///
    /// A zero capacity is raised to one; configuration rejects it earlier.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
        }
    }

    /// Insert without blocking, evicting the head when full.
    pub fn try_put(&self, event: BuildEvent) -> PutOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PutOutcome::Closed(event);
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(event);
            match evicted {
                Some(old) => PutOutcome::Displaced(old),
                None => PutOutcome::Admitted,
            }
        };
        self.available.notify_one();
        outcome
    }

    /// Remove the head, waiting until one exists.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn take(&self) -> Option<BuildEvent> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting so a put or close between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.items.pop_front() {
                    let more = !inner.items.is_empty();
                    drop(inner);
                    if more {
                        // Pass the wakeup on; a single notify_one may have
                        // covered several puts.
                        self.available.notify_one();
                    }
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop admitting builds and wake every waiting consumer.
    ///
    /// Builds already queued are still handed out by [`take`](Self::take).
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids of pending builds, head first.
    pub fn pending_ids(&self) -> Vec<crate::model::BuildId> {
        self.inner
            .lock()
            .items
            .iter()
            .map(|e| e.build_id.clone())
            .collect()
    }
}
