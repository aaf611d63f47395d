//! Inflight accounting: builds admitted but not yet finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counter of admitted-but-unfinished builds, with a wait-until-idle.
#[derive(Debug, Default)]
pub struct Inflight {
    count: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one admitted build.
    pub fn admit(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Record one finished (or discarded) build.
    pub fn complete(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| {
                tracing::warn!("inflight counter completed below zero");
                0
            });
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the counter reaches zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until idle or `timeout` elapses. Returns whether idle was reached.
    pub async fn wait_idle_for(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_idle()).await.is_ok(),
            None => {
                self.wait_idle().await;
                true
            }
        }
    }
}
