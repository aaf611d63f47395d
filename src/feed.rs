//! Build feed client interface and a line-oriented TCP implementation.
//!
//! The dispatch core only needs three things from a feed: subscribe to a
//! topic, receive deliveries, and acknowledge each one. Reconnection is the
//! caller's concern: any transient error ends the subscription and the
//! lifecycle loop subscribes again.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Acknowledges one delivery upstream. Must be idempotent.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn acknowledge(&self) -> Result<()>;
}

/// One message from the feed: its JSON body and the way to ack it.
pub struct Delivery {
    pub body: serde_json::Value,
    pub ack: Box<dyn AckHandle>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("body", &self.body).finish()
    }
}

/// An active subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery. `Ok(None)` means the feed ended the subscription.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

/// Factory for subscriptions.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

// ---------------------------------------------------------------------------
// Line feed
// ---------------------------------------------------------------------------

/// Handshake line sent after connecting.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: String,
    pub label: String,
}

/// One message line sent by the relay.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeedMessage {
    pub id: serde_json::Value,
    pub body: serde_json::Value,
}

/// Acknowledgment line sent back to the relay.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckMessage {
    pub ack: serde_json::Value,
}

/// Feed relay reached over TCP, speaking newline-delimited JSON.
#[derive(Debug, Clone)]
pub struct LineFeed {
    addr: String,
    label: String,
}

impl LineFeed {
    /// `label` identifies this consumer to the relay; it should be unique
    /// per process so two listeners never share a subscription.
    pub fn new(addr: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            label: label.into(),
        }
    }

    /// A label of the form `build-informant-<uuid>`.
    pub fn unique_label() -> String {
        format!("build-informant-{}", uuid::Uuid::new_v4())
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl FeedClient for LineFeed {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read, mut write) = stream.into_split();

        let request = SubscribeRequest {
            subscribe: topic.to_string(),
            label: self.label.clone(),
        };
        write_line(&mut write, &request).await?;
        debug!(addr = %self.addr, topic, label = %self.label, "subscribed");

        Ok(Box::new(LineSubscription {
            lines: BufReader::new(read).lines(),
            writer: Arc::new(Mutex::new(write)),
        }))
    }
}

struct LineSubscription {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

#[async_trait]
impl Subscription for LineSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(Error::Feed("feed connection closed".to_string()));
            };
            if line.trim().is_empty() {
                continue;
            }
            let message: FeedMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    self.skip_invalid(&line, &e).await;
                    continue;
                }
            };
            return Ok(Some(Delivery {
                body: message.body,
                ack: Box::new(LineAck {
                    id: message.id,
                    writer: Arc::clone(&self.writer),
                    done: AtomicBool::new(false),
                }),
            }));
        }
    }
}

impl LineSubscription {
    /// Drop a line that is not a feed message. If it still names an id it
    /// is acked, so the relay does not hand it out again.
    async fn skip_invalid(&self, line: &str, error: &serde_json::Error) {
        warn!(error = %error, "skipping invalid feed line");
        metrics::feed_invalid_lines().add(1, &[]);

        let id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|mut v| v.get_mut("id").map(serde_json::Value::take));
        if let Some(ack) = id.map(|id| AckMessage { ack: id }) {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_line(&mut *writer, &ack).await {
                warn!(error = %e, "failed to acknowledge invalid feed line");
            }
        }
    }
}

struct LineAck {
    id: serde_json::Value,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    done: AtomicBool,
}

#[async_trait]
impl AckHandle for LineAck {
    async fn acknowledge(&self) -> Result<()> {
        if self.done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let ack = AckMessage {
            ack: self.id.clone(),
        };
        let mut writer = self.writer.lock().await;
        let result = write_line(&mut *writer, &ack).await;
        if result.is_err() {
            self.done.store(false, Ordering::Release);
        }
        result
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
