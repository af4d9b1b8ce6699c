//! Routing between channels and the message handler.
//!
//! Inbound messages from every channel funnel into one queue that the
//! handler loop drains. Outbound messages fan out to whichever tasks have
//! subscribed for the target channel's name. Delivery to a gone subscriber
//! is dropped, not an error; the counters only track accepted traffic.

use crate::error::{BusError, BusResult};
use crate::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, trace};

const INBOUND_CAPACITY: usize = 256;
const SUBSCRIBER_CAPACITY: usize = 256;

/// Cheaply clonable bus connecting channels to the handler loop.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<OutboundMessage>>>>,
    inbound_count: AtomicU64,
    outbound_count: AtomicU64,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of bus traffic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Inbound messages accepted.
    pub inbound_count: u64,
    /// Outbound messages routed.
    pub outbound_count: u64,
}

impl MessageBus {
    /// Create a new bus.
    #[must_use]
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        Self {
            inner: Arc::new(BusInner {
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                subscribers: RwLock::new(HashMap::new()),
                inbound_count: AtomicU64::new(0),
                outbound_count: AtomicU64::new(0),
            }),
        }
    }

    /// Queue an inbound message for the handler loop.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> BusResult<()> {
        trace!(channel = %msg.channel, sender = %msg.sender_id, "inbound message");

        self.inner
            .inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::InboundClosed)?;
        self.inner.inbound_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Take the next inbound message, giving up after `timeout`.
    ///
    /// Meant for the single handler loop; concurrent callers queue up on
    /// the receiver lock.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        let mut rx = self.inner.inbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Hand an outbound message to every subscriber of its target channel.
    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        trace!(channel = %msg.channel, chat_id = %msg.chat_id, kind = ?msg.kind, "outbound message");

        let subscribers = self.inner.subscribers.read().await;
        if let Some(senders) = subscribers.get(&msg.channel) {
            for sender in senders {
                if sender.send(msg.clone()).await.is_err() {
                    debug!(channel = %msg.channel, "outbound subscriber gone");
                }
            }
        }
        drop(subscribers);

        self.inner.outbound_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Register for outbound messages addressed to `channel`.
    pub async fn subscribe_channel(&self, channel: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.inner
            .subscribers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        debug!(channel = %channel, "outbound subscriber registered");
        rx
    }

    /// Current traffic counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            inbound_count: self.inner.inbound_count.load(Ordering::Relaxed),
            outbound_count: self.inner.outbound_count.load(Ordering::Relaxed),
        }
    }

    /// A sender-only handle for channel input tasks.
    #[must_use]
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            tx: self.inner.inbound_tx.clone(),
        }
    }
}

/// Sender-only handle for publishing inbound messages from spawned tasks.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl InboundHandle {
    /// Queue an inbound message.
    pub async fn publish(&self, msg: InboundMessage) -> BusResult<()> {
        self.tx.send(msg).await.map_err(|_| BusError::InboundClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OutboundKind;

    #[tokio::test]
    async fn test_inbound_roundtrip() {
        let bus = MessageBus::new();

        bus.publish_inbound(InboundMessage::cli("hello")).await.unwrap();

        let received = bus
            .consume_inbound_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(received.content, "hello");
        assert_eq!(bus.stats().inbound_count, 1);
    }

    #[tokio::test]
    async fn test_consume_times_out_when_quiet() {
        let bus = MessageBus::new();
        let got = bus.consume_inbound_timeout(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_outbound_routed_by_channel_name() {
        let bus = MessageBus::new();
        let mut telegram_rx = bus.subscribe_channel("telegram").await;

        bus.publish_outbound(OutboundMessage::text("telegram", "chat1", "for telegram"))
            .await;
        bus.publish_outbound(OutboundMessage::text("cli", "direct", "for cli"))
            .await;

        let received = tokio::time::timeout(Duration::from_millis(100), telegram_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "for telegram");

        // Nothing else addressed to telegram.
        let next = tokio::time::timeout(Duration::from_millis(50), telegram_rx.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_typing_routed_like_text() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_channel("cli").await;

        let inbound = InboundMessage::cli("question");
        bus.publish_outbound(OutboundMessage::typing_for(&inbound)).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, OutboundKind::Typing);
    }

    #[tokio::test]
    async fn test_counters_track_both_directions() {
        let bus = MessageBus::new();

        bus.publish_inbound(InboundMessage::cli("in")).await.unwrap();
        bus.publish_outbound(OutboundMessage::text("cli", "direct", "out"))
            .await;

        let stats = bus.stats();
        assert_eq!(stats.inbound_count, 1);
        assert_eq!(stats.outbound_count, 1);
    }
}
