//! Async message bus — the central nervous system of PocketPaw.
//!
//! The in-process pub/sub message bus with three topics: inbound, outbound,
//! and system. The agent loop and the channel manager are each the single
//! architectural consumer of inbound/outbound respectively (`consume_inbound`/
//! `consume_outbound`, preserved from the original single-consumer design).
//! The system topic has genuine multi-subscriber fan-out (`subscribe_system`/
//! `unsubscribe_system`) because multiple independent consumers exist for it
//! in practice: the HTTP `/events/stream` SSE endpoint, one per connected
//! client, and any future UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;

use super::types::{InboundMessage, OutboundMessage, SystemEvent};

/// Handle returned by `subscribe_system`, passed back to `unsubscribe_system`.
pub type SubscriptionId = u64;

/// The message bus connecting channels <-> agent loop <-> HTTP surface.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    system_subs: RwLock<HashMap<SubscriptionId, mpsc::UnboundedSender<SystemEvent>>>,
    next_sub_id: AtomicU64,
    /// Per-`chat_id` serialization lock for outbound publishes, so concurrent
    /// turns on different `chat_id`s never interleave within one `chat_id`'s
    /// stream.
    chat_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MessageBus {
    /// Create a new message bus with the given buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        MessageBus {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            system_subs: RwLock::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Publish a message from a channel to the agent (inbound). Never fails
    /// the caller — a full/dropped queue is logged and swallowed, matching
    /// the bus's at-most-once, no-retry delivery contract.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        if let Err(e) = self.inbound_tx.send(msg).await {
            warn!(error = %e, "inbound publish failed: no consumer");
        }
        Ok(())
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Get a clone of the inbound sender (for channels to use).
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Publish a response from the agent to a channel (outbound), serialized
    /// per `chat_id` so a slower concurrent publish on a different chat can
    /// never reorder this one.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        let lock = self.chat_lock(&msg.chat_id).await;
        let _guard = lock.lock().await;
        if let Err(e) = self.outbound_tx.send(msg).await {
            warn!(error = %e, "outbound publish failed: no consumer");
        }
        Ok(())
    }

    /// Consume the next outbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Get a clone of the outbound sender (for the agent loop to use).
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    async fn chat_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── System (genuinely multi-subscriber) ─────────────────────────────

    /// Register a new system-event subscriber. Returns a handle for
    /// `unsubscribe_system` and an unbounded receiver of every future event.
    pub async fn subscribe_system(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SystemEvent>) {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.system_subs.write().await.insert(id, tx);
        (id, rx)
    }

    /// Remove a system-event subscription. Idempotent.
    pub async fn unsubscribe_system(&self, id: SubscriptionId) {
        self.system_subs.write().await.remove(&id);
    }

    /// Publish a system event to every current subscriber. A subscriber
    /// whose receiver has been dropped is logged as a warning (the bus
    /// cannot distinguish "processing raised" from "nobody's listening
    /// anymore" once delivery is channel-based) and left for the holder to
    /// `unsubscribe_system` explicitly; publishing never blocks on a slow
    /// subscriber beyond the unbounded send itself.
    pub async fn publish_system(&self, evt: SystemEvent) -> anyhow::Result<()> {
        let subs = self.system_subs.read().await;
        for (id, tx) in subs.iter() {
            if tx.send(evt.clone()).is_err() {
                warn!(subscription_id = id, "system event subscriber gone");
            }
        }
        Ok(())
    }

    /// Number of currently registered system-event subscribers.
    pub async fn system_subscriber_count(&self) -> usize {
        self.system_subs.read().await.len()
    }
}
