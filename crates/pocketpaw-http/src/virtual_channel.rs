//! `VirtualApiChannel` — bridges `ChannelManager`'s single outbound dispatcher
//! into per-request HTTP/SSE forwarding.
//!
//! The bus's outbound queue has exactly one consumer: `ChannelManager`'s
//! dispatch loop. An HTTP streaming handler can't also call
//! `consume_outbound()` without racing that loop for messages meant for real
//! adapters. Instead, this is registered into the same `ChannelManager`
//! under the name `"api"`; `AgentLoop::process_message` replies on the
//! channel named in the inbound message's `channel` field, so a chat
//! request routes its `InboundMessage` with `channel: "api"` and the
//! dispatcher hands the resulting chunks straight to [`VirtualApiChannel::send`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use pocketpaw_channels::base::Channel;
use pocketpaw_core::bus::types::OutboundMessage;

/// Per-`chat_id` forwarding table. One request registers a receiver before
/// publishing its inbound message, then drains it until the stream-end
/// marker arrives.
#[derive(Default)]
pub struct VirtualApiChannel {
    forwarders: Mutex<HashMap<String, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl VirtualApiChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in `chat_id`'s outbound traffic. Overwrites any
    /// prior forwarder for the same id — only one in-flight turn per
    /// `chat_id` is supported, matching the bus's per-chat-id ordering
    /// guarantee.
    pub async fn register(&self, chat_id: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.forwarders.lock().await.insert(chat_id.to_string(), tx);
        rx
    }

    /// Drop the forwarder once a turn's stream-end marker has been consumed.
    pub async fn unregister(&self, chat_id: &str) {
        self.forwarders.lock().await.remove(chat_id);
    }
}

#[async_trait]
impl Channel for VirtualApiChannel {
    fn name(&self) -> &str {
        "api"
    }

    async fn start(&self) -> anyhow::Result<()> {
        // No listener to run; this channel only ever receives via send().
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.forwarders.lock().await.clear();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let forwarders = self.forwarders.lock().await;
        if let Some(tx) = forwarders.get(&msg.chat_id) {
            // A closed receiver (client disconnected mid-turn) is not an
            // error for the dispatcher; the turn just has nowhere to go.
            let _ = tx.send(msg.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_routes_to_registered_chat() {
        let channel = VirtualApiChannel::new();
        let mut rx = channel.register("req-1").await;

        channel
            .send(&OutboundMessage::stream_chunk("api", "req-1", "hello"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "hello");
    }

    #[tokio::test]
    async fn test_send_to_unregistered_chat_is_a_noop() {
        let channel = VirtualApiChannel::new();
        channel
            .send(&OutboundMessage::new("api", "nobody-home", "x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregister_drops_forwarder() {
        let channel = VirtualApiChannel::new();
        let _rx = channel.register("req-1").await;
        channel.unregister("req-1").await;
        assert!(channel.forwarders.lock().await.get("req-1").is_none());
    }
}
