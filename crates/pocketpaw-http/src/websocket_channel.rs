//! `WebSocketChannel` — registers a duplex `/ws/chat` connection into the
//! `ChannelManager` as a channel in its own right.
//!
//! Unlike [`crate::virtual_channel::VirtualApiChannel`] (one forwarder per
//! HTTP request, torn down when the SSE stream ends), a websocket
//! connection is long-lived and carries many turns. The `routes::websocket`
//! handler registers one forwarder per connection (keyed by a generated
//! connection id) when the socket upgrades, and unregisters it on
//! disconnect; in between, every inbound text frame is published on the bus
//! under `channel: "websocket"`, and the dispatcher hands replies straight
//! back to [`WebSocketChannel::send`] for this connection's forwarder to
//! relay over the socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use pocketpaw_channels::base::Channel;
use pocketpaw_core::bus::types::OutboundMessage;

/// Per-connection forwarding table, one entry per live `/ws/chat` socket.
#[derive(Default)]
pub struct WebSocketChannel {
    forwarders: Mutex<HashMap<String, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl WebSocketChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a freshly upgraded connection, keyed by `conn_id`.
    pub async fn register(&self, conn_id: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.forwarders.lock().await.insert(conn_id.to_string(), tx);
        rx
    }

    /// Drop the forwarder when the socket closes.
    pub async fn unregister(&self, conn_id: &str) {
        self.forwarders.lock().await.remove(conn_id);
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&self) -> anyhow::Result<()> {
        // Connections register themselves via the `/ws/chat` upgrade handler;
        // there's no listener loop for the manager to drive here.
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
            let _ = tx.send(msg.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(WebSocketChannel::new().name(), "websocket");
    }

    #[tokio::test]
    async fn test_send_routes_to_registered_connection() {
        let channel = WebSocketChannel::new();
        let mut rx = channel.register("conn-1").await;

        channel
            .send(&OutboundMessage::stream_chunk("websocket", "conn-1", "hi"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn test_send_to_unregistered_connection_is_a_noop() {
        let channel = WebSocketChannel::new();
        channel
            .send(&OutboundMessage::new("websocket", "ghost", "x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregister_drops_forwarder() {
        let channel = WebSocketChannel::new();
        let _rx = channel.register("conn-1").await;
        channel.unregister("conn-1").await;
        assert!(channel.forwarders.lock().await.get("conn-1").is_none());
    }

    #[tokio::test]
    async fn test_stop_clears_all_forwarders() {
        let channel = WebSocketChannel::new();
        let _rx = channel.register("conn-1").await;
        channel.stop().await.unwrap();
        assert!(channel.forwarders.lock().await.is_empty());
    }
}
