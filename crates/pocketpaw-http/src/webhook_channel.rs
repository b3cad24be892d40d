//! `WebhookChannel` — the `"webhook"`-named [`Channel`] backing
//! `/webhook/inbound/{name}`'s synchronous request/response mode.
//!
//! Mirrors `VirtualApiChannel`'s registration trick (single outbound
//! dispatcher, per-request forwarding) but delivers exactly one reply via a
//! oneshot rather than a stream, since a webhook caller waiting on an HTTP
//! response has no use for intermediate chunks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use pocketpaw_channels::base::Channel;
use pocketpaw_core::bus::types::OutboundMessage;

#[derive(Default)]
pub struct WebhookChannel {
    waiters: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl WebhookChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in `request_id`'s eventual reply, to be fulfilled
    /// once the agent loop's final (`is_stream_end`) `OutboundMessage` for
    /// that chat id is dispatched.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(request_id.to_string(), tx);
        rx
    }

    /// Drop a waiter that timed out without a matching reply.
    pub async fn unregister(&self, request_id: &str) {
        self.waiters.lock().await.remove(request_id);
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn start(&self) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.waiters.lock().await.clear();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        if !msg.is_stream_end {
            return Ok(());
        }
        let mut waiters = self.waiters.lock().await;
        if let Some(tx) = waiters.remove(&msg.chat_id) {
            let _ = tx.send(msg.content.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_end_resolves_waiter() {
        let channel = WebhookChannel::new();
        let rx = channel.register("req-1").await;

        channel
            .send(&OutboundMessage::stream_end("webhook", "req-1", "pong"))
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_non_final_chunk_does_not_resolve() {
        let channel = WebhookChannel::new();
        let mut rx = channel.register("req-1").await;

        channel
            .send(&OutboundMessage::stream_chunk("webhook", "req-1", "partial"))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
