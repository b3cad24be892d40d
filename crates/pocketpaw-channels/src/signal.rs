//! Signal channel — polls a `signal-cli-rest-api` instance.
//!
//! Signal has no push/webhook transport of its own; the `signal-cli-rest-api`
//! project exposes a JSON-RPC-ish REST shim over `signal-cli`, and receiving
//! means repeatedly polling `GET /v1/receive/{number}`. Sends go through
//! `POST /v2/send`. Chunked replies are buffered per chat_id and flushed as
//! one message on `stream_end`, matching how the other REST-polled channels
//! in this crate avoid sending a wall of tiny messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::bus::types::{InboundMessage, OutboundMessage};

use crate::base::Channel;

/// Poll interval for `/v1/receive`.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Signal channel backed by a `signal-cli-rest-api` instance.
pub struct SignalChannel {
    api_url: String,
    phone_number: String,
    bus: Arc<MessageBus>,
    allowed_users: Vec<String>,
    shutdown: Arc<Notify>,
    http: reqwest::Client,
    /// Per-chat_id buffer for streamed chunks, flushed on `stream_end`.
    buffers: Mutex<HashMap<String, String>>,
}

impl SignalChannel {
    pub fn new(
        api_url: String,
        phone_number: String,
        bus: Arc<MessageBus>,
        allowed_users: Vec<String>,
    ) -> Self {
        Self {
            api_url,
            phone_number,
            bus,
            allowed_users,
            shutdown: Arc::new(Notify::new()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn is_allowed(&self, sender: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == sender)
    }

    /// One round of `GET /v1/receive/{number}`, publishing any new envelopes.
    async fn poll_once(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/v1/receive/{}",
            self.api_url.trim_end_matches('/'),
            self.phone_number
        );
        let resp = self.http.get(&url).send().await?;
        let envelopes: Vec<Value> = resp.json().await.unwrap_or_default();

        for env in envelopes {
            let envelope = &env["envelope"];
            let source = envelope["source"].as_str().unwrap_or("").to_string();
            let content = envelope["dataMessage"]["message"].as_str();

            let Some(content) = content else {
                continue;
            };
            if content.is_empty() || source.is_empty() {
                continue;
            }

            if !self.is_allowed(&source) {
                warn!(sender = %source, "signal: access denied by allowed_users");
                continue;
            }

            let mut metadata = HashMap::new();
            if let Some(ts) = envelope["timestamp"].as_i64() {
                metadata.insert("timestamp".to_string(), ts.to_string());
            }

            let inbound = InboundMessage {
                channel: "signal".to_string(),
                sender_id: source.clone(),
                chat_id: source,
                content: content.to_string(),
                timestamp: chrono::Utc::now(),
                media: Vec::new(),
                metadata,
            };

            if let Err(e) = self.bus.publish_inbound(inbound).await {
                error!(error = %e, "signal: failed to publish inbound message");
            }
        }

        Ok(())
    }

    /// Send a buffered message to a recipient via `POST /v2/send`.
    async fn send_message(&self, to: &str, content: &str) -> anyhow::Result<()> {
        let url = format!("{}/v2/send", self.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "message": content,
                "number": self.phone_number,
                "recipients": [to],
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("signal send failed: HTTP {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for SignalChannel {
    fn name(&self) -> &str {
        "signal"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.phone_number.is_empty() {
            warn!("signal phone_number is empty, channel will not start");
            return Ok(());
        }

        info!(api_url = %self.api_url, "starting Signal poll loop");

        loop {
            tokio::select! {
                result = self.poll_once() => {
                    if let Err(e) = result {
                        debug!(error = %e, "signal poll error (non-fatal)");
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("signal channel shutting down");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.shutdown.notified() => {
                    info!("signal channel shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping Signal channel");
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        if msg.is_stream_chunk {
            let mut buffers = self.buffers.lock().await;
            buffers
                .entry(msg.chat_id.clone())
                .or_default()
                .push_str(&msg.content);
            return Ok(());
        }

        if msg.is_stream_end {
            let buffered = {
                let mut buffers = self.buffers.lock().await;
                buffers.remove(&msg.chat_id)
            };
            if let Some(content) = buffered {
                if !content.is_empty() {
                    self.send_message(&msg.chat_id, &content).await?;
                }
            }
            return Ok(());
        }

        self.send_message(&msg.chat_id, &msg.content).await
    }
}
