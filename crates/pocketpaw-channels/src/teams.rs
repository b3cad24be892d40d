//! Microsoft Teams channel — polls Microsoft Graph for new chat messages.
//!
//! Graph has a push transport (change notifications via a public webhook),
//! but that requires a subscription endpoint this runtime doesn't expose.
//! Instead this polls `GET /chats/{id}/messages` per configured `chat_id`,
//! tracking the newest `createdDateTime` seen so each poll only processes
//! messages after it — the same cursor-by-timestamp shape Google Chat uses
//! below, and the thinner variant of the long-lived adapters' connect/loop/
//! translate/publish shape that SPEC_FULL.md calls for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::bus::types::{InboundMessage, OutboundMessage};
use pocketpaw_core::config::schema::TeamsConfig;

use crate::base::Channel;

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct TeamsChannel {
    config: TeamsConfig,
    bus: Arc<MessageBus>,
    shutdown: Arc<Notify>,
    http: reqwest::Client,
    /// Newest `createdDateTime` seen per chat_id.
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TeamsChannel {
    pub fn new(config: TeamsConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            shutdown: Arc::new(Notify::new()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn is_allowed(&self, sender: &str) -> bool {
        self.config.allowed_users.is_empty()
            || self.config.allowed_users.iter().any(|u| u == sender)
    }

    async fn poll_chat(&self, chat_id: &str) -> anyhow::Result<()> {
        let url = format!("{GRAPH_BASE}/chats/{chat_id}/messages?$top=20&$orderby=createdDateTime desc");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let body: Value = resp.json().await?;
        let Some(messages) = body["value"].as_array() else {
            return Ok(());
        };

        let mut cursor = {
            let cursors = self.cursors.lock().await;
            cursors.get(chat_id).copied()
        };

        // Graph returns newest-first; walk oldest-first so cursor advances monotonically.
        for message in messages.iter().rev() {
            let Some(created) = message["createdDateTime"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
            else {
                continue;
            };

            if let Some(seen) = cursor {
                if created <= seen {
                    continue;
                }
            }
            cursor = Some(created);

            if message["messageType"].as_str() != Some("message") {
                continue;
            }
            let sender = message["from"]["user"]["id"]
                .as_str()
                .unwrap_or("")
                .to_string();
            if sender.is_empty() {
                continue;
            }
            let content = message["body"]["content"].as_str().unwrap_or("");
            let text = strip_html(content);
            if text.is_empty() {
                continue;
            }

            if !self.is_allowed(&sender) {
                warn!(sender = %sender, "teams: access denied by allowed_users");
                continue;
            }

            let mut metadata = HashMap::new();
            if let Some(id) = message["id"].as_str() {
                metadata.insert("message_id".to_string(), id.to_string());
            }

            let inbound = InboundMessage {
                channel: "teams".to_string(),
                sender_id: sender,
                chat_id: chat_id.to_string(),
                content: text,
                timestamp: created,
                media: Vec::new(),
                metadata,
            };

            if let Err(e) = self.bus.publish_inbound(inbound).await {
                error!(error = %e, "teams: failed to publish inbound message");
            }
        }

        if let Some(c) = cursor {
            self.cursors.lock().await.insert(chat_id.to_string(), c);
        }

        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("{GRAPH_BASE}/chats/{chat_id}/messages");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&json!({ "body": { "content": text } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("teams send failed: HTTP {}", resp.status());
        }
        Ok(())
    }
}

/// Very small HTML-to-text strip for Graph's `body.content` (HTML content type).
fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[async_trait]
impl Channel for TeamsChannel {
    fn name(&self) -> &str {
        "teams"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.config.access_token.is_empty() || self.config.chat_ids.is_empty() {
            warn!("teams access_token or chat_ids empty, channel will not start");
            return Ok(());
        }

        info!(chats = self.config.chat_ids.len(), "starting Teams poll loop");

        loop {
            for chat_id in &self.config.chat_ids {
                if let Err(e) = self.poll_chat(chat_id).await {
                    debug!(error = %e, chat_id = %chat_id, "teams poll error (non-fatal)");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.shutdown.notified() => {
                    info!("teams channel shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping Teams channel");
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        if msg.is_stream_end && msg.content.is_empty() {
            return Ok(());
        }
        self.send_message(&msg.chat_id, &msg.content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> TeamsConfig {
        TeamsConfig {
            access_token: "token".into(),
            chat_ids: vec!["19:chat@thread.v2".into()],
            allowed_users: Vec::new(),
        }
    }

    fn make_channel() -> TeamsChannel {
        TeamsChannel::new(make_config(), Arc::new(MessageBus::new(10)))
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(make_channel().name(), "teams");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>hello <b>world</b></p>"), "hello world");
    }

    #[test]
    fn test_is_allowed_empty_list() {
        assert!(make_channel().is_allowed("user-guid"));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        make_channel().stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_empty_config_returns_ok() {
        let ch = TeamsChannel::new(
            TeamsConfig::default(),
            Arc::new(MessageBus::new(10)),
        );
        ch.start().await.unwrap();
    }
}
