//! Google Chat channel — polls the Chat API's `spaces.messages.list`.
//!
//! Like Teams, Google Chat's native push transport needs a publicly
//! reachable Pub/Sub subscription this runtime doesn't host, so this polls
//! `GET /v1/{space}/messages` per configured `space_id`, tracking the
//! newest `createTime` seen so each poll only processes messages after it.
//! The thinner variant of the long-lived adapters' connect/loop/translate/
//! publish shape, per SPEC_FULL.md.

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
use pocketpaw_core::config::schema::GoogleChatConfig;

use crate::base::Channel;

const CHAT_API_BASE: &str = "https://chat.googleapis.com/v1";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct GoogleChatChannel {
    config: GoogleChatConfig,
    bus: Arc<MessageBus>,
    shutdown: Arc<Notify>,
    http: reqwest::Client,
    /// Newest `createTime` seen per space_id.
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl GoogleChatChannel {
    pub fn new(config: GoogleChatConfig, bus: Arc<MessageBus>) -> Self {
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

    async fn poll_space(&self, space_id: &str) -> anyhow::Result<()> {
        let url = format!(
            "{CHAT_API_BASE}/{space_id}/messages?orderBy=createTime desc&pageSize=20"
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let body: Value = resp.json().await?;
        let Some(messages) = body["messages"].as_array() else {
            return Ok(());
        };

        let mut cursor = {
            let cursors = self.cursors.lock().await;
            cursors.get(space_id).copied()
        };

        for message in messages.iter().rev() {
            let Some(created) = message["createTime"]
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

            let sender = message["sender"]["name"].as_str().unwrap_or("").to_string();
            if sender.is_empty() || message["sender"]["type"].as_str() == Some("BOT") {
                continue;
            }
            let text = message["text"].as_str().unwrap_or("");
            if text.is_empty() {
                continue;
            }

            if !self.is_allowed(&sender) {
                warn!(sender = %sender, "google_chat: access denied by allowed_users");
                continue;
            }

            let mut metadata = HashMap::new();
            if let Some(name) = message["name"].as_str() {
                metadata.insert("message_name".to_string(), name.to_string());
            }

            let inbound = InboundMessage {
                channel: "google_chat".to_string(),
                sender_id: sender,
                chat_id: space_id.to_string(),
                content: text.to_string(),
                timestamp: created,
                media: Vec::new(),
                metadata,
            };

            if let Err(e) = self.bus.publish_inbound(inbound).await {
                error!(error = %e, "google_chat: failed to publish inbound message");
            }
        }

        if let Some(c) = cursor {
            self.cursors.lock().await.insert(space_id.to_string(), c);
        }

        Ok(())
    }

    async fn send_message(&self, space_id: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("{CHAT_API_BASE}/{space_id}/messages");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("google_chat send failed: HTTP {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for GoogleChatChannel {
    fn name(&self) -> &str {
        "google_chat"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.config.access_token.is_empty() || self.config.space_ids.is_empty() {
            warn!("google_chat access_token or space_ids empty, channel will not start");
            return Ok(());
        }

        info!(spaces = self.config.space_ids.len(), "starting Google Chat poll loop");

        loop {
            for space_id in &self.config.space_ids {
                if let Err(e) = self.poll_space(space_id).await {
                    debug!(error = %e, space_id = %space_id, "google_chat poll error (non-fatal)");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.shutdown.notified() => {
                    info!("google_chat channel shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping Google Chat channel");
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

    fn make_config() -> GoogleChatConfig {
        GoogleChatConfig {
            access_token: "token".into(),
            space_ids: vec!["spaces/AAAA1111".into()],
            allowed_users: Vec::new(),
        }
    }

    fn make_channel() -> GoogleChatChannel {
        GoogleChatChannel::new(make_config(), Arc::new(MessageBus::new(10)))
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(make_channel().name(), "google_chat");
    }

    #[test]
    fn test_is_allowed_empty_list() {
        assert!(make_channel().is_allowed("users/123"));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        make_channel().stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_empty_config_returns_ok() {
        let ch = GoogleChatChannel::new(
            GoogleChatConfig::default(),
            Arc::new(MessageBus::new(10)),
        );
        ch.start().await.unwrap();
    }
}
