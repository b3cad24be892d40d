//! Shared application state threaded through every route via `axum::State`.
//!
//! One `AppState` per process, built once in `serve()` and cloned cheaply
//! (every field is an `Arc`) into each request.

use std::sync::Arc;

use pocketpaw_agent::plan::PlanManager;
use pocketpaw_agent::AgentLoop;
use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::config::Settings;
use pocketpaw_core::memory::manager::MemoryManager;
use pocketpaw_core::security::{ApiKeyStore, AuditLog, AuthorizationServer, RateLimiter};
use pocketpaw_cron::CronService;

use crate::virtual_channel::VirtualApiChannel;
use crate::webhook_channel::WebhookChannel;
use crate::websocket_channel::WebSocketChannel;

/// Everything a route handler might need, grouped the way `gateway::run`
/// already assembles its runtime components.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<MessageBus>,
    pub agent_loop: Arc<AgentLoop>,
    pub virtual_channel: Arc<VirtualApiChannel>,
    pub webhook_channel: Arc<WebhookChannel>,
    pub websocket_channel: Arc<WebSocketChannel>,
    pub settings: Arc<Settings>,
    pub plans: Arc<PlanManager>,
    pub audit: Arc<AuditLog>,
    pub memory: Arc<MemoryManager>,
    pub api_keys: Arc<ApiKeyStore>,
    pub oauth: Arc<AuthorizationServer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cron: Arc<CronService>,
    /// HMAC key backing `/auth/session` tokens. Persisted at
    /// `~/.pocketpaw/session_secret` (0600) so issued tokens stay valid
    /// across restarts.
    pub session_secret: Arc<Vec<u8>>,
}

/// Load (or mint and persist) the HMAC secret used to sign session tokens.
pub async fn load_or_create_session_secret(path: Option<std::path::PathBuf>) -> anyhow::Result<Vec<u8>> {
    use rand::RngCore;

    let path = path.unwrap_or_else(|| pocketpaw_core::utils::get_data_path().join("session_secret"));
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if path.exists() {
        let contents = tokio::fs::read(&path).await?;
        if !contents.is_empty() {
            return Ok(contents);
        }
    }

    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    tokio::fs::write(&path, &secret).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(secret)
}
