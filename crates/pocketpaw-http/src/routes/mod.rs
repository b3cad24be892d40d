//! Route modules and the `/api/v1` router assembly.

pub mod auth;
pub mod channels;
pub mod chat;
pub mod health;
pub mod memory;
pub mod oauth;
pub mod plan;
pub mod reminders;
pub mod sessions;
pub mod settings;
pub mod webhooks;
pub mod websocket;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Routes that sit behind [`crate::auth::auth_middleware`] — everything
/// under `/api/v1`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/session", post(auth::create_session))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/api-keys", get(auth::list_api_keys).post(auth::create_api_key))
        .route("/auth/api-keys/:id", delete(auth::revoke_api_key))
        .route("/auth/api-keys/:id/rotate", post(auth::rotate_api_key))
        .route("/chat/stream", post(chat::stream))
        .route("/chat/stop", post(chat::stop))
        .route("/events/stream", get(chat::events_stream))
        .route("/ws/chat", get(websocket::upgrade))
        .route("/sessions", get(sessions::list))
        .route("/sessions/search", get(sessions::search))
        .route("/sessions/:id", get(sessions::get).delete(sessions::delete))
        .route("/channels/status", get(channels::status))
        .route("/channels/save", post(channels::save))
        .route("/channels/toggle", post(channels::toggle))
        .route("/settings", get(settings::get).put(settings::put))
        .route("/memory/long_term", get(memory::list_long_term).post(memory::create_long_term))
        .route("/memory/long_term/:id", delete(memory::delete_long_term))
        .route("/memory/settings", get(memory::settings))
        .route("/memory/stats", get(memory::stats))
        .route("/plan/approve", post(plan::approve))
        .route("/plan/reject", post(plan::reject))
        .route("/plan/:session_id", get(plan::get))
        .route("/reminders", get(reminders::list).post(reminders::create))
        .route("/reminders/:id", delete(reminders::delete))
        .route("/health", get(health::health))
        .route("/audit", get(health::audit))
        .route("/security-audit", get(health::security_audit))
        .route("/self-audit/:kind", get(health::self_audit))
        .route("/webhooks", get(webhooks::list))
        .route("/webhook/inbound/:name", post(webhooks::inbound))
}

/// Routes that are never behind the bearer-auth layer: OAuth minting its
/// own tokens would be a chicken-and-egg problem otherwise.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/authorize", get(oauth::authorize))
        .route("/oauth/authorize/consent", post(oauth::consent))
        .route("/oauth/token", post(oauth::token))
        .route("/oauth/revoke", post(oauth::revoke))
        .route("/auth/login", post(auth::login))
}
