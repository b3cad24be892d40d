//! REST/SSE/OAuth2 HTTP surface for PocketPaw.
//!
//! `serve()` is the library entry point: the caller assembles the same
//! runtime components `pocketpaw-cli`'s gateway command already builds
//! (bus, agent loop, channel manager, cron service) and hands them here
//! along with the security primitives (policy, audit, rate limiter, API
//! keys, OAuth server). This crate registers its two virtual channels,
//! builds the router, and runs the bound listener alongside the rest of
//! the runtime.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod virtual_channel;
pub mod webhook_channel;
pub mod websocket_channel;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pocketpaw_agent::plan::PlanManager;
use pocketpaw_agent::AgentLoop;
use pocketpaw_channels::ChannelManager;
use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::config::Settings;
use pocketpaw_core::memory::manager::MemoryManager;
use pocketpaw_core::security::{ApiKeyStore, AuditLog, AuthorizationServer, RateLimiter};
use pocketpaw_cron::CronService;

use crate::state::AppState;
use crate::virtual_channel::VirtualApiChannel;
use crate::webhook_channel::WebhookChannel;
use crate::websocket_channel::WebSocketChannel;

/// Register this crate's virtual channels into a `ChannelManager` the
/// caller still owns (mutably) before it's handed off to
/// `ChannelManager::start_all`. Returns the handles `ServeComponents` needs.
///
/// `register` takes `&mut self`, so this must run before the caller starts
/// its own `tokio::select!` over `channel_manager.start_all()` — the
/// manager can't be mutated again once that loop owns it.
pub fn register_virtual_channels(
    channel_manager: &mut ChannelManager,
) -> (Arc<VirtualApiChannel>, Arc<WebhookChannel>, Arc<WebSocketChannel>) {
    let virtual_channel = VirtualApiChannel::new();
    let webhook_channel = WebhookChannel::new();
    let websocket_channel = WebSocketChannel::new();
    channel_manager.register(virtual_channel.clone());
    channel_manager.register(webhook_channel.clone());
    channel_manager.register(websocket_channel.clone());
    (virtual_channel, webhook_channel, websocket_channel)
}

/// Everything `serve` needs, pre-built by the caller the same way
/// `pocketpaw-cli`'s gateway command already assembles its runtime. The
/// virtual channel handles come from [`register_virtual_channels`].
pub struct ServeComponents {
    pub bus: Arc<MessageBus>,
    pub agent_loop: Arc<AgentLoop>,
    pub virtual_channel: Arc<VirtualApiChannel>,
    pub webhook_channel: Arc<WebhookChannel>,
    pub websocket_channel: Arc<WebSocketChannel>,
    pub cron: Arc<CronService>,
    pub settings: Arc<Settings>,
    pub plans: Arc<PlanManager>,
    pub audit: Arc<AuditLog>,
    pub memory: Arc<MemoryManager>,
    pub api_keys: Arc<ApiKeyStore>,
    pub oauth: Arc<AuthorizationServer>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Build the router and serve on `bind_addr` until the process is
/// signaled to stop. Meant to be one arm of the caller's `tokio::select!`
/// alongside `agent_loop.run()`, `channel_manager.start_all()`, and
/// `cron.start()` — matching the gateway command's existing shutdown
/// pattern.
pub async fn serve(components: ServeComponents, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let session_secret = state::load_or_create_session_secret(None).await?;

    let app_state = AppState {
        bus: components.bus,
        agent_loop: components.agent_loop,
        virtual_channel: components.virtual_channel,
        webhook_channel: components.webhook_channel,
        websocket_channel: components.websocket_channel,
        settings: components.settings,
        plans: components.plans,
        audit: components.audit,
        memory: components.memory,
        api_keys: components.api_keys,
        oauth: components.oauth,
        rate_limiter: components.rate_limiter,
        cron: components.cron,
        session_secret: Arc::new(session_secret),
    };

    let authenticated = routes::authenticated_routes()
        .layer(middleware::from_fn_with_state(app_state.clone(), auth::auth_middleware));

    let app = axum::Router::new()
        .nest("/api/v1", authenticated)
        .merge(routes::public_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    info!(addr = %bind_addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
