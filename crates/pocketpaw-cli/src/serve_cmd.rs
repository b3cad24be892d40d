//! `pocketpaw serve` — run the HTTP/SSE/WebSocket surface alongside the
//! gateway's agent loop, cron service, and heartbeat.
//!
//! Shares its startup sequence with [`crate::gateway::run`] (same bus,
//! provider, agent loop, channel manager, cron) but additionally builds the
//! security primitives `pocketpaw-http` needs (API key store, OAuth server,
//! rate limiter, memory manager) and binds an HTTP listener. Exit codes:
//! `0` clean shutdown, `1` configuration error, `2` a required dependency
//! (provider, workspace) could not be initialized.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pocketpaw_agent::plan::PlanManager;
use pocketpaw_agent::{AgentLoop, ExecToolConfig, Guardian, ModelTiers, Policy};
use pocketpaw_channels::ChannelManager;
use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::config::{load_config, Settings};
use pocketpaw_core::heartbeat::HeartbeatService;
use pocketpaw_core::memory::manager::MemoryManager;
use pocketpaw_core::security::{ApiKeyStore, AuditLog, AuthorizationServer, RateLimiter};
use pocketpaw_core::session::SessionManager;
use pocketpaw_cron::CronService;
use pocketpaw_http::{register_virtual_channels, serve, ServeComponents};
use pocketpaw_providers::http_provider::create_provider;

use crate::helpers;

/// Run `pocketpaw serve`. Returns an error for the caller to translate into
/// the documented exit codes (1 = configuration, 2 = dependency).
pub async fn run(host: String, port: u16, dev: bool) -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: Serve (HTTP)");
    println!();

    let config = load_config(None);
    let defaults = &config.agents.defaults;

    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let bus = Arc::new(MessageBus::new(100));

    let model = &defaults.model;
    let providers_map = config.providers.to_map();
    let provider = create_provider(model, &providers_map).map_err(|e| anyhow::anyhow!(e))?;

    let brave_key = if config.tools.web.search.api_key.is_empty() {
        None
    } else {
        Some(config.tools.web.search.api_key.clone())
    };

    let session_manager = Arc::new(
        SessionManager::new(None).context("failed to create session manager")?,
    );

    let security = &config.security;
    let policy = Policy::new(
        security.policy_profile.clone(),
        security.policy_allow.clone(),
        security.policy_deny.clone(),
    );
    let plan_manager = Arc::new(PlanManager::new());
    let audit_log = Arc::new(
        AuditLog::open(None)
            .await
            .context("failed to open audit log")?,
    );

    // Guardian's own provider handle: a fresh client against the same
    // configured backend, `None` when no provider at all is reachable —
    // Guardian is then disabled-fail-open per §4.6.
    let guardian_provider = create_provider(model, &providers_map)
        .ok()
        .map(|p| Arc::new(p) as Arc<dyn pocketpaw_providers::traits::LlmProvider>);
    let guardian = Arc::new(Guardian::new(guardian_provider, model, audit_log.clone()));

    let tiers = &defaults.model_tiers;
    let model_tiers = ModelTiers {
        simple: tiers.simple.clone(),
        moderate: tiers.moderate.clone(),
        complex: tiers.complex.clone(),
    };

    let agent_loop = Arc::new(
        AgentLoop::new(
            bus.clone(),
            Arc::new(provider),
            workspace.clone(),
            Some(model.to_string()),
            Some(defaults.max_tool_iterations as usize),
            None,
            brave_key,
            Some(ExecToolConfig::default()),
            config.tools.restrict_to_workspace,
            Some(session_manager),
            None,
        )
        .with_policy(policy)
        .with_plan_manager(plan_manager.clone())
        .with_audit_log(audit_log.clone())
        .with_plan_mode(security.plan_mode)
        .with_guardian(guardian)
        .with_model_tiers(model_tiers),
    );

    let cron_service = Arc::new(CronService::new(bus.clone(), None));
    if let Err(e) = cron_service.load().await {
        tracing::warn!(error = %e, "failed to pre-load cron store");
    }

    let heartbeat = {
        let agent = agent_loop.clone();
        let callback: pocketpaw_core::heartbeat::OnHeartbeatFn = Arc::new(move |prompt| {
            let agent = agent.clone();
            Box::pin(async move { agent.process_direct(&prompt).await })
        });
        Arc::new(HeartbeatService::new(
            workspace.clone(),
            Some(callback),
            None,
            true,
        ))
    };

    let mut channel_manager = ChannelManager::new(bus.clone());
    let (virtual_channel, webhook_channel, websocket_channel) =
        register_virtual_channels(&mut channel_manager);

    crate::gateway::register_configured_channels(&mut channel_manager, &config, &bus);

    let settings = Arc::new(Settings::load(None));
    let memory = Arc::new(
        MemoryManager::new(None).context("failed to create memory manager")?,
    );
    let api_keys = Arc::new(
        ApiKeyStore::open(None)
            .await
            .context("failed to open API key store")?,
    );
    let oauth = Arc::new(AuthorizationServer::new());
    let rate_limiter = Arc::new(RateLimiter::new(5.0, 20.0));

    let components = ServeComponents {
        bus: bus.clone(),
        agent_loop: agent_loop.clone(),
        virtual_channel,
        webhook_channel,
        websocket_channel,
        cron: cron_service.clone(),
        settings,
        plans: plan_manager,
        audit: audit_log,
        memory,
        api_keys,
        oauth,
        rate_limiter,
    };

    let bind_addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address '{host}:{port}'"))?;

    println!("  Model:     {model}");
    println!("  Workspace: {}", workspace.display());
    println!("  Listening: http://{bind_addr}");
    if dev {
        println!("  Dev mode:  CORS permissive, verbose logging");
    }
    println!();
    println!("  Ctrl+C to stop");
    println!();

    tokio::select! {
        result = serve(components, bind_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
                return Err(e);
            }
        }
        _ = agent_loop.run() => {
            info!("agent loop exited");
        }
        result = channel_manager.start_all() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "channel manager error");
            }
        }
        result = cron_service.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cron service error");
            }
        }
        result = heartbeat.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "heartbeat service error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            heartbeat.stop();
            cron_service.stop().await;
            channel_manager.stop_all().await;
        }
    }

    println!("  Server stopped. Goodbye!");
    Ok(())
}
