//! PocketPaw CLI — entry point.
//!
//! PocketPaw CLI entry point.
//!
//! # Commands
//!
//! - `pocketpaw agent [-m MESSAGE] [-s SESSION]` — main chat (single-shot or REPL)
//! - `pocketpaw onboard` — initialize config + workspace
//! - `pocketpaw status` — show configuration and provider status

mod helpers;
mod onboard;
mod repl;
mod status;
mod gateway;
mod cron_cmd;
mod channels_cmd;
mod serve_cmd;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pocketpaw_agent::plan::PlanManager;
use pocketpaw_agent::{AgentLoop, ExecToolConfig, Guardian, ModelTiers, Policy};
use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::config::{load_config, Config};
use pocketpaw_core::security::AuditLog;
use pocketpaw_core::session::SessionManager;
use pocketpaw_providers::http_provider::create_provider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🦀 PocketPaw — Ultra-lightweight AI assistant in Rust
#[derive(Parser)]
#[command(name = "pocketpaw", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the AI agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Session identifier (format: "channel:id")
        #[arg(short, long, default_value = "cli:default")]
        session: String,

        /// Disable Markdown rendering in output
        #[arg(long, default_value_t = false)]
        no_markdown: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Initialize configuration and workspace
    Onboard,

    /// Show configuration and provider status
    Status,

    /// Start the gateway (all channels + agent loop)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Manage scheduled tasks
    Cron {
        #[command(subcommand)]
        action: cron_cmd::CronCommands,
    },

    /// Manage chat channels
    Channels {
        #[command(subcommand)]
        action: channels_cmd::ChannelsCommands,
    },

    /// Run the HTTP/SSE/WebSocket server (REST API, OAuth2, `/ws/chat`)
    Serve {
        /// Bind host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(long, default_value_t = 8420)]
        port: u16,

        /// Permissive CORS and verbose logging for local frontend development
        #[arg(long, default_value_t = false)]
        dev: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            session,
            no_markdown,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, session, !no_markdown, logs).await
        }
        Commands::Onboard => onboard::run(),
        Commands::Status => status::run(),
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Cron { action } => {
            init_logging(false);
            cron_cmd::dispatch(action).await
        }
        Commands::Channels { action } => channels_cmd::dispatch(action),
        Commands::Serve { host, port, dev } => {
            init_logging(dev);
            match serve_cmd::run(host, port, dev).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e:#}");
                    // A provider/model the config names but can't construct is a
                    // missing dependency (exit 2); anything else (bad bind
                    // address, unwritable workspace, ...) is a config problem.
                    let code = if e.to_string().contains("provider") {
                        2
                    } else {
                        1
                    };
                    std::process::exit(code);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(
    message: Option<String>,
    session_id: String,
    render_markdown: bool,
    show_logs: bool,
) -> Result<()> {
    let config = load_config(None);
    let agent_loop = build_agent_loop(&config).await?;

    match message {
        Some(msg) => {
            // Single-shot mode
            info!(session = %session_id, "processing single message");
            let response = agent_loop
                .process_direct(&msg)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response, render_markdown);
        }
        None => {
            // Interactive REPL mode
            repl::run(agent_loop, &session_id, render_markdown, show_logs).await?;
        }
    }

    Ok(())
}

/// Build an `AgentLoop` from the loaded configuration.
pub async fn build_agent_loop(config: &Config) -> Result<AgentLoop> {
    let defaults = &config.agents.defaults;

    // Resolve workspace path (expand ~)
    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    // Resolve model
    let model = &defaults.model;

    // Create provider
    let providers_map = config.providers.to_map();
    let provider = create_provider(model, &providers_map)
        .map_err(|e| anyhow::anyhow!(e))?;

    // Brave API key
    let brave_key = if config.tools.web.search.api_key.is_empty() {
        None
    } else {
        Some(config.tools.web.search.api_key.clone())
    };

    // Build agent loop
    let bus = Arc::new(MessageBus::new(100));
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

    let agent_loop = AgentLoop::new(
        bus,
        Arc::new(provider),
        workspace,
        Some(model.to_string()),
        Some(defaults.max_tool_iterations as usize),
        None, // uses defaults for temperature/max_tokens
        brave_key,
        Some(ExecToolConfig::default()),
        config.tools.restrict_to_workspace,
        Some(session_manager),
        None, // default agent name "PocketPaw"
    )
    .with_policy(policy)
    .with_plan_manager(plan_manager)
    .with_audit_log(audit_log)
    .with_plan_mode(security.plan_mode)
    .with_guardian(guardian)
    .with_model_tiers(model_tiers);

    Ok(agent_loop)
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("pocketpaw=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
