//! Agent loop — the LLM ↔ tool-calling main loop.
//!
//! The LLM <-> tool-calling main loop.
//! Receives inbound messages, builds context, calls the LLM, dispatches
//! tool calls, and publishes outbound responses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, error, info, warn};

use pocketpaw_core::bus::queue::MessageBus;
use pocketpaw_core::bus::types::{InboundMessage, OutboundMessage, SystemEvent};
use pocketpaw_core::security::{AuditLog, InjectionScanner};
use pocketpaw_core::session::manager::SessionManager;
use pocketpaw_core::types::{AuditEvent, AuditSeverity, Message, PlanStep, ToolCall, TrustLevel};
use pocketpaw_providers::traits::{LlmProvider, LlmRequestConfig};
use tokio_util::sync::CancellationToken;

use crate::context::ContextBuilder;
use crate::guardian::Guardian;
use crate::model_router::{self, ModelTiers};
use crate::plan::{PlanManager, WaitOutcome};
use crate::subagent::SubagentManager;
use crate::tools::message::MessageTool;
use crate::tools::policy::Policy;
use crate::tools::registry::ToolRegistry;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// How long a `Critical`-trust tool call waits for plan approval.
const PLAN_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);
/// Max characters of a tool result kept in the audit log's context field.
const AUDIT_PREVIEW_LEN: usize = 200;

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Configuration for the exec tool.
#[derive(Clone, Debug)]
pub struct ExecToolConfig {
    /// Timeout in seconds (default 60).
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    /// Message bus for inbound/outbound messages.
    bus: Arc<MessageBus>,
    /// LLM provider.
    provider: Arc<dyn LlmProvider>,
    /// Workspace root.
    workspace: PathBuf,
    /// Exec tool timeout, kept so `with_guardian` can rebuild the tool with
    /// the same configuration plus a Guardian attached.
    exec_timeout_secs: u64,
    /// Exec tool workspace restriction, same reason as `exec_timeout_secs`.
    restrict_to_workspace: bool,
    /// Model to use (overrides provider default if set).
    model: String,
    /// Max LLM ↔ tool iterations per message.
    max_iterations: usize,
    /// LLM request config (temperature, max_tokens).
    request_config: LlmRequestConfig,
    /// Tool registry.
    tools: ToolRegistry,
    /// Context builder.
    context: ContextBuilder,
    /// Session manager, shared with any HTTP surface reading transcripts.
    sessions: Arc<SessionManager>,
    /// Reference to the message tool (for set_context).
    message_tool: Arc<MessageTool>,
    /// Spawn tool reference (for set_context).
    spawn_tool: Arc<SpawnTool>,
    /// Subagent manager (also held by SpawnTool; kept for direct access).
    #[allow(dead_code)]
    subagent_manager: Arc<SubagentManager>,
    /// Tool policy gate. `None` means every tool call is permitted.
    policy: Option<Policy>,
    /// Plan Manager for `Critical`-trust approval gating.
    plans: Option<Arc<PlanManager>>,
    /// Audit log for tool-attempt/tool-result events.
    audit: Option<Arc<AuditLog>>,
    /// Post-execution heuristic scan over tool output.
    injection_scanner: InjectionScanner,
    /// Per-tier models consulted by the Model Router. `None` means every
    /// turn uses `model` regardless of message shape.
    model_tiers: Option<ModelTiers>,
    /// When true, `Critical`-trust tool calls are appended to the session's
    /// plan and block on approval instead of executing immediately.
    plan_mode: bool,
    /// Cancellation token for each turn currently in flight, keyed by
    /// session key. `cancel()` trips the entry for `/chat/stop`; the turn
    /// loop in `process_message` removes its own entry once it returns.
    cancellations: std::sync::Mutex<HashMap<String, CancellationToken>>,
}

impl AgentLoop {
    /// Create a new agent loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        model: Option<String>,
        max_iterations: Option<usize>,
        request_config: Option<LlmRequestConfig>,
        brave_api_key: Option<String>,
        exec_config: Option<ExecToolConfig>,
        restrict_to_workspace: bool,
        session_manager: Option<Arc<SessionManager>>,
        agent_name: Option<String>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let request_config = request_config.unwrap_or_default();
        let exec_config = exec_config.unwrap_or_default();
        let agent_name = agent_name.unwrap_or_else(|| "PocketPaw".into());
        let sessions = session_manager.unwrap_or_else(|| {
            Arc::new(SessionManager::new(None).expect("failed to create session manager"))
        });

        let context = ContextBuilder::new(&workspace, &agent_name);

        // Build tool registry
        let mut tools = ToolRegistry::new();
        let allowed_dir = if restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            workspace.clone(),
            Some(exec_config.timeout),
            restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let message_tool = Arc::new(MessageTool::new(None));
        tools.register(message_tool.clone());

        // Subagent manager + spawn tool
        let subagent_manager = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace.clone(),
            bus.clone(),
            model.clone(),
            brave_api_key,
            exec_config,
            restrict_to_workspace,
            request_config.clone(),
        ));

        let spawn_tool = Arc::new(SpawnTool::new(subagent_manager.clone()));
        tools.register(spawn_tool.clone());

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            workspace,
            exec_timeout_secs: exec_config.timeout,
            restrict_to_workspace,
            model,
            max_iterations,
            request_config,
            tools,
            context,
            sessions,
            message_tool,
            spawn_tool,
            subagent_manager,
            policy: None,
            plans: None,
            audit: None,
            injection_scanner: InjectionScanner::new(),
            model_tiers: None,
            plan_mode: false,
            cancellations: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Attach a tool policy gate. Without one, every registered tool is
    /// callable.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attach a Plan Manager for `Critical`-trust approval gating.
    pub fn with_plan_manager(mut self, plans: Arc<PlanManager>) -> Self {
        self.plans = Some(plans);
        self
    }

    /// Attach the audit log tool calls are recorded to.
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Enable the Model Router: each turn's model is picked from `tiers`
    /// based on the inbound message's shape (§4.7 step 2) instead of always
    /// using the constructor's fixed `model`.
    pub fn with_model_tiers(mut self, tiers: ModelTiers) -> Self {
        self.model_tiers = Some(tiers);
        self
    }

    /// Resolve the model to use for this turn: the Model Router's pick when
    /// tiers are configured, otherwise the loop's fixed default.
    fn turn_model(&self, user_text: &str) -> String {
        match &self.model_tiers {
            Some(tiers) => {
                let selection = model_router::classify(user_text, tiers);
                debug!(
                    complexity = selection.complexity.as_str(),
                    model = %selection.model,
                    reason = %selection.reason,
                    "model router selection"
                );
                selection.model
            }
            None => self.model.clone(),
        }
    }

    /// Enable plan mode: `Critical`-trust tool calls require approval via
    /// `PlanManager::approve_plan` before they run.
    pub fn with_plan_mode(mut self, enabled: bool) -> Self {
        self.plan_mode = enabled;
        self
    }

    /// Attach a Guardian scanner to the shell tool. Re-registers `exec` with
    /// the same workspace/timeout/restriction it was built with, now wrapped
    /// with a Guardian pass after the static rails check (§4.6 — the shell
    /// tool is the only caller of Guardian).
    pub fn with_guardian(mut self, guardian: Arc<Guardian>) -> Self {
        let exec = ExecTool::new(
            self.workspace.clone(),
            Some(self.exec_timeout_secs),
            self.restrict_to_workspace,
        )
        .with_guardian(guardian);
        self.tools.register(Arc::new(exec));
        self
    }

    /// Trip the cancellation token for the turn in flight on `session_key`,
    /// if there is one. Returns whether a turn was found. The turn loop
    /// notices on its own next check and unwinds without waiting for the
    /// current LLM call or tool to finish naturally.
    pub fn cancel(&self, session_key: &str) -> bool {
        match self.cancellations.lock().unwrap().get(session_key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Dispatch a single tool call through the gated pipeline: policy check,
    /// attempt audit, plan-mode interposition (Critical trust only), execute,
    /// result audit, post-execution injection scan.
    ///
    /// Always returns a string — callers never see a Rust `Err` here, same
    /// contract as `ToolRegistry::execute`.
    async fn execute_tool_gated(
        &self,
        session_key: &str,
        tool_name: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> String {
        let Some(tool) = self.tools.get(tool_name) else {
            return format!("Error: Tool '{tool_name}' not found");
        };
        let group = tool.group().to_string();
        let trust = tool.trust_level();

        if let Some(policy) = &self.policy {
            if !policy.is_allowed(tool_name, &group) {
                if let Some(audit) = &self.audit {
                    audit
                        .log(AuditEvent::new(
                            AuditSeverity::Warning,
                            session_key,
                            "tool_denied",
                            tool_name,
                            "denied",
                        ))
                        .await;
                }
                return format!("Error: tool '{tool_name}' is not permitted by the current policy");
            }
        }

        if let Some(audit) = &self.audit {
            audit
                .log(AuditEvent::new(
                    trust.audit_severity(),
                    session_key,
                    "tool_attempt",
                    tool_name,
                    "attempt",
                ))
                .await;
        }

        if self.plan_mode && trust == TrustLevel::Critical {
            if let Some(plans) = &self.plans {
                let preview = format!("Call {tool_name}");
                let step = PlanStep {
                    tool_name: tool_name.to_string(),
                    tool_input: serde_json::to_value(&params).unwrap_or(serde_json::Value::Null),
                    preview: preview.clone(),
                };
                plans.add_step_to_plan(session_key, step).await;

                let _ = self
                    .bus
                    .publish_system(
                        SystemEvent::new("plan_proposed", preview)
                            .with_metadata(json!({"session_key": session_key, "tool": tool_name})),
                    )
                    .await;

                match plans.wait_for_approval(session_key, PLAN_APPROVAL_TIMEOUT).await {
                    WaitOutcome::Approved => {
                        plans.mark_executing(session_key).await;
                    }
                    WaitOutcome::Rejected | WaitOutcome::Timeout => {
                        if let Some(audit) = &self.audit {
                            audit
                                .log(AuditEvent::new(
                                    AuditSeverity::Warning,
                                    session_key,
                                    "tool_rejected",
                                    tool_name,
                                    "rejected",
                                ))
                                .await;
                        }
                        return format!("Tool '{tool_name}' was not approved for execution.");
                    }
                }
            }
        }

        let raw = self.tools.execute(tool_name, params).await;
        let (threat, sanitized) = self.injection_scanner.scan(&raw);

        if let Some(audit) = &self.audit {
            let status = if raw.starts_with("Error") { "error" } else { "success" };
            let preview: String = sanitized.chars().take(AUDIT_PREVIEW_LEN).collect();
            audit
                .log(
                    AuditEvent::new(trust.audit_severity(), session_key, "tool_result", tool_name, status)
                        .with_context(json!({"preview": preview, "threat": format!("{threat:?}")})),
                )
                .await;
        }

        if self.plan_mode && trust == TrustLevel::Critical {
            if let Some(plans) = &self.plans {
                plans.mark_completed(session_key).await;
            }
        }

        sanitized
    }

    /// Run the event loop: poll inbound messages and process them.
    ///
    /// This runs indefinitely until the inbound channel is closed.
    pub async fn run(&self) {
        info!("agent loop started, waiting for messages");
        loop {
            match self.bus.consume_inbound().await {
                Some(msg) => {
                    let session_key = msg.session_key();
                    debug!(session_key = %session_key, "received message");

                    // Route system messages (from subagents) vs regular messages
                    let result = if msg.channel == "system" && msg.sender_id == "subagent" {
                        self.process_system_message(&msg).await
                    } else {
                        self.process_message(&msg).await
                    };

                    match result {
                        Ok(response) => {
                            self.publish_streamed(response).await;
                        }
                        Err(e) => {
                            error!(error = %e, session_key = %session_key, "message processing error");
                            let _ = self
                                .bus
                                .publish_system(SystemEvent::new("error", e.to_string()).with_metadata(
                                    json!({"session_key": session_key}),
                                ))
                                .await;
                            let err_msg = OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                &format!("I encountered an error: {e}"),
                            );
                            self.publish_streamed(err_msg).await;
                        }
                    }
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Publish a final response as the `chunk`/`stream_end` pair channel
    /// adapters and the HTTP SSE bridge expect, instead of one opaque
    /// message. `reply_to`/`media`/`metadata` travel on the chunk; the end
    /// marker carries only the session key in its metadata.
    async fn publish_streamed(&self, response: OutboundMessage) {
        let channel = response.channel.clone();
        let chat_id = response.chat_id.clone();

        if !response.content.is_empty() {
            let chunk = OutboundMessage::stream_chunk(&channel, &chat_id, &response.content);
            let chunk = OutboundMessage {
                reply_to: response.reply_to,
                media: response.media,
                metadata: response.metadata,
                ..chunk
            };
            if let Err(e) = self.bus.publish_outbound(chunk).await {
                error!(error = %e, "failed to publish outbound chunk");
            }
        }

        let mut end = OutboundMessage::stream_end(&channel, &chat_id);
        end.metadata
            .insert("session_key".to_string(), format!("{channel}:{chat_id}"));
        if let Err(e) = self.bus.publish_outbound(end).await {
            error!(error = %e, "failed to publish stream end");
        }
    }

    /// Process a single inbound message → outbound response.
    ///
    /// This is the core agent logic:
    /// 1. Get/create session, load history
    /// 2. Build context messages
    /// 3. LLM ↔ tool loop
    /// 4. Save session, return response
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();

        // Set message tool context for this conversation
        self.message_tool
            .set_context(&msg.channel, &msg.chat_id)
            .await;

        // Set spawn tool context for this conversation
        self.spawn_tool
            .set_context(&msg.channel, &msg.chat_id)
            .await;

        // Get session history
        let history = self.sessions.get_history(&session_key, 50);

        // Build LLM messages
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();
        let mut messages = self.context.build_messages(
            &history,
            &msg.content,
            &media_paths,
            &msg.channel,
            &msg.chat_id,
        );

        // Get tool definitions
        let tool_defs = self.tools.get_definitions();

        // Model Router: pick this turn's model once, from the user's raw
        // text, before the first LLM call (§4.7 step 2).
        let model = self.turn_model(&msg.content);

        let cancel_token = CancellationToken::new();
        self.cancellations
            .lock()
            .unwrap()
            .insert(session_key.clone(), cancel_token.clone());

        // Agent loop: LLM ↔ tool calling
        let mut final_content: Option<String> = None;
        let mut cancelled = false;

        for iteration in 0..self.max_iterations {
            if cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }
            debug!(iteration = iteration, "LLM call");

            let response = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                resp = self.provider.chat(&messages, Some(&tool_defs), &model, &self.request_config) => resp,
            };

            if response.has_tool_calls() {
                // Add assistant message with tool calls
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                );

                // Execute each tool call
                for tc in &tool_calls {
                    if cancel_token.is_cancelled() {
                        cancelled = true;
                        break;
                    }

                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(
                        tool = %tc.function.name,
                        iteration = iteration,
                        "executing tool call"
                    );

                    let _ = self
                        .bus
                        .publish_system(
                            SystemEvent::new("tool_use", tc.function.name.clone())
                                .with_metadata(json!({"session_key": session_key, "tool": tc.function.name})),
                        )
                        .await;

                    let result = self.execute_tool_gated(&session_key, &tc.function.name, params).await;

                    debug!(
                        tool = %tc.function.name,
                        result_len = result.len(),
                        "tool result"
                    );

                    let preview: String = result.chars().take(AUDIT_PREVIEW_LEN).collect();
                    let _ = self
                        .bus
                        .publish_system(
                            SystemEvent::new("tool_result", preview)
                                .with_metadata(json!({"session_key": session_key, "tool": tc.function.name})),
                        )
                        .await;

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }

                if cancelled {
                    break;
                }
            } else {
                // No tool calls → final answer
                final_content = response.content;
                break;
            }
        }

        self.cancellations.lock().unwrap().remove(&session_key);

        // If we exhausted iterations without a final answer, or the turn
        // was cancelled mid-flight, say so instead of sending a partial or
        // stale answer.
        let content = if cancelled {
            info!(session_key = %session_key, "turn cancelled");
            "Cancelled.".to_string()
        } else {
            final_content
                .unwrap_or_else(|| "I've completed processing but have no response to give.".into())
        };

        // Save conversation to session
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
    }

    /// Process a system message (from a subagent or cron).
    ///
    /// Parses the original `channel:chat_id` from `msg.chat_id`,
    /// loads the original session, runs a full LLM call to summarize
    /// the result, and routes the response back to the correct channel.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(
            sender = %msg.sender_id,
            chat_id = %msg.chat_id,
            "processing system message"
        );

        // Parse origin from chat_id format "channel:chat_id"
        let (origin_channel, origin_chat_id) = match msg.chat_id.split_once(':') {
            Some((ch, cid)) => (ch.to_string(), cid.to_string()),
            None => {
                return Err(anyhow::anyhow!(
                    "Invalid system message chat_id format: {}",
                    msg.chat_id
                ));
            }
        };

        let session_key = format!("{origin_channel}:{origin_chat_id}");

        // Set tools context to the original channel/chat
        self.message_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;
        self.spawn_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;

        // Load the original session
        let history = self.sessions.get_history(&session_key, 50);

        // Build messages with the subagent result as the "user" message
        let mut messages =
            self.context
                .build_messages(&history, &msg.content, &[], &origin_channel, &origin_chat_id);

        let tool_defs = self.tools.get_definitions();
        let mut final_content: Option<String> = None;

        for iteration in 0..self.max_iterations {
            debug!(iteration = iteration, "system message LLM call");

            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if response.has_tool_calls() {
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                );

                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    let result = self.execute_tool_gated(&session_key, &tc.function.name, params).await;
                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let content = final_content
            .unwrap_or_else(|| "I've completed processing but have no response to give.".into());

        // Save to the original session
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        // Route response to the original channel/chat
        Ok(OutboundMessage::new(
            &origin_channel,
            &origin_chat_id,
            &content,
        ))
    }

    /// Direct processing mode (CLI entry point).
    ///
    /// Wraps text into an `InboundMessage` on the "cli" channel and processes.
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    /// Get a reference to the tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Shared session manager, for HTTP surfaces reading/listing transcripts.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Shared message bus, for HTTP surfaces publishing inbound chat turns
    /// or subscribing to the system-event topic.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
