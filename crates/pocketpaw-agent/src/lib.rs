//! PocketPaw Agent — core loop, tools, and context builder.
//!
//! This crate contains:
//! - **tools**: Tool trait, registry, and built-in tools (filesystem, shell, web, message)
//! - **context**: System prompt and message list construction
//! - **agent_loop**: The LLM ↔ tool-calling main loop

pub mod tools;
pub mod context;
pub mod guardian;
pub mod memory;
pub mod model_router;
pub mod plan;
pub mod skills;
pub mod subagent;
pub mod agent_loop;

pub use agent_loop::{AgentLoop, ExecToolConfig};
pub use context::ContextBuilder;
pub use guardian::Guardian;
pub use memory::MemoryStore;
pub use model_router::{ModelSelection, ModelTiers, TaskComplexity};
pub use plan::PlanManager;
pub use skills::SkillsLoader;
pub use subagent::SubagentManager;
pub use tools::{Tool, ToolRegistry};
pub use tools::policy::Policy;
