//! Message bus — in-process pub/sub connecting channels, the agent loop, and
//! the HTTP surface.

pub mod queue;
pub mod types;

// Re-export key types
pub use queue::{MessageBus, SubscriptionId};
pub use types::{InboundMessage, OutboundMessage, SystemEvent};
