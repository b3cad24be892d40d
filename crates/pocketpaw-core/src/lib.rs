//! PocketPaw Core — shared types, message bus, config, security rails, and utilities.
//!
//! This crate contains the primitives every other PocketPaw crate depends on:
//! - **types**: Chat message / tool-call wire types shared with providers.
//! - **bus**: The in-process pub/sub message bus (inbound/outbound/system).
//! - **config**: Settings schema, loader, env-var overrides.
//! - **session**: Session transcript persistence.
//! - **memory**: Long-term/daily `MemoryEntry` persistence + session index.
//! - **security**: Rails, audit log, rate limiter, session tokens, OAuth primitives.
//! - **heartbeat**: Periodic agent wake-up service.
//! - **utils**: Data-directory resolution and small shared helpers.

pub mod bus;
pub mod config;
pub mod heartbeat;
pub mod memory;
pub mod security;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::queue::MessageBus;
pub use bus::types::{InboundMessage, OutboundMessage, SystemEvent};
