//! Memory Manager — the unified `save`/`get`/`delete`/`search` protocol
//! over long-term facts, daily notes, and the session index.
//!
//! Session *content* (message transcripts) stays in `SessionManager`; this
//! module owns long-term/daily `MemoryEntry` persistence and the session
//! index (`{title, channel, last_activity, message_count}`) that lets
//! `get_session`/`clear_session` present sessions through the same protocol.

pub mod manager;

pub use manager::{MemoryManager, SessionIndexEntry};
