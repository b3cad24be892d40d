//! Security module — rails, audit log, rate limiter, session tokens, API
//! keys, and the OAuth2 PKCE authorization server.
//!
//! These are the shared primitives of the cross-cutting guard layer:
//! filesystem/command rails and the audit log are consumed by every gated
//! tool call; rate limiter, session tokens, API keys, and OAuth sit behind
//! the HTTP surface's auth middleware.

pub mod api_keys;
pub mod audit;
pub mod injection_scan;
pub mod oauth;
pub mod rails;
pub mod rate_limit;
pub mod session_tokens;

pub use api_keys::ApiKeyStore;
pub use audit::AuditLog;
pub use injection_scan::InjectionScanner;
pub use oauth::AuthorizationServer;
pub use rate_limit::RateLimiter;
