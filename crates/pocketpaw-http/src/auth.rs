//! Layered authentication middleware.
//!
//! Tried in order, first match wins:
//! 1. Loopback origin (the request arrived over `127.0.0.1`/`::1`) — full access.
//! 2. `Bearer <master-token>` — full access.
//! 3. `Bearer <session-token>` (HMAC, TTL-bounded, minted by `/auth/session`) — full access.
//! 4. `Bearer pp_<...>` (API key, sha256-hashed at rest) — scoped access.
//! 5. `Bearer ppat_<...>` (OAuth2 access token) — scoped access.
//!
//! A successful match inserts an [`AuthContext`] request extension that
//! route handlers and [`require_scope`] read back out.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{unauthorized, ApiError, PocketPawError};
use crate::state::AppState;

/// The set of scopes a request is authorized for. `admin` satisfies any
/// scope check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeSet(HashSet<String>);

impl ScopeSet {
    /// Full access: any scope check passes.
    pub fn admin() -> Self {
        let mut set = HashSet::new();
        set.insert("admin".to_string());
        ScopeSet(set)
    }

    pub fn from_scopes(scopes: impl IntoIterator<Item = String>) -> Self {
        ScopeSet(scopes.into_iter().collect())
    }

    /// Whether this scope set satisfies `required` — either by holding
    /// `admin`, or `required` directly.
    pub fn allows(&self, required: &str) -> bool {
        self.0.contains("admin") || self.0.contains(required)
    }
}

/// Populated as a request extension by [`auth_middleware`] on every
/// successfully authenticated request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub scopes: ScopeSet,
    /// Human-readable identity for audit logging ("loopback", "master",
    /// a session subject, an API key name, or an OAuth client id).
    pub actor: String,
    /// Key the rate limiter buckets this request's caller under — distinct
    /// per caller identity (IP for loopback, hashed token otherwise) so one
    /// noisy API key can't exhaust another caller's budget.
    pub rate_limit_key: String,
}

fn is_loopback(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback()
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Short, non-reversible key for bucketing a bearer token without storing
/// the token (or its hash's full length) in rate limiter state.
fn token_bucket_key(prefix: &str, token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}:{hex}")
}

/// `axum::middleware::from_fn_with_state` entry point. Authenticates the
/// request, then consults the rate limiter keyed by the caller's identity —
/// a denial short-circuits with `429` before `next` ever runs.
pub async fn auth_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = if is_loopback(&addr) {
        AuthContext {
            scopes: ScopeSet::admin(),
            actor: "loopback".to_string(),
            rate_limit_key: format!("ip:{}", addr.ip()),
        }
    } else {
        let Some(token) = bearer_token(&req) else {
            return Err(unauthorized("missing bearer token"));
        };
        let token = token.to_string();

        let master_token = state.settings.get().await.security.master_token;
        if !master_token.is_empty() && token == master_token {
            AuthContext {
                scopes: ScopeSet::admin(),
                actor: "master".to_string(),
                rate_limit_key: "master".to_string(),
            }
        } else if pocketpaw_core::security::session_tokens::verify(&state.session_secret, &token) {
            AuthContext {
                scopes: ScopeSet::admin(),
                actor: "session".to_string(),
                rate_limit_key: token_bucket_key("session", &token),
            }
        } else if pocketpaw_core::security::api_keys::looks_like_api_key(&token) {
            match state.api_keys.verify(&token).await {
                Some(scopes) => AuthContext {
                    scopes: ScopeSet::from_scopes(scopes),
                    actor: "api_key".to_string(),
                    rate_limit_key: token_bucket_key("apikey", &token),
                },
                None => return Err(unauthorized("invalid or revoked API key")),
            }
        } else if let Some(scope) = state.oauth.verify_access_token(&token).await {
            let scopes = scope.split_whitespace().map(str::to_string).collect::<Vec<_>>();
            AuthContext {
                scopes: ScopeSet::from_scopes(scopes),
                actor: "oauth".to_string(),
                rate_limit_key: token_bucket_key("oauth", &token),
            }
        } else {
            return Err(unauthorized("invalid bearer token"));
        }
    };

    if let pocketpaw_core::security::rate_limit::Decision::Denied { retry_after_secs } =
        state.rate_limiter.allow(&ctx.rate_limit_key)
    {
        return Err(ApiError(PocketPawError::RateLimited { retry_after_secs }));
    }

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Fail with 403 unless `ctx` satisfies `required`. Handlers extract
/// `Extension<AuthContext>` (populated by [`auth_middleware`]) and call this
/// before doing anything scope-gated.
pub fn require_scope(ctx: &AuthContext, required: &str) -> Result<(), ApiError> {
    if ctx.scopes.allows(required) {
        Ok(())
    } else {
        Err(crate::error::forbidden(format!("scope '{required}' required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_scope_allows_anything() {
        let scopes = ScopeSet::admin();
        assert!(scopes.allows("chat"));
        assert!(scopes.allows("settings:write"));
    }

    #[test]
    fn test_scoped_set_requires_exact_match() {
        let scopes = ScopeSet::from_scopes(vec!["chat".to_string()]);
        assert!(scopes.allows("chat"));
        assert!(!scopes.allows("settings:write"));
    }

    #[test]
    fn test_loopback_detection() {
        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        let remote: SocketAddr = "93.184.216.34:443".parse().unwrap();
        assert!(is_loopback(&v4));
        assert!(is_loopback(&v6));
        assert!(!is_loopback(&remote));
    }

    #[test]
    fn test_token_bucket_key_is_deterministic_and_scoped_by_prefix() {
        let a = token_bucket_key("apikey", "pp_sometoken");
        let b = token_bucket_key("apikey", "pp_sometoken");
        let c = token_bucket_key("oauth", "pp_sometoken");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("apikey:"));
    }
}
