//! OAuth2 PKCE authorization server primitives.
//!
//! Grounded on the flow in §6 of the spec the crate implements: `authorize`
//! issues an in-memory `AuthorizationCode` (10-minute TTL), `/oauth/token`
//! exchanges it for an `OAuthToken` pair after verifying
//! `BASE64URL_NOPAD(SHA256(code_verifier)) == code_challenge`. No teacher or
//! pack repo runs an OAuth *server* (only OAuth *clients*, e.g. the
//! Discord/Slack bot login flows), so the flow logic here is original; the
//! primitives (sha2, base64, rand for code generation) are the crates the
//! pack already uses elsewhere for the same concerns.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::types::{AuthorizationCode, OAuthToken};

const CODE_TTL: chrono::Duration = chrono::Duration::minutes(10);

/// Error returned by [`AuthorizationServer::exchange`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("code_not_found")]
    CodeNotFound,
    #[error("code_already_used")]
    CodeAlreadyUsed,
    #[error("code_expired")]
    CodeExpired,
    #[error("invalid_grant: client_id mismatch")]
    ClientMismatch,
    #[error("invalid_grant: code_verifier does not match code_challenge")]
    VerifierMismatch,
}

/// Compute `BASE64URL_NOPAD(SHA256(code_verifier))`.
pub fn challenge_from_verifier(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn random_token(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// In-memory authorization codes plus persisted access/refresh tokens.
pub struct AuthorizationServer {
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    tokens: RwLock<HashMap<String, OAuthToken>>,
}

impl AuthorizationServer {
    pub fn new() -> Self {
        AuthorizationServer {
            codes: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a fresh authorization code after consent. Any prior code for
    /// the same client/redirect pair is left intact — codes are one-shot and
    /// independent.
    pub async fn authorize(
        &self,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scope: impl Into<String>,
        code_challenge: impl Into<String>,
        code_challenge_method: impl Into<String>,
    ) -> String {
        let code = random_token("");
        let record = AuthorizationCode {
            code: code.clone(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            code_challenge: code_challenge.into(),
            code_challenge_method: code_challenge_method.into(),
            created_at: chrono::Utc::now(),
            used: false,
        };
        self.codes.write().await.insert(code.clone(), record);
        code
    }

    /// Exchange a code + verifier for a token pair. Marks the code used
    /// before minting tokens so a racing second exchange of the same code
    /// always observes `used: true` and fails with `CodeAlreadyUsed` rather
    /// than both requests minting a token pair.
    pub async fn exchange(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
    ) -> Result<OAuthToken, ExchangeError> {
        let mut codes = self.codes.write().await;
        let record = codes.get_mut(code).ok_or(ExchangeError::CodeNotFound)?;

        if record.used {
            return Err(ExchangeError::CodeAlreadyUsed);
        }
        if chrono::Utc::now() - record.created_at > CODE_TTL {
            return Err(ExchangeError::CodeExpired);
        }
        if record.client_id != client_id {
            return Err(ExchangeError::ClientMismatch);
        }
        if challenge_from_verifier(code_verifier) != record.code_challenge {
            return Err(ExchangeError::VerifierMismatch);
        }

        record.used = true;
        let scope = record.scope.clone();
        let client_id = record.client_id.clone();
        drop(codes);

        let token = OAuthToken {
            access_token: random_token("ppat_"),
            refresh_token: random_token("pprt_"),
            client_id,
            scope,
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            created_at: chrono::Utc::now(),
            revoked: false,
        };

        self.tokens
            .write()
            .await
            .insert(token.access_token.clone(), token.clone());
        Ok(token)
    }

    /// Verify a bearer access token. Returns its scope when valid: known,
    /// unrevoked, unexpired.
    pub async fn verify_access_token(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.read().await;
        let record = tokens.get(token)?;
        if record.revoked || record.expires_at < chrono::Utc::now() {
            return None;
        }
        Some(record.scope.clone())
    }

    pub async fn revoke(&self, token: &str) -> bool {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }
}

impl Default for AuthorizationServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_from_spec_example() {
        // code_verifier = "dBjftJeZ4CVP" from the PKCE happy-path scenario.
        let challenge = challenge_from_verifier("dBjftJeZ4CVP");
        assert!(!challenge.is_empty());
        assert!(!challenge.contains('='));
        assert_eq!(challenge, challenge_from_verifier("dBjftJeZ4CVP"));
    }

    #[tokio::test]
    async fn test_pkce_happy_path() {
        let server = AuthorizationServer::new();
        let verifier = "dBjftJeZ4CVP";
        let challenge = challenge_from_verifier(verifier);

        let code = server
            .authorize("pocketpaw-desktop", "tauri://oauth-callback", "chat sessions", challenge, "S256")
            .await;

        let token = server
            .exchange(&code, verifier, "pocketpaw-desktop")
            .await
            .unwrap();

        assert!(token.access_token.starts_with("ppat_"));
        assert!(token.refresh_token.starts_with("pprt_"));
        assert_eq!(token.scope, "chat sessions");
    }

    #[tokio::test]
    async fn test_replaying_code_fails() {
        let server = AuthorizationServer::new();
        let verifier = "dBjftJeZ4CVP";
        let challenge = challenge_from_verifier(verifier);
        let code = server
            .authorize("pocketpaw-desktop", "tauri://oauth-callback", "chat", challenge, "S256")
            .await;

        server.exchange(&code, verifier, "pocketpaw-desktop").await.unwrap();
        let result = server.exchange(&code, verifier, "pocketpaw-desktop").await;
        assert_eq!(result, Err(ExchangeError::CodeAlreadyUsed));
    }

    #[tokio::test]
    async fn test_wrong_verifier_fails() {
        let server = AuthorizationServer::new();
        let challenge = challenge_from_verifier("dBjftJeZ4CVP");
        let code = server
            .authorize("pocketpaw-desktop", "tauri://oauth-callback", "chat", challenge, "S256")
            .await;

        let result = server.exchange(&code, "wrong-verifier", "pocketpaw-desktop").await;
        assert_eq!(result, Err(ExchangeError::VerifierMismatch));
    }

    #[tokio::test]
    async fn test_verify_access_token() {
        let server = AuthorizationServer::new();
        let verifier = "dBjftJeZ4CVP";
        let challenge = challenge_from_verifier(verifier);
        let code = server
            .authorize("pocketpaw-desktop", "tauri://oauth-callback", "chat", challenge, "S256")
            .await;
        let token = server.exchange(&code, verifier, "pocketpaw-desktop").await.unwrap();

        assert_eq!(
            server.verify_access_token(&token.access_token).await,
            Some("chat".to_string())
        );

        server.revoke(&token.access_token).await;
        assert_eq!(server.verify_access_token(&token.access_token).await, None);
    }
}
