//! HMAC-SHA256 session tokens.
//!
//! A session token is `"{expires_unix}:{hex_hmac}"`, where the HMAC covers
//! the ASCII `expires_unix` digits keyed by a master secret held only by the
//! server. There's no encoded payload beyond the expiry — the server is the
//! sole issuer and verifier, so nothing else needs to round-trip through the
//! token itself.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Mint a session token valid for `ttl_secs` from now.
pub fn issue(secret: &[u8], ttl_secs: i64) -> String {
    let expires = chrono::Utc::now().timestamp() + ttl_secs;
    sign(secret, expires)
}

/// Verify a session token against the current time. Returns `true` only if
/// the HMAC matches and the token has not expired.
pub fn verify(secret: &[u8], token: &str) -> bool {
    let Some((expires_str, hex_sig)) = token.split_once(':') else {
        return false;
    };
    let Ok(expires) = expires_str.parse::<i64>() else {
        return false;
    };
    if expires < chrono::Utc::now().timestamp() {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(expires_str.as_bytes());

    let Ok(sig_bytes) = hex_decode(hex_sig) else {
        return false;
    };
    mac.verify_slice(&sig_bytes).is_ok()
}

fn sign(secret: &[u8], expires: i64) -> String {
    let expires_str = expires.to_string();
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(expires_str.as_bytes());
    let sig = mac.finalize().into_bytes();
    format!("{expires_str}:{}", hex_encode(&sig))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let secret = b"master-secret";
        let token = issue(secret, 3600);
        assert!(verify(secret, &token));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = issue(b"secret-a", 3600);
        assert!(!verify(b"secret-b", &token));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let secret = b"master-secret";
        let token = issue(secret, -10);
        assert!(!verify(secret, &token));
    }

    #[test]
    fn test_verify_rejects_malformed_token() {
        assert!(!verify(b"secret", "not-a-valid-token"));
        assert!(!verify(b"secret", "abc:not-hex"));
        assert!(!verify(b"secret", "notanumber:deadbeef"));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let secret = b"master-secret";
        let token = issue(secret, 3600);
        let (expires, sig) = token.split_once(':').unwrap();
        let mut tampered_sig = sig.to_string();
        tampered_sig.replace_range(0..2, "ff");
        let tampered = format!("{expires}:{tampered_sig}");
        assert!(!verify(secret, &tampered));
    }
}
