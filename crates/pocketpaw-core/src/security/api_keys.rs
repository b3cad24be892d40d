//! API key issuance, hashing, and the file-backed `ApiKeyStore`.
//!
//! Keys look like `pp_<40 hex chars>`. Only the sha-256 hash is persisted;
//! the plaintext is returned once, at creation, and never again.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::ApiKeyRecord;
use crate::utils;

const KEY_PREFIX: &str = "pp_";

/// Generate a fresh plaintext API key (`pp_` + 40 hex chars).
pub fn generate_key() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{KEY_PREFIX}{hex}")
}

/// sha-256 hex digest of a plaintext key.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Validate a presented key's shape before hashing (cheap reject of
/// obviously-wrong bearer tokens so the store never wastes a hash+lookup on
/// session tokens or OAuth tokens passed to the wrong path).
pub fn looks_like_api_key(presented: &str) -> bool {
    presented.starts_with(KEY_PREFIX)
}

/// File-backed store of issued API keys at `~/.pocketpaw/api_keys.json`,
/// mode `0600`. Refuses to load a group/world-readable file.
pub struct ApiKeyStore {
    path: PathBuf,
    records: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl ApiKeyStore {
    pub async fn open(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| utils::get_data_path().join("api_keys.json"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = if path.exists() {
            check_file_mode(&path)?;
            let contents = tokio::fs::read_to_string(&path).await?;
            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                let list: Vec<ApiKeyRecord> = serde_json::from_str(&contents)?;
                list.into_iter().map(|r| (r.key_hash.clone(), r)).collect()
            }
        } else {
            HashMap::new()
        };

        let store = ApiKeyStore {
            path,
            records: RwLock::new(records),
        };
        store.persist().await?;
        Ok(store)
    }

    /// Mint a new key with the given name and scopes. Returns the plaintext
    /// key (shown once) and the stored record.
    pub async fn create(
        &self,
        name: impl Into<String>,
        scopes: Vec<String>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<(String, ApiKeyRecord)> {
        let plaintext = generate_key();
        let key_hash = hash_key(&plaintext);
        let record = ApiKeyRecord {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            key_hash: key_hash.clone(),
            prefix: plaintext.chars().take(12).collect(),
            scopes,
            created_at: chrono::Utc::now(),
            last_used_at: None,
            expires_at,
            revoked: false,
        };

        self.records.write().await.insert(key_hash, record.clone());
        self.persist().await?;
        Ok((plaintext, record))
    }

    /// Verify a presented plaintext key, updating `last_used_at` on success.
    /// Returns the record's scopes when the key is valid: hashes to a known,
    /// unrevoked, unexpired record.
    pub async fn verify(&self, presented: &str) -> Option<Vec<String>> {
        if !looks_like_api_key(presented) {
            return None;
        }
        let key_hash = hash_key(presented);

        let mut records = self.records.write().await;
        let record = records.get_mut(&key_hash)?;
        if record.revoked {
            return None;
        }
        if let Some(expires) = record.expires_at {
            if expires < chrono::Utc::now() {
                return None;
            }
        }
        record.last_used_at = Some(chrono::Utc::now());
        let scopes = record.scopes.clone();
        drop(records);
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist api key last_used_at");
        }
        Some(scopes)
    }

    pub async fn revoke(&self, id: uuid::Uuid) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        let Some(record) = records.values_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.revoked = true;
        drop(records);
        self.persist().await?;
        Ok(true)
    }

    pub async fn list(&self) -> Vec<ApiKeyRecord> {
        self.records.read().await.values().cloned().collect()
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let records = self.records.read().await;
        let list: Vec<&ApiKeyRecord> = records.values().collect();
        let contents = serde_json::to_string_pretty(&list)?;
        tokio::fs::write(&self.path, contents).await?;
        set_owner_only_mode(&self.path).await;
        Ok(())
    }
}

#[cfg(unix)]
fn check_file_mode(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        anyhow::bail!(
            "refusing to read {} — file is group/world accessible (mode {:o})",
            path.display(),
            mode
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_file_mode(_path: &std::path::Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn set_owner_only_mode(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
    {
        warn!(error = %e, "failed to set 0600 mode on api key store");
    }
}

#[cfg(not(unix))]
async fn set_owner_only_mode(_path: &std::path::Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let key = "pp_abcdef";
        assert_eq!(hash_key(key), hash_key(key));
    }

    #[test]
    fn test_looks_like_api_key() {
        assert!(looks_like_api_key("pp_abc123"));
        assert!(!looks_like_api_key("ppat_abc123"));
        assert!(!looks_like_api_key("Bearer sometoken"));
    }

    #[tokio::test]
    async fn test_create_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(Some(dir.path().join("api_keys.json")))
            .await
            .unwrap();

        let (plaintext, record) = store
            .create("ci-bot", vec!["chat".into()], None)
            .await
            .unwrap();
        assert!(plaintext.starts_with("pp_"));
        assert!(!record.revoked);

        let scopes = store.verify(&plaintext).await.unwrap();
        assert_eq!(scopes, vec!["chat".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_rejects_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(Some(dir.path().join("api_keys.json")))
            .await
            .unwrap();

        let (plaintext, record) = store.create("temp", vec![], None).await.unwrap();
        store.revoke(record.id).await.unwrap();
        assert!(store.verify(&plaintext).await.is_none());
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(Some(dir.path().join("api_keys.json")))
            .await
            .unwrap();

        let expired = chrono::Utc::now() - chrono::Duration::seconds(1);
        let (plaintext, _) = store.create("temp", vec![], Some(expired)).await.unwrap();
        assert!(store.verify(&plaintext).await.is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");

        let plaintext = {
            let store = ApiKeyStore::open(Some(path.clone())).await.unwrap();
            let (plaintext, _) = store.create("persisted", vec![], None).await.unwrap();
            plaintext
        };

        let store2 = ApiKeyStore::open(Some(path)).await.unwrap();
        assert!(store2.verify(&plaintext).await.is_some());
    }
}
