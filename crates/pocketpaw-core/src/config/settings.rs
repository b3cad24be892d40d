//! `Settings` — the process-wide config singleton behind an async lock.
//!
//! Every write path (HTTP `PUT /settings`, channel enable/disable, onboarding)
//! takes the write guard, mutates, persists to `config.json`, then drops the
//! guard — the in-memory cache and the on-disk file always move together.

use std::path::PathBuf;

use tokio::sync::RwLock;

use super::loader::{load_config, save_config};
use super::schema::Config;

/// Shared, lock-guarded configuration. Cloned as `Arc<Settings>` into every
/// subsystem that needs to read or mutate config at runtime.
pub struct Settings {
    inner: RwLock<Config>,
    path: Option<PathBuf>,
}

impl Settings {
    /// Load from `path` (or the default `~/.pocketpaw/config.json`).
    pub fn load(path: Option<PathBuf>) -> Self {
        let config = load_config(path.as_deref());
        Settings {
            inner: RwLock::new(config),
            path,
        }
    }

    /// Snapshot the current config.
    pub async fn get(&self) -> Config {
        self.inner.read().await.clone()
    }

    /// Replace the config wholesale, persisting to disk under the same
    /// critical section so the in-memory value and the file never diverge.
    pub async fn replace(&self, new_config: Config) -> std::io::Result<()> {
        let mut guard = self.inner.write().await;
        save_config(&new_config, self.path.as_deref())?;
        *guard = new_config;
        Ok(())
    }

    /// Mutate in place via a closure, then persist the result.
    pub async fn update<F>(&self, f: F) -> std::io::Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.inner.write().await;
        f(&mut guard);
        save_config(&guard, self.path.as_deref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Settings::load(Some(path));
        let cfg = settings.get().await;
        assert_eq!(cfg.security.policy_profile, "full");
    }

    #[tokio::test]
    async fn test_update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Settings::load(Some(path.clone()));

        settings
            .update(|c| c.security.master_token = "secret123".to_string())
            .await
            .unwrap();

        let reloaded = load_config(Some(&path));
        assert_eq!(reloaded.security.master_token, "secret123");
    }

    #[tokio::test]
    async fn test_replace_overwrites_whole_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Settings::load(Some(path));

        let mut new_config = Config::default();
        new_config.security.policy_profile = "readonly".to_string();
        settings.replace(new_config).await.unwrap();

        assert_eq!(settings.get().await.security.policy_profile, "readonly");
    }
}
