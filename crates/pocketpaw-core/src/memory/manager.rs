//! File-backed `MemoryManager` — long-term/daily entries as one JSON file
//! per id under a type-partitioned tree, plus a session index for listing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{MemoryEntry, MemoryKind};
use crate::utils;

/// Per-session summary kept in the session index for fast listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub session_key: String,
    #[serde(default = "default_title")]
    pub title: String,
    pub channel: String,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
}

fn default_title() -> String {
    "Untitled".to_string()
}

fn kind_dir_name(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::LongTerm => "long_term",
        MemoryKind::Daily => "daily",
        MemoryKind::Session => "session",
    }
}

/// Implements the memory protocol: `save`, `get`, `delete`, `search`,
/// `get_by_type`, `get_session`, `clear_session`.
///
/// `Session`-kind entries are not persisted by this store directly — session
/// *content* lives in `SessionManager`; this type only tracks the session
/// index (title/channel/last_activity/message_count) so sessions can be
/// listed through the same protocol as long-term/daily memories.
pub struct MemoryManager {
    root: PathBuf,
    index_path: PathBuf,
    index: RwLock<HashMap<String, SessionIndexEntry>>,
}

impl MemoryManager {
    /// Open (or create) a memory manager rooted at `root`, defaulting to
    /// `~/.pocketpaw/memory/` when `None`.
    pub fn new(root: Option<PathBuf>) -> std::io::Result<Self> {
        let root = root.unwrap_or_else(utils::get_memory_path);
        std::fs::create_dir_all(root.join("long_term"))?;
        std::fs::create_dir_all(root.join("daily"))?;
        std::fs::create_dir_all(root.join("sessions"))?;

        let index_path = root.join("sessions").join("index.json");
        let index = load_index(&index_path);

        Ok(Self {
            root,
            index_path,
            index: RwLock::new(index),
        })
    }

    fn kind_dir(&self, kind: MemoryKind) -> PathBuf {
        self.root.join(kind_dir_name(kind))
    }

    fn entry_path(&self, kind: MemoryKind, id: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", utils::safe_filename(id)))
    }

    /// Persist an entry (insert or overwrite by id), bumping `updated_at`.
    pub fn save(&self, mut entry: MemoryEntry) -> std::io::Result<MemoryEntry> {
        entry.updated_at = Utc::now();
        let path = self.entry_path(entry.kind, &entry.id);
        let json = serde_json::to_string_pretty(&entry)?;
        std::fs::write(&path, json)?;
        debug!(id = %entry.id, kind = ?entry.kind, "saved memory entry");
        Ok(entry)
    }

    /// Fetch a single entry by id, scanning `long_term` then `daily`.
    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        for kind in [MemoryKind::LongTerm, MemoryKind::Daily] {
            let path = self.entry_path(kind, id);
            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(entry) = serde_json::from_str(&content) {
                    return Some(entry);
                }
            }
        }
        None
    }

    /// Delete an entry by id. Returns `true` if a file was removed.
    pub fn delete(&self, id: &str) -> bool {
        for kind in [MemoryKind::LongTerm, MemoryKind::Daily] {
            let path = self.entry_path(kind, id);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(id, error = %e, "failed to delete memory entry");
                    return false;
                }
                return true;
            }
        }
        false
    }

    /// All entries of a given kind, newest-updated first, capped at `limit`.
    pub fn get_by_type(&self, kind: MemoryKind, limit: usize) -> Vec<MemoryEntry> {
        let mut entries = self.read_all(kind);
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.truncate(limit);
        entries
    }

    /// Search long-term + daily entries by substring `query`, optional kind
    /// filter, and optional tag intersection. Capped at `limit`.
    pub fn search(
        &self,
        query: Option<&str>,
        kind: Option<MemoryKind>,
        tags: &[String],
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let kinds: Vec<MemoryKind> = match kind {
            Some(k) => vec![k],
            None => vec![MemoryKind::LongTerm, MemoryKind::Daily],
        };

        let mut matches: Vec<MemoryEntry> = kinds
            .into_iter()
            .flat_map(|k| self.read_all(k))
            .filter(|e| {
                let matches_query = query
                    .map(|q| e.content.to_lowercase().contains(&q.to_lowercase()))
                    .unwrap_or(true);
                let matches_tags = tags.is_empty() || tags.iter().all(|t| e.tags.contains(t));
                matches_query && matches_tags
            })
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        matches
    }

    fn read_all(&self, kind: MemoryKind) -> Vec<MemoryEntry> {
        let dir = self.kind_dir(kind);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .filter_map(|content| serde_json::from_str(&content).ok())
            .collect()
    }

    // ────────────── Session index ──────────────

    /// Record activity on a session, creating the index entry if absent.
    /// `title` only applies on first creation; use `rename_session` to change it.
    pub fn touch_session(&self, session_key: &str, channel: &str) {
        let mut index = self.index.write().unwrap();
        let entry = index
            .entry(session_key.to_string())
            .or_insert_with(|| SessionIndexEntry {
                session_key: session_key.to_string(),
                title: default_title(),
                channel: channel.to_string(),
                last_activity: Utc::now(),
                message_count: 0,
            });
        entry.last_activity = Utc::now();
        entry.message_count += 1;
        self.persist_index(&index);
    }

    /// Rename a session's display title.
    pub fn rename_session(&self, session_key: &str, title: &str) -> bool {
        let mut index = self.index.write().unwrap();
        let Some(entry) = index.get_mut(session_key) else {
            return false;
        };
        entry.title = title.to_string();
        self.persist_index(&index);
        true
    }

    /// Look up a session's index entry.
    pub fn get_session(&self, session_key: &str) -> Option<SessionIndexEntry> {
        self.index.read().unwrap().get(session_key).cloned()
    }

    /// List all indexed sessions, most recently active first.
    pub fn list_sessions(&self) -> Vec<SessionIndexEntry> {
        let index = self.index.read().unwrap();
        let mut all: Vec<SessionIndexEntry> = index.values().cloned().collect();
        all.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        all
    }

    /// Remove a session from the index (the transcript itself is cleared via
    /// `SessionManager`; this only drops the index entry).
    pub fn clear_session(&self, session_key: &str) -> bool {
        let mut index = self.index.write().unwrap();
        let removed = index.remove(session_key).is_some();
        if removed {
            self.persist_index(&index);
        }
        removed
    }

    fn persist_index(&self, index: &HashMap<String, SessionIndexEntry>) {
        let values: Vec<&SessionIndexEntry> = index.values().collect();
        if let Ok(json) = serde_json::to_string_pretty(&values) {
            if let Err(e) = std::fs::write(&self.index_path, json) {
                warn!(error = %e, "failed to persist session index");
            }
        }
    }
}

fn load_index(path: &PathBuf) -> HashMap<String, SessionIndexEntry> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<SessionIndexEntry>>(&content) else {
        return HashMap::new();
    };
    entries.into_iter().map(|e| (e.session_key.clone(), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_manager() -> (MemoryManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(Some(dir.path().to_path_buf())).unwrap();
        (mgr, dir)
    }

    #[test]
    fn test_save_and_get_long_term() {
        let (mgr, _dir) = make_manager();
        let entry = MemoryEntry::new(MemoryKind::LongTerm, "User likes Rust");
        let id = entry.id.clone();
        mgr.save(entry).unwrap();

        let fetched = mgr.get(&id).unwrap();
        assert_eq!(fetched.content, "User likes Rust");
        assert_eq!(fetched.kind, MemoryKind::LongTerm);
    }

    #[test]
    fn test_save_overwrites_by_id() {
        let (mgr, _dir) = make_manager();
        let mut entry = MemoryEntry::new(MemoryKind::Daily, "first");
        let id = entry.id.clone();
        mgr.save(entry.clone()).unwrap();

        entry.content = "second".to_string();
        mgr.save(entry).unwrap();

        let fetched = mgr.get(&id).unwrap();
        assert_eq!(fetched.content, "second");
    }

    #[test]
    fn test_delete() {
        let (mgr, _dir) = make_manager();
        let entry = MemoryEntry::new(MemoryKind::LongTerm, "to delete");
        let id = entry.id.clone();
        mgr.save(entry).unwrap();

        assert!(mgr.delete(&id));
        assert!(mgr.get(&id).is_none());
        assert!(!mgr.delete(&id));
    }

    #[test]
    fn test_get_by_type() {
        let (mgr, _dir) = make_manager();
        mgr.save(MemoryEntry::new(MemoryKind::LongTerm, "a")).unwrap();
        mgr.save(MemoryEntry::new(MemoryKind::LongTerm, "b")).unwrap();
        mgr.save(MemoryEntry::new(MemoryKind::Daily, "c")).unwrap();

        let long_term = mgr.get_by_type(MemoryKind::LongTerm, 10);
        assert_eq!(long_term.len(), 2);
        let daily = mgr.get_by_type(MemoryKind::Daily, 10);
        assert_eq!(daily.len(), 1);
    }

    #[test]
    fn test_search_by_query() {
        let (mgr, _dir) = make_manager();
        mgr.save(MemoryEntry::new(MemoryKind::LongTerm, "User likes Rust")).unwrap();
        mgr.save(MemoryEntry::new(MemoryKind::LongTerm, "User likes cats")).unwrap();

        let found = mgr.search(Some("rust"), None, &[], 10);
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("Rust"));
    }

    #[test]
    fn test_search_by_tags() {
        let (mgr, _dir) = make_manager();
        let mut a = MemoryEntry::new(MemoryKind::LongTerm, "tagged");
        a.tags = vec!["pref".to_string()];
        mgr.save(a).unwrap();
        mgr.save(MemoryEntry::new(MemoryKind::LongTerm, "untagged")).unwrap();

        let found = mgr.search(None, None, &["pref".to_string()], 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "tagged");
    }

    #[test]
    fn test_search_limit() {
        let (mgr, _dir) = make_manager();
        for i in 0..5 {
            mgr.save(MemoryEntry::new(MemoryKind::LongTerm, format!("entry {i}"))).unwrap();
        }
        let found = mgr.search(None, None, &[], 2);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_touch_session_creates_and_increments() {
        let (mgr, _dir) = make_manager();
        mgr.touch_session("telegram:1", "telegram");
        mgr.touch_session("telegram:1", "telegram");

        let entry = mgr.get_session("telegram:1").unwrap();
        assert_eq!(entry.message_count, 2);
        assert_eq!(entry.title, "Untitled");
        assert_eq!(entry.channel, "telegram");
    }

    #[test]
    fn test_rename_session() {
        let (mgr, _dir) = make_manager();
        mgr.touch_session("cli:1", "cli");
        assert!(mgr.rename_session("cli:1", "My chat"));
        assert_eq!(mgr.get_session("cli:1").unwrap().title, "My chat");
        assert!(!mgr.rename_session("nope", "x"));
    }

    #[test]
    fn test_clear_session_removes_index_entry() {
        let (mgr, _dir) = make_manager();
        mgr.touch_session("cli:1", "cli");
        assert!(mgr.clear_session("cli:1"));
        assert!(mgr.get_session("cli:1").is_none());
        assert!(!mgr.clear_session("cli:1"));
    }

    #[test]
    fn test_list_sessions_sorted_by_activity() {
        let (mgr, _dir) = make_manager();
        mgr.touch_session("a:1", "a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.touch_session("b:1", "b");

        let sessions = mgr.list_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_key, "b:1");
    }

    #[test]
    fn test_index_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = MemoryManager::new(Some(dir.path().to_path_buf())).unwrap();
            mgr.touch_session("cli:1", "cli");
        }
        let mgr2 = MemoryManager::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(mgr2.get_session("cli:1").is_some());
    }
}
