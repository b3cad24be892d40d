//! Audit log — an append-only, one-JSON-line-per-event trail of every
//! security-relevant decision (tool attempts, policy denials, Guardian
//! verdicts, plan approvals, auth events).
//!
//! Modeled on [`crate::session::manager::SessionManager`]'s JSONL file
//! persistence, but append-only (no rewrite-whole-file on update) and async
//! since it sits on the hot path of every gated tool call.

use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::types::{AuditEvent, AuditSeverity};
use crate::utils;

/// Append-only audit trail. One JSON line per event in `audit.jsonl`.
///
/// After every successful write, subscribers registered via `subscribe` are
/// notified with a clone of the event, so the HTTP `/events/stream` endpoint
/// can forward audit events live without re-reading the file.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuditEvent>>>,
}

impl AuditLog {
    /// Open (creating if needed) the audit log at `path`, or the default
    /// `~/.pocketpaw/audit.jsonl` when `None`.
    pub async fn open(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| utils::get_data_path().join("audit.jsonl"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(AuditLog {
            path,
            file: Mutex::new(file),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Path to the underlying JSONL file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the last `limit` events from disk, newest first. Tolerant of a
    /// missing file (no events yet) and skips unparseable lines.
    pub async fn tail(&self, limit: usize) -> Vec<AuditEvent> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let mut events: Vec<AuditEvent> = contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        events.reverse();
        events.truncate(limit);
        events
    }

    /// Register a live subscriber for newly logged events.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<AuditEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Append an event to the log and notify subscribers. Errors are logged,
    /// not propagated — a failing audit write must never block the gated
    /// operation it's recording.
    pub async fn log(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut file = self.file.lock().await;
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "failed to write audit event");
                    return;
                }
                if let Err(e) = file.write_all(b"\n").await {
                    warn!(error = %e, "failed to write audit newline");
                    return;
                }
                if let Err(e) = file.flush().await {
                    warn!(error = %e, "failed to flush audit log");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize audit event"),
        }

        let mut subs = self.subscribers.lock().await;
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Convenience constructor + log in one call.
    pub async fn record(
        &self,
        severity: AuditSeverity,
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        status: impl Into<String>,
    ) {
        self.log(AuditEvent::new(severity, actor, action, target, status))
            .await;
    }
}
