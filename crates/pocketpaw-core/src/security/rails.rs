//! Filesystem and command rails — the static pattern/jail checks that apply
//! regardless of policy or Guardian.
//!
//! Port and generalization of `oxibot-agent`'s `shell.rs` deny list and
//! `filesystem.rs`'s `resolve_path` jail logic, shared across every crate
//! that executes a command or touches a path so every tool speaks the same
//! rails rather than each reimplementing its own.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Compiled-regex dangerous patterns. Matched case-insensitively against the
/// lowercased command.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r">\s*/etc/",
    r"\b(shutdown|reboot|poweroff)\b",
    r"\biptables\s+-f\b",
    r"\bchmod\s+777\s+/",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// Literal substrings checked in addition to the compiled patterns, for
/// constructs a regex would awkwardly express (pipe-to-shell patterns).
const DANGEROUS_SUBSTRINGS: &[&str] = &["curl|sh", "curl | sh", "wget|sh", "wget | sh"];

static COMPILED_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn compiled_patterns() -> &'static [Regex] {
    COMPILED_PATTERNS
        .get_or_init(|| {
            DANGEROUS_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        })
        .as_slice()
}

/// Scan a shell command against the dangerous pattern set. Returns the
/// matched pattern/substring as a static description when blocked, `None`
/// when clear. Never auto-fixes; the caller must refuse execution on `Some`.
pub fn scan_command(command: &str) -> Option<&'static str> {
    let lower = command.to_lowercase();

    for re in compiled_patterns() {
        if re.is_match(&lower) {
            return Some("dangerous pattern detected");
        }
    }

    for needle in DANGEROUS_SUBSTRINGS {
        if lower.contains(needle) {
            return Some("dangerous pattern detected");
        }
    }

    None
}

/// Error returned by [`resolve_in_jail`].
#[derive(Debug, Error)]
pub enum RailsError {
    #[error("path '{path}' is outside the jail root '{jail_root}'")]
    OutsideJail { path: String, jail_root: String },
}

/// Resolve a user-supplied path, expanding `~`, canonicalizing as far as
/// possible, and verifying the result is a prefix-match of `jail_root`.
/// Every file-read, file-write, and directory-list tool calls this before
/// any I/O.
pub fn resolve_in_jail(path: &str, jail_root: &Path) -> Result<PathBuf, RailsError> {
    let expanded = expand_tilde(path);

    let resolved = if expanded.exists() {
        expanded.canonicalize().unwrap_or(expanded)
    } else if let Some(parent) = expanded.parent().filter(|p| p.exists()) {
        let canon_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
        match expanded.file_name() {
            Some(name) => canon_parent.join(name),
            None => expanded,
        }
    } else {
        expanded
    };

    let jail_canon = if jail_root.exists() {
        jail_root.canonicalize().unwrap_or_else(|_| jail_root.to_path_buf())
    } else {
        jail_root.to_path_buf()
    };

    if resolved.starts_with(&jail_canon) {
        Ok(resolved)
    } else {
        Err(RailsError::OutsideJail {
            path: resolved.display().to_string(),
            jail_root: jail_canon.display().to_string(),
        })
    }
}

/// Expand a leading `~` to the user's home directory, without any jail check.
/// Used by callers that have no `allowed_dir` configured at all.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        if path == "~" {
            home
        } else {
            home.join(&path[2..])
        }
    } else {
        PathBuf::from(path)
    }
}
