//! Policy — filters the advertised tool list and blocks forbidden execution.
//!
//! A named profile (`coding`, `full`, `readonly`, …) supplies a default
//! allow-set; explicit allow/deny lists override it. Entries are tool names,
//! group labels (`group:mcp`), or wildcard patterns (`mcp:<server>:*`).

use std::collections::HashSet;

/// One entry in an allow- or deny-list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolicyEntry {
    /// An exact tool name, e.g. `"exec"`.
    Name(String),
    /// A group label, e.g. `"group:mcp"` matches any tool whose `group()` is `"mcp"`.
    Group(String),
    /// A wildcard prefix pattern, e.g. `"mcp:search:*"` matches any tool name
    /// starting with `"mcp:search:"`.
    Wildcard(String),
}

impl PolicyEntry {
    /// Parse a policy vocabulary string into a typed entry.
    pub fn parse(raw: &str) -> Self {
        if let Some(group) = raw.strip_prefix("group:") {
            PolicyEntry::Group(group.to_string())
        } else if let Some(prefix) = raw.strip_suffix(":*") {
            PolicyEntry::Wildcard(format!("{prefix}:"))
        } else {
            PolicyEntry::Name(raw.to_string())
        }
    }

    fn matches(&self, tool_name: &str, tool_group: &str) -> bool {
        match self {
            PolicyEntry::Name(name) => name == tool_name,
            PolicyEntry::Group(group) => group == tool_group,
            PolicyEntry::Wildcard(prefix) => tool_name.starts_with(prefix.as_str()),
        }
    }
}

/// Built-in profiles mapping to a default allow-set.
pub fn profile_default_allow(profile: &str) -> HashSet<PolicyEntry> {
    match profile {
        "full" => [PolicyEntry::Wildcard(String::new())].into_iter().collect(),
        "readonly" => ["read_file", "list_dir", "group:mcp"]
            .into_iter()
            .map(PolicyEntry::parse)
            .collect(),
        "coding" => [
            "read_file",
            "write_file",
            "edit_file",
            "list_dir",
            "exec",
            "group:mcp",
        ]
        .into_iter()
        .map(PolicyEntry::parse)
        .collect(),
        _ => HashSet::new(),
    }
}

/// Filters the advertised tool list and blocks forbidden execution.
///
/// `deny` always wins over `allow`. An empty `allow` set (after resolving
/// the profile default) means nothing is permitted.
pub struct Policy {
    pub profile: String,
    pub allow: HashSet<PolicyEntry>,
    pub deny: HashSet<PolicyEntry>,
}

impl Policy {
    /// Build a policy from a named profile plus explicit overrides.
    pub fn new(profile: impl Into<String>, extra_allow: Vec<String>, deny: Vec<String>) -> Self {
        let profile = profile.into();
        let mut allow = profile_default_allow(&profile);
        allow.extend(extra_allow.iter().map(|s| PolicyEntry::parse(s)));

        Policy {
            profile,
            allow,
            deny: deny.iter().map(|s| PolicyEntry::parse(s)).collect(),
        }
    }

    /// Whether `tool_name` (in `tool_group`) is permitted.
    pub fn is_allowed(&self, tool_name: &str, tool_group: &str) -> bool {
        if self.deny.iter().any(|e| e.matches(tool_name, tool_group)) {
            return false;
        }
        self.allow.iter().any(|e| e.matches(tool_name, tool_group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_entry_matches_exact() {
        let entry = PolicyEntry::parse("exec");
        assert!(entry.matches("exec", "shell"));
        assert!(!entry.matches("read_file", "fs"));
    }

    #[test]
    fn test_group_entry_matches_group() {
        let entry = PolicyEntry::parse("group:mcp");
        assert!(entry.matches("mcp:search:query", "mcp"));
        assert!(!entry.matches("exec", "shell"));
    }

    #[test]
    fn test_wildcard_entry_matches_prefix() {
        let entry = PolicyEntry::parse("mcp:search:*");
        assert!(entry.matches("mcp:search:query", "mcp"));
        assert!(!entry.matches("mcp:other:query", "mcp"));
    }

    #[test]
    fn test_readonly_profile_allows_read_not_write() {
        let policy = Policy::new("readonly", vec![], vec![]);
        assert!(policy.is_allowed("read_file", "default"));
        assert!(!policy.is_allowed("write_file", "default"));
    }

    #[test]
    fn test_coding_profile_allows_exec() {
        let policy = Policy::new("coding", vec![], vec![]);
        assert!(policy.is_allowed("exec", "default"));
        assert!(policy.is_allowed("write_file", "default"));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let policy = Policy::new("coding", vec![], vec!["exec".to_string()]);
        assert!(!policy.is_allowed("exec", "default"));
        assert!(policy.is_allowed("write_file", "default"));
    }

    #[test]
    fn test_explicit_allow_extends_profile() {
        let policy = Policy::new("readonly", vec!["exec".to_string()], vec![]);
        assert!(policy.is_allowed("exec", "default"));
        assert!(policy.is_allowed("read_file", "default"));
    }

    #[test]
    fn test_unknown_profile_allows_nothing_by_default() {
        let policy = Policy::new("mystery", vec![], vec![]);
        assert!(!policy.is_allowed("read_file", "default"));
    }

    #[test]
    fn test_full_profile_allows_everything() {
        let policy = Policy::new("full", vec![], vec![]);
        assert!(policy.is_allowed("anything", "whatever"));
    }
}
