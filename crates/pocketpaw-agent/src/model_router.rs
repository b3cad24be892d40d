//! Model Router — heuristic classifier for automatic model-tier selection.
//!
//! Ported from the original heuristic router: pure pattern/length checks, no
//! API call. `AgentLoop::process_message` consults this once per turn (on the
//! user's raw text) to pick a model tier before invoking the provider.

use std::sync::OnceLock;

use regex::Regex;

/// Short messages are likely simple.
const SHORT_THRESHOLD: usize = 30;
/// Long messages are likely complex.
const LONG_THRESHOLD: usize = 200;

const SIMPLE_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|thanks|thank you|bye|goodbye|ok|yes|no|sure)\b",
    r"^what (is|are|was|were) .{3,30}\??$",
    r"^(who|when|where) .{3,40}\??$",
    r"^(good morning|good evening|good night|how are you)",
    r"^remind me ",
    r"^(set|create) (a )?reminder",
];

const COMPLEX_SIGNALS: &[&str] = &[
    r"\b(plan|architect|design|strategy|refactor)\b",
    r"\b(debug|investigate|diagnose|root\s*cause)\b",
    r"\b(implement|build|create) .{20,}",
    r"\b(analyze|compare|evaluate|trade-?off)\b",
    r"\b(multi-?step|step.by.step|detailed)\b",
    r"\b(optimize|performance|scale|security audit)\b",
    r"\b(research|deep dive|comprehensive)\b",
];

static SIMPLE_RE: OnceLock<Vec<Regex>> = OnceLock::new();
static COMPLEX_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn simple_patterns() -> &'static [Regex] {
    SIMPLE_RE
        .get_or_init(|| {
            SIMPLE_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect()
        })
        .as_slice()
}

fn complex_signals() -> &'static [Regex] {
    COMPLEX_RE
        .get_or_init(|| {
            COMPLEX_SIGNALS
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect()
        })
        .as_slice()
}

/// Task-complexity tier picked by [`classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskComplexity {
    /// Greetings, short factual questions, reminder requests.
    Simple,
    /// Default tier — general coding and conversation.
    Moderate,
    /// Multi-step reasoning, planning, deep analysis.
    Complex,
}

impl TaskComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskComplexity::Simple => "simple",
            TaskComplexity::Moderate => "moderate",
            TaskComplexity::Complex => "complex",
        }
    }
}

/// Model name for each complexity tier, read from
/// `config.agents.model_tiers.{simple,moderate,complex}`.
#[derive(Clone, Debug)]
pub struct ModelTiers {
    pub simple: String,
    pub moderate: String,
    pub complex: String,
}

/// Result of a routing decision.
#[derive(Clone, Debug)]
pub struct ModelSelection {
    pub complexity: TaskComplexity,
    pub model: String,
    pub reason: String,
}

/// Classify `message` and return the model tier to use for this turn.
pub fn classify(message: &str, tiers: &ModelTiers) -> ModelSelection {
    let message = message.trim();
    let len = message.chars().count();

    if len <= SHORT_THRESHOLD {
        for pattern in simple_patterns() {
            if pattern.is_match(message) {
                return ModelSelection {
                    complexity: TaskComplexity::Simple,
                    model: tiers.simple.clone(),
                    reason: "Short message with simple pattern".to_string(),
                };
            }
        }
    }

    let complex_hits = complex_signals().iter().filter(|p| p.is_match(message)).count();

    if complex_hits >= 2 || (complex_hits >= 1 && len > SHORT_THRESHOLD) {
        return ModelSelection {
            complexity: TaskComplexity::Complex,
            model: tiers.complex.clone(),
            reason: format!("{complex_hits} complex signal(s), message length {len}"),
        };
    }

    if len > LONG_THRESHOLD * 2 {
        return ModelSelection {
            complexity: TaskComplexity::Complex,
            model: tiers.complex.clone(),
            reason: format!("Very long message ({len} chars)"),
        };
    }

    ModelSelection {
        complexity: TaskComplexity::Moderate,
        model: tiers.moderate.clone(),
        reason: "Default moderate complexity".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> ModelTiers {
        ModelTiers {
            simple: "haiku".to_string(),
            moderate: "sonnet".to_string(),
            complex: "opus".to_string(),
        }
    }

    #[test]
    fn test_greeting_is_simple() {
        let sel = classify("hi", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Simple);
        assert_eq!(sel.model, "haiku");
    }

    #[test]
    fn test_short_factual_question_is_simple() {
        let sel = classify("what is rust?", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Simple);
    }

    #[test]
    fn test_reminder_request_is_simple() {
        let sel = classify("remind me to call mom", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Simple);
    }

    #[test]
    fn test_two_complex_signals_is_complex() {
        let sel = classify("please refactor and debug this module", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Complex);
        assert_eq!(sel.model, "opus");
    }

    #[test]
    fn test_one_signal_long_message_is_complex() {
        let long_msg = format!("please analyze this {}", "x".repeat(40));
        let sel = classify(&long_msg, &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Complex);
    }

    #[test]
    fn test_one_signal_short_message_is_moderate() {
        let sel = classify("let's plan lunch", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Moderate);
    }

    #[test]
    fn test_very_long_message_defaults_complex() {
        let long_msg = "a".repeat(LONG_THRESHOLD * 2 + 1);
        let sel = classify(&long_msg, &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Complex);
    }

    #[test]
    fn test_default_is_moderate() {
        let sel = classify("what's the weather going to do over the next several days", &tiers());
        assert_eq!(sel.complexity, TaskComplexity::Moderate);
        assert_eq!(sel.model, "sonnet");
    }

    #[test]
    fn test_complexity_as_str() {
        assert_eq!(TaskComplexity::Simple.as_str(), "simple");
        assert_eq!(TaskComplexity::Moderate.as_str(), "moderate");
        assert_eq!(TaskComplexity::Complex.as_str(), "complex");
    }
}
