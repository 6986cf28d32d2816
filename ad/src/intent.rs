//! Intent classification
//!
//! Pure, deterministic keyword dispatch: free text in, one [`Intent`] out.
//! The precedence is an explicit ordered rule table so it stays auditable -
//! INFO beats MCP beats COMMAND beats EDIT, with the "how to"/"how do i"
//! reclassification applied as a dedicated post-check rather than folded
//! into the ordering.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

/// Classification of a user utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Explanation/overview request
    Info,
    /// Request to run something; always requires confirmation downstream
    Command,
    /// Code-change request
    Edit,
    /// External-context request routed to the MCP collaborator
    Mcp,
    /// Not enough signal to classify
    Ambiguous,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Command => write!(f, "COMMAND"),
            Self::Edit => write!(f, "EDIT"),
            Self::Mcp => write!(f, "MCP"),
            Self::Ambiguous => write!(f, "AMBIGUOUS"),
        }
    }
}

const INFO_PATTERNS: &[&str] = &[
    r"\bsummarize\b",
    r"\bsummarise\b",
    r"\bsummarising\b",
    r"\bsummarizing\b",
    r"\bsummary\b",
    r"\bwhat is this\b",
    r"\bwhat's this\b",
    r"\boverview\b",
    r"\barchitecture\b",
    r"\bexplain\b",
    r"\bhow to run\b",
    r"\bhow do i run\b",
    r"\bhow to start\b",
    r"\bhow do i start\b",
    r"\bhow it starts\b",
    r"\bhow it start\b",
    r"\bhow to build\b",
    r"\bhow to test\b",
    r"\bsetup\b",
    r"\binstall\b",
    r"\busage\b",
];

const MCP_PATTERNS: &[&str] = &[
    r"\bbrowse\b",
    r"\bsearch\b",
    r"\bgoogle\b",
    r"\bwebsite\b",
    r"\burl\b",
    r"\bhttps?://",
];

const COMMAND_PATTERNS: &[&str] = &[
    r"\brun tests\b",
    r"\brun build\b",
    r"\brun lint\b",
    r"\brun\b",
    r"\bexecute\b",
    r"\bstart server\b",
    r"\bnpm\b",
    r"\bpytest\b",
    r"\bcargo\b",
    r"\bmake\b",
];

const EDIT_PATTERNS: &[&str] = &[
    r"\bfix\b",
    r"\bchange\b",
    r"\bupdate\b",
    r"\badd\b",
    r"\bremove\b",
    r"\brefactor\b",
    r"\bimplement\b",
    r"\bbug\b",
    r"\bissue\b",
    r"\bfeature\b",
];

/// Ordered dispatch table, first match wins
static RULES: LazyLock<Vec<(RegexSet, Intent)>> = LazyLock::new(|| {
    vec![
        (RegexSet::new(INFO_PATTERNS).expect("info patterns"), Intent::Info),
        (RegexSet::new(MCP_PATTERNS).expect("mcp patterns"), Intent::Mcp),
        (RegexSet::new(COMMAND_PATTERNS).expect("command patterns"), Intent::Command),
        (RegexSet::new(EDIT_PATTERNS).expect("edit patterns"), Intent::Edit),
    ]
});

static PATH_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[/\\]|\.rs\b|\.py\b|\.js\b|\.ts\b|\.tsx\b|\.json\b|\.yml\b|\.yaml\b|\.toml\b|\.md\b|\.html\b|\.css\b")
        .expect("path hint pattern")
});

static PRONOUN_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(it|this|that|these|those)\b").expect("pronoun pattern"));

/// Whether the text names a path-like token (separator or a common
/// source-file extension)
pub fn has_path_hint(text: &str) -> bool {
    PATH_HINT.is_match(&text.to_lowercase())
}

/// Whether the text refers to its target only by pronoun
pub fn has_pronoun(text: &str) -> bool {
    PRONOUN_HINT.is_match(&text.to_lowercase())
}

/// A command-verb match must not shadow an explanation request
fn is_explanation_request(text: &str) -> bool {
    text.contains("how to") || text.contains("how do i")
}

/// Classify free text into an [`Intent`]. Pure, no I/O, never fails:
/// malformed or empty input resolves to [`Intent::Ambiguous`].
pub fn classify(text: &str) -> Intent {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return Intent::Ambiguous;
    }

    for (patterns, intent) in RULES.iter() {
        if patterns.is_match(&text) {
            if *intent == Intent::Command && is_explanation_request(&text) {
                return Intent::Info;
            }
            return *intent;
        }
    }

    // Scope heuristics: too short or pronoun-only with no path hint
    let words = text.split_whitespace().count();
    let has_path = PATH_HINT.is_match(&text);
    if words < 4 && !has_path {
        return Intent::Ambiguous;
    }
    if PRONOUN_HINT.is_match(&text) && !has_path {
        return Intent::Ambiguous;
    }

    Intent::Edit
}
