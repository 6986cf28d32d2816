//! Planning state machine
//!
//! Pure function of (text, intent, context flags): decides whether the
//! request is actionable now, needs clarification, or needs explicit
//! confirmation. Produces plan skeletons only - natural-language plan
//! generation belongs to the external plan-generator collaborator.

use serde::{Deserialize, Serialize};

use crate::intent::{has_path_hint, has_pronoun, Intent};
use crate::session::AgentState;

/// Token a COMMAND request must be confirmed with before execution
pub const CONFIRM_TOKEN: &str = "YES";

/// MCP server hinted for external-context requests
pub const MCP_SERVER: &str = "playwright";

const REVISION_KEYWORDS: &[&str] = &["change more", "revise", "update", "tweak", "modify", "adjust"];

/// Everything the planner needs; supplied by the surrounding request layer
#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub user_text: String,
    pub intent: Intent,
    pub repo_root_known: bool,
    pub has_pending_patch: bool,
}

/// The planner's decision for one request. Not persisted; the caller
/// applies it to the [`AgentSession`](crate::session::AgentSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub state: AgentState,
    pub questions: Vec<String>,
    pub plan: Vec<String>,
    pub use_mcp: bool,
    pub mcp_server: Option<String>,
    pub intent: Intent,
    pub needs_confirm: bool,
    pub confirm_token: Option<String>,
}

impl PlannerOutput {
    /// Clarification required before anything can run
    pub fn needs_info(questions: Vec<String>, intent: Intent) -> Self {
        Self {
            state: AgentState::NeedsInfo,
            questions,
            plan: Vec::new(),
            use_mcp: false,
            mcp_server: None,
            intent,
            needs_confirm: false,
            confirm_token: None,
        }
    }

    /// Actionable now with a plan skeleton
    pub fn ready(plan: Vec<String>, intent: Intent) -> Self {
        Self {
            state: AgentState::Ready,
            questions: Vec::new(),
            plan,
            use_mcp: false,
            mcp_server: None,
            intent,
            needs_confirm: false,
            confirm_token: None,
        }
    }
}

/// The planner state machine. Stateless; deterministic given its input;
/// never errors - malformed input degrades to NEEDS_INFO.
#[derive(Debug, Default)]
pub struct PlannerFsm;

impl PlannerFsm {
    pub fn new() -> Self {
        Self
    }

    /// Run one transition of the state machine
    pub fn handle(&self, inp: &PlannerInput) -> PlannerOutput {
        let text = inp.user_text.trim();
        match inp.intent {
            Intent::Info => self.handle_info(inp),
            Intent::Mcp => {
                let mut out = PlannerOutput::ready(
                    vec![
                        "Use MCP tools to gather external context".to_string(),
                        "Summarize findings for the user".to_string(),
                    ],
                    inp.intent,
                );
                out.use_mcp = true;
                out.mcp_server = Some(MCP_SERVER.to_string());
                out
            }
            Intent::Command => {
                let mut out = PlannerOutput::needs_info(
                    vec!["Commands require explicit confirmation. Provide the exact command to run.".to_string()],
                    inp.intent,
                );
                out.needs_confirm = true;
                out.confirm_token = Some(CONFIRM_TOKEN.to_string());
                out
            }
            Intent::Edit => self.handle_edit(inp, text),
            Intent::Ambiguous => PlannerOutput::needs_info(
                vec!["Is this an explanation request or a code change?".to_string()],
                inp.intent,
            ),
        }
    }

    fn handle_info(&self, inp: &PlannerInput) -> PlannerOutput {
        if !inp.repo_root_known {
            return PlannerOutput::needs_info(
                vec!["Call init with repo_root or provide the repo path.".to_string()],
                inp.intent,
            );
        }
        PlannerOutput::ready(
            vec![
                "Read README/docs for usage".to_string(),
                "Inspect package.json/pyproject/Makefile for scripts".to_string(),
                "Use repo map/index to summarize structure".to_string(),
                "Summarize how to start/run the project".to_string(),
            ],
            inp.intent,
        )
    }

    fn handle_edit(&self, inp: &PlannerInput, text: &str) -> PlannerOutput {
        if inp.has_pending_patch && looks_like_revision(text) {
            return PlannerOutput::ready(
                vec![
                    "Revise pending patch based on new instruction".to_string(),
                    "Update diff and summary".to_string(),
                ],
                inp.intent,
            );
        }
        if needs_scope(text) {
            return PlannerOutput::needs_info(
                vec!["Which file or area should I change?".to_string()],
                inp.intent,
            );
        }
        PlannerOutput::ready(
            vec![
                "Locate relevant files and symbols".to_string(),
                "Identify necessary changes".to_string(),
                "Prepare a patch proposal".to_string(),
            ],
            inp.intent,
        )
    }
}

/// Whether the target of an edit is undetermined: empty text, very short
/// text with no path hint, or pronoun references with no path hint
fn needs_scope(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let has_path = has_path_hint(text);
    if text.split_whitespace().count() < 4 && !has_path {
        return true;
    }
    has_pronoun(text) && !has_path
}

/// Whether the text reads as a revision of the current pending patch
fn looks_like_revision(text: &str) -> bool {
    let t = text.to_lowercase();
    REVISION_KEYWORDS.iter().any(|k| t.contains(k))
}
