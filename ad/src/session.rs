//! Live per-conversation session record
//!
//! A single mutable slot per active conversation: current phase plus any
//! pending clarifying questions. Overwritten by each planner call, reset
//! explicitly by init/reset, never per individual request.

use serde::{Deserialize, Serialize};

use crate::planner::PlannerOutput;

/// Conversation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    #[default]
    Idle,
    NeedsInfo,
    Ready,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::NeedsInfo => write!(f, "NEEDS_INFO"),
            Self::Ready => write!(f, "READY"),
        }
    }
}

/// Tiny mutable per-conversation record updated by planner output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSession {
    pub state: AgentState,
    pub questions: Vec<String>,
}

impl AgentSession {
    /// Fresh session in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the needs-info state, storing the question list
    pub fn set_needs_info(&mut self, questions: Vec<String>) {
        self.state = AgentState::NeedsInfo;
        self.questions = questions;
    }

    /// Enter the ready state, clearing questions
    pub fn set_ready(&mut self) {
        self.state = AgentState::Ready;
        self.questions.clear();
    }

    /// Reset to idle (init/reset operation)
    pub fn reset(&mut self) {
        self.state = AgentState::Idle;
        self.questions.clear();
    }

    /// Apply a planner decision to this session
    pub fn apply(&mut self, output: &PlannerOutput) {
        match output.state {
            AgentState::NeedsInfo => self.set_needs_info(output.questions.clone()),
            AgentState::Ready => self.set_ready(),
            AgentState::Idle => {}
        }
    }
}
