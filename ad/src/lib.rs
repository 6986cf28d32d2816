//! AgentD - control plane for a local coding-assistant server
//!
//! Decides, from free-text user input and session context, what kind of
//! action is being requested, whether enough information exists to act, and
//! how to durably track and execute that action without blocking the caller.
//!
//! # Modules
//!
//! - [`intent`] - pure free-text -> intent classification
//! - [`planner`] - the planning state machine (intent -> plan, questions, or
//!   confirmation requirement)
//! - [`session`] - live per-conversation state record
//! - [`agent`] - facade wiring classifier, planner, session, and branch state
//! - [`tasks`] - durable task queue and the single background worker
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface
//!
//! LLM inference, symbol indexing, diff application, and the MCP client are
//! external collaborators reached through the [`agent::PlanGenerator`] and
//! [`tasks::TaskHandler`] traits; this crate never generates natural-language
//! plans or applies patches itself.

pub mod agent;
pub mod cli;
pub mod config;
pub mod intent;
pub mod planner;
pub mod session;
pub mod tasks;

// Re-export commonly used types
pub use agent::{Agent, PlanGenerator};
pub use config::{Config, SessionConfig, SnapshotConfig, WorkerConfig};
pub use intent::{classify, Intent};
pub use planner::{PlannerFsm, PlannerInput, PlannerOutput};
pub use session::{AgentSession, AgentState};
pub use tasks::{LogEntry, TaskHandler, TaskQueue, TaskRecord, TaskStatus, TaskWorker, WorkerHandle};
