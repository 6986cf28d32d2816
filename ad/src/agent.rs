//! Agent facade - classifier, planner, session, and branch state wired
//! together for one conversation
//!
//! The facade owns no ambient global state: every instance carries its own
//! branch store and session, so isolated instances can coexist in tests and,
//! if ever needed, in one process.

use std::sync::Arc;

use eyre::Result;
use tracing::{debug, warn};

use statestore::{BranchStore, DEFAULT_BRANCH};

use crate::intent::{classify, Intent};
use crate::planner::{PlannerFsm, PlannerInput, PlannerOutput};
use crate::session::{AgentSession, AgentState};

/// External plan-generator collaborator: free text to an ordered list of
/// short steps. Invoked only when the planner is READY with intent != INFO.
pub trait PlanGenerator: Send + Sync {
    fn generate(&self, text: &str) -> Result<Vec<String>>;
}

/// One conversation's control plane
pub struct Agent {
    store: BranchStore,
    session: AgentSession,
    fsm: PlannerFsm,
    repo_root_known: bool,
    plan_generator: Option<Arc<dyn PlanGenerator>>,
}

impl Agent {
    /// Create an agent over a branch store, ensuring the default branch
    /// exists. `repo_root_known` is supplied by the surrounding request
    /// layer (false until an init call names the repository).
    pub fn new(store: BranchStore, repo_root_known: bool) -> Result<Self> {
        store.ensure_session(DEFAULT_BRANCH)?;
        Ok(Self {
            store,
            session: AgentSession::new(),
            fsm: PlannerFsm::new(),
            repo_root_known,
            plan_generator: None,
        })
    }

    /// Install the external plan-generator collaborator
    pub fn with_plan_generator(mut self, generator: Arc<dyn PlanGenerator>) -> Self {
        self.plan_generator = Some(generator);
        self
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn store(&self) -> &BranchStore {
        &self.store
    }

    /// Reset the conversation (init/reset operation)
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Handle one request: classify, plan, update the session, and return
    /// the decision. Classification and planning never fail; only store
    /// access can error.
    pub fn handle(&mut self, text: &str) -> Result<PlannerOutput> {
        let intent = classify(text);
        let has_pending_patch = self.store.has_pending_patch()?;
        debug!(%intent, has_pending_patch, "handling request");

        let mut output = self.fsm.handle(&PlannerInput {
            user_text: text.to_string(),
            intent,
            repo_root_known: self.repo_root_known,
            has_pending_patch,
        });

        // The generator only refines an actionable plan; INFO plans are
        // fixed investigative steps and never delegated.
        if output.state == AgentState::Ready
            && output.intent != Intent::Info
            && let Some(generator) = &self.plan_generator
        {
            match generator.generate(text) {
                Ok(plan) if !plan.is_empty() => output.plan = plan,
                Ok(_) => debug!("plan generator returned nothing, keeping skeleton"),
                Err(e) => warn!(error = %e, "plan generator failed, keeping skeleton"),
            }
        }

        self.session.apply(&output);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedPlan(Vec<String>);

    impl PlanGenerator for FixedPlan {
        fn generate(&self, _text: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    struct FailingPlan;

    impl PlanGenerator for FailingPlan {
        fn generate(&self, _text: &str) -> Result<Vec<String>> {
            eyre::bail!("model offline")
        }
    }

    fn agent(temp: &TempDir) -> Agent {
        let store = BranchStore::open(temp.path()).unwrap();
        Agent::new(store, true).unwrap()
    }

    #[test]
    fn test_handle_updates_session() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(&temp);

        let out = agent.handle("fix it").unwrap();
        assert_eq!(out.state, AgentState::NeedsInfo);
        assert_eq!(agent.session().state, AgentState::NeedsInfo);
        assert_eq!(agent.session().questions.len(), 1);

        let out = agent.handle("fix the bug in auth.py").unwrap();
        assert_eq!(out.state, AgentState::Ready);
        assert_eq!(agent.session().state, AgentState::Ready);
        assert!(agent.session().questions.is_empty());
    }

    #[test]
    fn test_pending_patch_enables_revision_path() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(&temp);

        agent.store().write_pending_patch(&json!({"diff": "x"})).unwrap();
        let out = agent.handle("tweak the wording of the message").unwrap();
        assert_eq!(out.state, AgentState::Ready);
        assert_eq!(out.plan.len(), 2);
        assert!(out.plan[0].contains("pending patch"));
    }

    #[test]
    fn test_plan_generator_replaces_skeleton_for_edits() {
        let temp = TempDir::new().unwrap();
        let store = BranchStore::open(temp.path()).unwrap();
        let mut agent = Agent::new(store, true)
            .unwrap()
            .with_plan_generator(Arc::new(FixedPlan(vec!["custom step".to_string()])));

        let out = agent.handle("fix the bug in auth.py").unwrap();
        assert_eq!(out.plan, vec!["custom step".to_string()]);
    }

    #[test]
    fn test_plan_generator_not_used_for_info() {
        let temp = TempDir::new().unwrap();
        let store = BranchStore::open(temp.path()).unwrap();
        let mut agent = Agent::new(store, true)
            .unwrap()
            .with_plan_generator(Arc::new(FixedPlan(vec!["custom step".to_string()])));

        let out = agent.handle("how to run tests").unwrap();
        assert_eq!(out.plan.len(), 4);
        assert!(!out.plan.contains(&"custom step".to_string()));
    }

    #[test]
    fn test_plan_generator_failure_keeps_skeleton() {
        let temp = TempDir::new().unwrap();
        let store = BranchStore::open(temp.path()).unwrap();
        let mut agent = Agent::new(store, true)
            .unwrap()
            .with_plan_generator(Arc::new(FailingPlan));

        let out = agent.handle("fix the bug in auth.py").unwrap();
        assert_eq!(out.state, AgentState::Ready);
        assert_eq!(out.plan.len(), 3);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(&temp);

        agent.handle("fix it").unwrap();
        agent.reset();
        assert_eq!(agent.session().state, AgentState::Idle);
        assert!(agent.session().questions.is_empty());
    }
}
