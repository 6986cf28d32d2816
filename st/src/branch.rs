//! Branch-scoped agent working memory with point-in-time snapshots
//!
//! Each session root holds named branches under `branches/`, an
//! `active_branch.txt` pointer, and per-branch `snapshots/`. Switching
//! branches rewrites the pointer only - no data is copied - which is the
//! mechanism that isolates concurrent lines of work.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::keydir::{FsKeyDir, KeyDir};
use crate::now_ms;

/// Branch used when no active-branch pointer exists yet
pub const DEFAULT_BRANCH: &str = "main";

/// Scalar files captured by an agent snapshot, in manifest order
pub const BRANCH_SCALAR_FILES: &[&str] = &[
    "state.json",
    "memory.md",
    "plan.md",
    "scratchpad.md",
    "pending_patch.json",
];

const ACTIVE_BRANCH_KEY: &str = "active_branch.txt";
const TOOL_LOG_FILE: &str = "tool_log.jsonl";
const REPO_MAP_DIR: &str = "repo_map";

/// Metadata written alongside each agent snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshotMeta {
    /// Snapshot id, time-ordered
    pub id: String,
    /// Opaque head reference supplied by the version-control collaborator
    pub head: String,
    /// Free-form message
    pub message: String,
    /// Creation timestamp (Unix milliseconds)
    pub ts: i64,
}

/// Durable, branch-scoped storage for an agent's working memory
pub struct BranchStore {
    dir: Arc<dyn KeyDir>,
}

impl BranchStore {
    /// Create a store over an existing key directory
    pub fn new(dir: Arc<dyn KeyDir>) -> Self {
        Self { dir }
    }

    /// Open a filesystem-backed store rooted at a session directory
    pub fn open(session_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(FsKeyDir::open(session_root)?)))
    }

    fn branch_key(branch: &str, file: &str) -> String {
        format!("branches/{branch}/{file}")
    }

    fn snapshot_key(branch: &str, snapshot_id: &str, file: &str) -> String {
        format!("branches/{branch}/snapshots/{snapshot_id}/{file}")
    }

    /// Idempotently create the branch directory and its fixed file set,
    /// and point the session at it if no branch is active yet.
    pub fn ensure_session(&self, branch: &str) -> Result<()> {
        self.ensure_branch_files(branch)?;
        if !self.dir.exists(ACTIVE_BRANCH_KEY) {
            self.dir.write(ACTIVE_BRANCH_KEY, branch)?;
        }
        debug!(branch, "session ensured");
        Ok(())
    }

    fn ensure_branch_files(&self, branch: &str) -> Result<()> {
        for file in BRANCH_SCALAR_FILES {
            let key = Self::branch_key(branch, file);
            if !self.dir.exists(&key) {
                let initial = if file.ends_with(".json") { "{}" } else { "" };
                self.dir.write(&key, initial)?;
            }
        }
        let log_key = Self::branch_key(branch, TOOL_LOG_FILE);
        if !self.dir.exists(&log_key) {
            self.dir.write(&log_key, "")?;
        }
        // Cache populated by the external indexing collaborator
        self.dir.ensure_dir(&Self::branch_key(branch, REPO_MAP_DIR))?;
        Ok(())
    }

    /// The currently active branch name
    pub fn active_branch(&self) -> Result<String> {
        let name = self
            .dir
            .read(ACTIVE_BRANCH_KEY)?
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return Ok(DEFAULT_BRANCH.to_string());
        }
        Ok(name)
    }

    /// Switch the active branch, creating it if absent. O(1): only the
    /// pointer is rewritten, no data moves between branches.
    pub fn switch_branch(&self, name: &str) -> Result<()> {
        self.ensure_branch_files(name)?;
        self.dir.write_atomic(ACTIVE_BRANCH_KEY, name)?;
        info!(branch = name, "switched branch");
        Ok(())
    }

    /// Sorted names of all branches
    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.dir.list_dirs("branches")
    }

    /// Write the active branch's pending patch atomically
    pub fn write_pending_patch(&self, data: &Value) -> Result<()> {
        let branch = self.active_branch()?;
        let key = Self::branch_key(&branch, "pending_patch.json");
        self.dir.write_atomic(&key, &serde_json::to_string_pretty(data)?)?;
        Ok(())
    }

    /// Read the active branch's pending patch. Absent, empty, or malformed
    /// records read as an empty object rather than erroring.
    pub fn read_pending_patch(&self) -> Result<Value> {
        let branch = self.active_branch()?;
        let key = Self::branch_key(&branch, "pending_patch.json");
        let raw = self.dir.read(&key)?.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(branch, error = %e, "malformed pending patch, treating as empty");
                Ok(Value::Object(Default::default()))
            }
        }
    }

    /// Clear the active branch's pending patch
    pub fn clear_pending_patch(&self) -> Result<()> {
        self.write_pending_patch(&Value::Object(Default::default()))
    }

    /// Whether the active branch has a non-empty pending patch
    pub fn has_pending_patch(&self) -> Result<bool> {
        Ok(match self.read_pending_patch()? {
            Value::Object(map) => !map.is_empty(),
            _ => true,
        })
    }

    /// Append one entry to the active branch's tool log
    pub fn append_tool_log(&self, entry: &Value) -> Result<()> {
        let branch = self.active_branch()?;
        let key = Self::branch_key(&branch, TOOL_LOG_FILE);
        self.dir.append_line(&key, &serde_json::to_string(entry)?)?;
        Ok(())
    }

    /// All tool log entries for the active branch, oldest first
    pub fn read_tool_log(&self) -> Result<Vec<Value>> {
        let branch = self.active_branch()?;
        let key = Self::branch_key(&branch, TOOL_LOG_FILE);
        let raw = self.dir.read(&key)?.unwrap_or_default();
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    /// Copy the active branch's scalar files into a new snapshot tagged with
    /// an opaque head reference and a message; returns the snapshot id.
    ///
    /// Agent snapshots are never evicted: they are the undo history for
    /// agent-side state and are tiny relative to repo snapshots.
    pub fn snapshot(&self, head_ref: &str, message: &str) -> Result<String> {
        let branch = self.active_branch()?;
        let mut snap_id = format!("snap_{}", now_ms());
        let mut suffix = 1;
        while self.dir.exists(&format!("branches/{branch}/snapshots/{snap_id}")) {
            snap_id = format!("snap_{}_{suffix}", now_ms());
            suffix += 1;
        }
        for file in BRANCH_SCALAR_FILES {
            if let Some(contents) = self.dir.read(&Self::branch_key(&branch, file))? {
                self.dir.write(&Self::snapshot_key(&branch, &snap_id, file), &contents)?;
            }
        }
        let meta = AgentSnapshotMeta {
            id: snap_id.clone(),
            head: head_ref.to_string(),
            message: message.to_string(),
            ts: now_ms(),
        };
        self.dir.write_atomic(
            &Self::snapshot_key(&branch, &snap_id, "meta.json"),
            &serde_json::to_string_pretty(&meta)?,
        )?;
        info!(branch, snapshot = %snap_id, "agent snapshot created");
        Ok(snap_id)
    }

    /// Copy a snapshot's files back over the active branch's current files
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let branch = self.active_branch()?;
        let snap_dir = format!("branches/{branch}/snapshots/{snapshot_id}");
        if !self.dir.exists(&snap_dir) {
            return Err(StoreError::NotFound(format!("snapshot {snapshot_id}")));
        }
        for file in BRANCH_SCALAR_FILES {
            if let Some(contents) = self.dir.read(&Self::snapshot_key(&branch, snapshot_id, file))? {
                self.dir.write(&Self::branch_key(&branch, file), &contents)?;
            }
        }
        info!(branch, snapshot = snapshot_id, "agent snapshot restored");
        Ok(())
    }

    /// Snapshot metadata for the active branch, oldest first
    pub fn list_snapshots(&self) -> Result<Vec<AgentSnapshotMeta>> {
        let branch = self.active_branch()?;
        let mut metas = Vec::new();
        for id in self.dir.list_dirs(&format!("branches/{branch}/snapshots"))? {
            if let Some(raw) = self.dir.read(&Self::snapshot_key(&branch, &id, "meta.json"))? {
                metas.push(serde_json::from_str(&raw)?);
            }
        }
        Ok(metas)
    }

    /// Read a named scalar file from the active branch
    pub fn read_file(&self, file: &str) -> Result<Option<String>> {
        let branch = self.active_branch()?;
        self.dir.read(&Self::branch_key(&branch, file))
    }

    /// Write a named scalar file on the active branch atomically
    pub fn write_file(&self, file: &str, contents: &str) -> Result<()> {
        let branch = self.active_branch()?;
        self.dir.write_atomic(&Self::branch_key(&branch, file), contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> BranchStore {
        let store = BranchStore::open(temp.path()).unwrap();
        store.ensure_session(DEFAULT_BRANCH).unwrap();
        store
    }

    #[test]
    fn test_ensure_session_creates_fixed_file_set() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert_eq!(store.active_branch().unwrap(), "main");
        for file in BRANCH_SCALAR_FILES {
            assert!(store.read_file(file).unwrap().is_some(), "missing {file}");
        }
        assert!(temp.path().join("branches/main/tool_log.jsonl").exists());
        assert!(temp.path().join("branches/main/repo_map").is_dir());

        // Idempotent: a second call must not clobber existing data
        store.write_file("memory.md", "remembered").unwrap();
        store.ensure_session(DEFAULT_BRANCH).unwrap();
        assert_eq!(store.read_file("memory.md").unwrap().unwrap(), "remembered");
    }

    #[test]
    fn test_branch_isolation() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.write_pending_patch(&json!({"diff": "A"})).unwrap();
        assert!(store.has_pending_patch().unwrap());

        store.switch_branch("feature").unwrap();
        assert_eq!(store.active_branch().unwrap(), "feature");
        assert!(!store.has_pending_patch().unwrap());
        assert_eq!(store.read_pending_patch().unwrap(), json!({}));

        store.switch_branch("main").unwrap();
        assert_eq!(store.read_pending_patch().unwrap(), json!({"diff": "A"}));
    }

    #[test]
    fn test_list_branches() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.switch_branch("feature").unwrap();
        store.switch_branch("bugfix").unwrap();
        assert_eq!(store.list_branches().unwrap(), vec!["bugfix", "feature", "main"]);
    }

    #[test]
    fn test_pending_patch_clear_and_malformed() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.write_pending_patch(&json!({"diff": "x"})).unwrap();
        store.clear_pending_patch().unwrap();
        assert!(!store.has_pending_patch().unwrap());

        // A malformed record degrades to an empty object, never an error
        store.write_file("pending_patch.json", "not json").unwrap();
        assert_eq!(store.read_pending_patch().unwrap(), json!({}));
    }

    #[test]
    fn test_snapshot_roundtrip_byte_identical() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.write_file("plan.md", "1. original plan").unwrap();
        store.write_pending_patch(&json!({"diff": "keep me"})).unwrap();
        let snap_id = store.snapshot("abc123", "before edits").unwrap();

        let plan_before = store.read_file("plan.md").unwrap().unwrap();
        let patch_before = store.read_file("pending_patch.json").unwrap().unwrap();

        store.write_file("plan.md", "2. mutated").unwrap();
        store.clear_pending_patch().unwrap();

        store.restore_snapshot(&snap_id).unwrap();
        assert_eq!(store.read_file("plan.md").unwrap().unwrap(), plan_before);
        assert_eq!(store.read_file("pending_patch.json").unwrap().unwrap(), patch_before);
    }

    #[test]
    fn test_restore_unknown_snapshot_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let err = store.restore_snapshot("snap_missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_snapshot_meta_and_listing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let id = store.snapshot("deadbeef", "first").unwrap();
        let snaps = store.list_snapshots().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].id, id);
        assert_eq!(snaps[0].head, "deadbeef");
        assert_eq!(snaps[0].message, "first");
    }

    #[test]
    fn test_snapshots_are_branch_local() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let id = store.snapshot("h1", "on main").unwrap();
        store.switch_branch("feature").unwrap();

        assert!(store.list_snapshots().unwrap().is_empty());
        assert!(store.restore_snapshot(&id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_tool_log_append_only() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.append_tool_log(&json!({"tool": "grep", "ok": true})).unwrap();
        store.append_tool_log(&json!({"tool": "edit", "ok": false})).unwrap();

        let entries = store.read_tool_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["tool"], "grep");
        assert_eq!(entries[1]["tool"], "edit");
    }
}
