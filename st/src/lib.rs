//! StateStore - durable agent working memory and working-tree backups
//!
//! Two stores built on a shared key-directory persistence layer:
//!
//! - [`BranchStore`] - named branches of agent working memory (plan, scratch
//!   notes, pending patch) with point-in-time snapshot/restore. Used to undo
//!   *agent* state and to isolate concurrent lines of work.
//! - [`RepoSnapshotCache`] - bounded-history backup/restore of the real
//!   working tree, independent of any version-control system. Used to safely
//!   revert applied changes.
//!
//! Both persist as plain files so state survives restarts and stays
//! inspectable. Writes of scalar records go through atomic temp-then-rename;
//! there is no advisory locking across processes - the deployment model is
//! one active instance per repository, and concurrent writers are
//! last-write-wins by design.

pub mod branch;
pub mod error;
pub mod keydir;
pub mod repo;

pub use branch::{AgentSnapshotMeta, BranchStore, BRANCH_SCALAR_FILES, DEFAULT_BRANCH};
pub use error::{Result, StoreError};
pub use keydir::{FsKeyDir, KeyDir};
pub use repo::{
    RepoCacheConfig, RepoSnapshotCache, RepoSnapshotMeta, DEFAULT_EXCLUDE_DIRS, DEFAULT_MAX_FILE_BYTES,
    DEFAULT_MAX_SNAPSHOTS, WORKING_HEAD,
};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
