//! Bounded-history backup/restore of the working tree
//!
//! Independent of any version-control system: speculative changes can be
//! applied and rolled back regardless of the user's own commit discipline.
//! History is capped - past `max_snapshots` the oldest entries are evicted
//! and their directories deleted.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::keydir::{FsKeyDir, KeyDir};
use crate::now_ms;

/// Snapshots kept before oldest-first eviction
pub const DEFAULT_MAX_SNAPSHOTS: usize = 3;

/// Per-file size ceiling; larger files are skipped, not truncated
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10_000_000;

/// Head sentinel before any snapshot has been taken
pub const WORKING_HEAD: &str = "working";

/// Directories pruned from the walk: vcs metadata, dependency/build caches,
/// model-weight storage, and the agent's own state directory.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".agentd",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "dist",
    "build",
    "target",
    "models",
];

const EXCLUDE_FILES: &[&str] = &[".DS_Store"];

const INDEX_KEY: &str = "index.json";
const HEAD_KEY: &str = "head.json";

/// Index entry for one repository snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSnapshotMeta {
    pub snapshot_id: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    pub message: String,
    pub file_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeadRecord {
    head: String,
}

/// Tuning knobs for the cache
#[derive(Debug, Clone)]
pub struct RepoCacheConfig {
    pub max_snapshots: usize,
    pub max_file_bytes: u64,
    /// Defaults to `<repo_root>/.agentd/snapshots`
    pub cache_dir: Option<PathBuf>,
    pub exclude_dirs: Vec<String>,
}

impl Default for RepoCacheConfig {
    fn default() -> Self {
        Self {
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            cache_dir: None,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Bounded backup/restore cache over a working tree
pub struct RepoSnapshotCache {
    repo_root: PathBuf,
    cache_dir: PathBuf,
    meta: FsKeyDir,
    max_snapshots: usize,
    max_file_bytes: u64,
    exclude_dirs: HashSet<String>,
}

impl RepoSnapshotCache {
    /// Open a cache for a working tree
    pub fn open(repo_root: impl AsRef<Path>, config: RepoCacheConfig) -> Result<Self> {
        let repo_root = repo_root.as_ref().to_path_buf();
        let cache_dir = config
            .cache_dir
            .unwrap_or_else(|| repo_root.join(".agentd").join("snapshots"));
        let meta = FsKeyDir::open(&cache_dir)?;
        if !meta.exists(INDEX_KEY) {
            meta.write_atomic(INDEX_KEY, "[]")?;
        }
        debug!(repo_root = %repo_root.display(), cache_dir = %cache_dir.display(), "opened repo snapshot cache");
        Ok(Self {
            repo_root,
            cache_dir,
            meta,
            max_snapshots: config.max_snapshots.max(1),
            max_file_bytes: config.max_file_bytes,
            exclude_dirs: config.exclude_dirs.into_iter().collect(),
        })
    }

    /// Open with default configuration
    pub fn with_defaults(repo_root: impl AsRef<Path>) -> Result<Self> {
        Self::open(repo_root, RepoCacheConfig::default())
    }

    /// Relative paths of every file eligible for snapshotting, in a stable
    /// walk order. Prunes the denylist and the cache directory itself, skips
    /// symlinks and files above the size ceiling.
    fn eligible_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.repo_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let path = entry.path();
                if path == self.repo_root {
                    return true;
                }
                if path.starts_with(&self.cache_dir) {
                    return false;
                }
                if entry.file_type().is_dir()
                    && let Some(name) = path.file_name().and_then(|n| n.to_str())
                    && self.exclude_dirs.contains(name)
                {
                    return false;
                }
                true
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path_is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if EXCLUDE_FILES.contains(&name.as_ref()) {
                continue;
            }
            match entry.metadata() {
                Ok(md) if md.len() > self.max_file_bytes => continue,
                Ok(_) => {}
                Err(_) => continue,
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.repo_root) {
                files.push(rel.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Copy every eligible file into a new snapshot directory, write its
    /// manifest, append to the bounded index (evicting the oldest past the
    /// cap), and move the head pointer.
    pub fn snapshot(&self, message: &str) -> Result<RepoSnapshotMeta> {
        let snap_id = format!(
            "snap_{}_{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::now_v7().simple().to_string()[..8]
        );
        let snap_root = self.cache_dir.join(&snap_id);
        fs::create_dir_all(&snap_root)?;

        let files = self.eligible_files()?;
        let mut manifest: Vec<String> = Vec::with_capacity(files.len());
        for rel in &files {
            let src = self.repo_root.join(rel);
            let dst = snap_root.join(rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dst)?;
            manifest.push(rel.to_string_lossy().into_owned());
        }

        self.meta.write_atomic(
            &format!("{snap_id}/manifest.json"),
            &serde_json::to_string_pretty(&manifest)?,
        )?;

        let meta = RepoSnapshotMeta {
            snapshot_id: snap_id.clone(),
            created_at: now_ms(),
            message: message.to_string(),
            file_count: manifest.len(),
        };

        let mut index = self.read_index();
        index.push(meta.clone());
        if index.len() > self.max_snapshots {
            index.drain(..index.len() - self.max_snapshots);
        }
        self.write_index(&index)?;
        self.trim_old(&index)?;
        self.write_head(&snap_id)?;

        info!(snapshot = %snap_id, files = meta.file_count, "repo snapshot created");
        Ok(meta)
    }

    /// Revert the working tree to a snapshot: delete eligible files that are
    /// absent from its manifest (additions made since), then copy every
    /// manifest entry back. Idempotent - a second restore of the same id
    /// yields an identical tree.
    pub fn restore(&self, snapshot_id: &str) -> Result<()> {
        let manifest_key = format!("{snapshot_id}/manifest.json");
        let raw = self
            .meta
            .read(&manifest_key)?
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {snapshot_id}")))?;
        let manifest: Vec<String> = serde_json::from_str(&raw)?;
        let wanted: HashSet<&str> = manifest.iter().map(|s| s.as_str()).collect();

        for rel in self.eligible_files()? {
            let rel_str = rel.to_string_lossy();
            if !wanted.contains(rel_str.as_ref()) {
                let path = self.repo_root.join(&rel);
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove file during restore");
                }
            }
        }

        let snap_root = self.cache_dir.join(snapshot_id);
        for rel in &manifest {
            let src = snap_root.join(rel);
            if !src.exists() {
                continue;
            }
            let dst = self.repo_root.join(rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dst)?;
        }

        self.write_head(snapshot_id)?;
        info!(snapshot = snapshot_id, "repo snapshot restored");
        Ok(())
    }

    /// Index entries, oldest first
    pub fn list_snapshots(&self) -> Vec<RepoSnapshotMeta> {
        self.read_index()
    }

    /// Current head snapshot id, or the `"working"` sentinel if no snapshot
    /// has ever been taken
    pub fn get_head(&self) -> String {
        match self.meta.read(HEAD_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<HeadRecord>(&raw)
                .map(|h| h.head)
                .unwrap_or_else(|_| WORKING_HEAD.to_string()),
            _ => WORKING_HEAD.to_string(),
        }
    }

    fn read_index(&self) -> Vec<RepoSnapshotMeta> {
        match self.meta.read(INDEX_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn write_index(&self, index: &[RepoSnapshotMeta]) -> Result<()> {
        self.meta.write_atomic(INDEX_KEY, &serde_json::to_string_pretty(index)?)
    }

    /// Delete snapshot directories no longer referenced by the index
    fn trim_old(&self, index: &[RepoSnapshotMeta]) -> Result<()> {
        let keep: HashSet<&str> = index.iter().map(|m| m.snapshot_id.as_str()).collect();
        for name in self.meta.list_dirs("")? {
            if !keep.contains(name.as_str()) {
                debug!(snapshot = %name, "evicting repo snapshot");
                self.meta.remove_tree(&name)?;
            }
        }
        Ok(())
    }

    fn write_head(&self, snapshot_id: &str) -> Result<()> {
        let record = HeadRecord {
            head: snapshot_id.to_string(),
        };
        self.meta.write_atomic(HEAD_KEY, &serde_json::to_string_pretty(&record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn read(root: &Path, rel: &str) -> Option<String> {
        fs::read_to_string(root.join(rel)).ok()
    }

    fn cache(temp: &TempDir) -> RepoSnapshotCache {
        RepoSnapshotCache::with_defaults(temp.path()).unwrap()
    }

    #[test]
    fn test_head_sentinel_before_any_snapshot() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        assert_eq!(cache.get_head(), WORKING_HEAD);
    }

    #[test]
    fn test_snapshot_captures_tree_and_moves_head() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/main.rs", "fn main() {}");
        write(temp.path(), "README.md", "# hello");

        let cache = cache(&temp);
        let meta = cache.snapshot("initial").unwrap();

        assert_eq!(meta.file_count, 2);
        assert_eq!(cache.get_head(), meta.snapshot_id);
        assert_eq!(cache.list_snapshots().len(), 1);
    }

    #[test]
    fn test_excluded_dirs_and_oversized_files_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "keep.txt", "yes");
        write(temp.path(), ".git/config", "no");
        write(temp.path(), "node_modules/pkg/index.js", "no");
        write(temp.path(), "target/debug/bin", "no");

        let cache = RepoSnapshotCache::open(
            temp.path(),
            RepoCacheConfig {
                max_file_bytes: 4,
                ..Default::default()
            },
        )
        .unwrap();
        write(temp.path(), "big.bin", "way too large");

        let meta = cache.snapshot("").unwrap();
        assert_eq!(meta.file_count, 1);
    }

    #[test]
    fn test_retention_evicts_oldest_and_removes_directory() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "file.txt", "v0");

        let cache = RepoSnapshotCache::open(
            temp.path(),
            RepoCacheConfig {
                max_snapshots: 2,
                ..Default::default()
            },
        )
        .unwrap();

        let first = cache.snapshot("one").unwrap();
        write(temp.path(), "file.txt", "v1");
        let second = cache.snapshot("two").unwrap();
        write(temp.path(), "file.txt", "v2");
        let third = cache.snapshot("three").unwrap();

        let index = cache.list_snapshots();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].snapshot_id, second.snapshot_id);
        assert_eq!(index[1].snapshot_id, third.snapshot_id);

        let cache_dir = temp.path().join(".agentd/snapshots");
        assert!(!cache_dir.join(&first.snapshot_id).exists());
        assert!(cache_dir.join(&third.snapshot_id).exists());

        // Evicted snapshot is a hard NotFound, no silent fallback
        assert!(cache.restore(&first.snapshot_id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_restore_reverts_edits_and_additions() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "original");

        let cache = cache(&temp);
        let meta = cache.snapshot("baseline").unwrap();

        write(temp.path(), "a.txt", "mutated");
        write(temp.path(), "added.txt", "new file");

        cache.restore(&meta.snapshot_id).unwrap();
        assert_eq!(read(temp.path(), "a.txt").unwrap(), "original");
        assert!(read(temp.path(), "added.txt").is_none());
        assert_eq!(cache.get_head(), meta.snapshot_id);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "original");
        write(temp.path(), "nested/b.txt", "deep");

        let cache = cache(&temp);
        let meta = cache.snapshot("baseline").unwrap();

        write(temp.path(), "a.txt", "changed");
        cache.restore(&meta.snapshot_id).unwrap();
        let first_a = read(temp.path(), "a.txt").unwrap();
        let first_b = read(temp.path(), "nested/b.txt").unwrap();

        cache.restore(&meta.snapshot_id).unwrap();
        assert_eq!(read(temp.path(), "a.txt").unwrap(), first_a);
        assert_eq!(read(temp.path(), "nested/b.txt").unwrap(), first_b);
    }

    #[test]
    fn test_restore_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let err = cache.restore("snap_nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restore_recreates_deleted_manifest_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/lib.rs", "pub fn f() {}");

        let cache = cache(&temp);
        let meta = cache.snapshot("").unwrap();

        fs::remove_file(temp.path().join("src/lib.rs")).unwrap();
        cache.restore(&meta.snapshot_id).unwrap();
        assert_eq!(read(temp.path(), "src/lib.rs").unwrap(), "pub fn f() {}");
    }
}
