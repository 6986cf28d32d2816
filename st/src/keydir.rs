//! Key-directory persistence layer
//!
//! A minimal get/set/list/atomic-write interface over slash-separated keys.
//! [`BranchStore`](crate::BranchStore) and the task queue are written against
//! `dyn KeyDir`, so the raw file-tree layout could be swapped for an embedded
//! store without touching planner or session logic.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};

/// Object-safe key/value directory interface.
///
/// Keys are relative, slash-separated paths ("branches/main/state.json").
/// Values are UTF-8 text; every record this crate persists is JSON, JSONL,
/// or markdown.
pub trait KeyDir: Send + Sync {
    /// Read a key, `None` if absent
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write a key, creating parent directories as needed
    fn write(&self, key: &str, contents: &str) -> Result<()>;

    /// Write a key atomically: temp file in the same directory, then rename.
    /// Readers never observe a partial write.
    fn write_atomic(&self, key: &str, contents: &str) -> Result<()>;

    /// Append one line to a key (JSONL logs)
    fn append_line(&self, key: &str, line: &str) -> Result<()>;

    /// Whether a key or directory prefix exists
    fn exists(&self, key: &str) -> bool;

    /// Sorted immediate child names under a directory prefix.
    /// Empty if the prefix does not exist.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Sorted immediate child directory names under a prefix
    fn list_dirs(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a single key; absent keys are a no-op
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove a directory prefix recursively; absent prefixes are a no-op
    fn remove_tree(&self, prefix: &str) -> Result<()>;

    /// Create a directory prefix (and parents) if absent
    fn ensure_dir(&self, prefix: &str) -> Result<()>;
}

/// Filesystem-backed [`KeyDir`] rooted at a directory
pub struct FsKeyDir {
    root: PathBuf,
}

impl FsKeyDir {
    /// Open a key directory, creating the root if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened key directory");
        Ok(Self { root })
    }

    /// Resolve a key to an on-disk path, rejecting escapes from the root
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<PathBuf> {
        if prefix.is_empty() {
            return Ok(self.root.clone());
        }
        self.resolve(prefix)
    }
}

impl KeyDir for FsKeyDir {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.resolve(key)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(())
    }

    fn write_atomic(&self, key: &str, contents: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.clone();
        tmp.set_extension(match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{ext}.tmp"),
            None => "tmp".to_string(),
        });
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn append_line(&self, key: &str, line: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve_prefix(prefix)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_dirs(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve_prefix(prefix)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_tree(&self, prefix: &str) -> Result<()> {
        let path = self.resolve(prefix)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_dir(&self, prefix: &str) -> Result<()> {
        let path = self.resolve(prefix)?;
        fs::create_dir_all(&path)?;
        Ok(())
    }
}
