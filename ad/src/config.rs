//! AgentD configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use statestore::{DEFAULT_EXCLUDE_DIRS, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_SNAPSHOTS};

/// Main AgentD configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session and branch state
    pub session: SessionConfig,

    /// Repository snapshot cache
    pub snapshots: SnapshotConfig,

    /// Background worker
    pub worker: WorkerConfig,
}

impl Config {
    /// Validate configuration before use. Call early in startup to fail
    /// fast with a clear message.
    pub fn validate(&self) -> Result<()> {
        if self.snapshots.max_snapshots == 0 {
            return Err(eyre::eyre!("snapshots.max-snapshots must be at least 1"));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(eyre::eyre!("worker.poll-interval-ms must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain: explicit path, then
    /// `.agentd.yml` in the cwd, then the user config dir, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".agentd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("agentd").join("agentd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Session and branch state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session identifier; each session gets its own branch tree
    pub id: String,

    /// Branch created and activated by init
    #[serde(rename = "default-branch")]
    pub default_branch: String,

    /// Agent state directory, relative to the repository root
    #[serde(rename = "state-dir")]
    pub state_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            default_branch: "main".to_string(),
            state_dir: ".agentd".to_string(),
        }
    }
}

impl SessionConfig {
    /// Root directory for this session's branches
    pub fn session_root(&self, repo_root: &Path) -> PathBuf {
        repo_root
            .join(&self.state_dir)
            .join("state")
            .join("sessions")
            .join(&self.id)
    }

    /// Root directory for the task queue
    pub fn tasks_root(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir).join("tasks")
    }
}

/// Repository snapshot cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// History bound; oldest entries past the cap are evicted
    #[serde(rename = "max-snapshots")]
    pub max_snapshots: usize,

    /// Per-file size ceiling in bytes
    #[serde(rename = "max-file-bytes")]
    pub max_file_bytes: u64,

    /// Directory names pruned from the walk
    #[serde(rename = "exclude-dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SnapshotConfig {
    /// Build the cache configuration for a repository
    pub fn cache_config(&self) -> statestore::repo::RepoCacheConfig {
        statestore::repo::RepoCacheConfig {
            max_snapshots: self.max_snapshots,
            max_file_bytes: self.max_file_bytes,
            cache_dir: None,
            exclude_dirs: self.exclude_dirs.clone(),
        }
    }
}

/// Background worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sweep interval between queue-log scans in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Queue-log entries scanned per sweep
    #[serde(rename = "scan-limit")]
    pub scan_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            scan_limit: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.session.id, "default");
        assert_eq!(config.session.default_branch, "main");
        assert_eq!(config.snapshots.max_snapshots, 3);
        assert_eq!(config.snapshots.max_file_bytes, 10_000_000);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
session:
  id: review
  default-branch: trunk
  state-dir: .assistant

snapshots:
  max-snapshots: 5
  max-file-bytes: 1000000

worker:
  poll-interval-ms: 250
  scan-limit: 50
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.session.id, "review");
        assert_eq!(config.session.default_branch, "trunk");
        assert_eq!(config.session.state_dir, ".assistant");
        assert_eq!(config.snapshots.max_snapshots, 5);
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.worker.scan_limit, 50);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
snapshots:
  max-snapshots: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.snapshots.max_snapshots, 10);
        assert_eq!(config.snapshots.max_file_bytes, 10_000_000);
        assert_eq!(config.session.id, "default");
        assert_eq!(config.worker.poll_interval_ms, 1000);
    }

    #[test]
    fn test_validation_rejects_zero_cap() {
        let mut config = Config::default();
        config.snapshots.max_snapshots = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_paths() {
        let config = SessionConfig::default();
        let root = Path::new("/repo");
        assert_eq!(
            config.session_root(root),
            PathBuf::from("/repo/.agentd/state/sessions/default")
        );
        assert_eq!(config.tasks_root(root), PathBuf::from("/repo/.agentd/tasks"));
    }
}
