//! Durable task queue
//!
//! Submission appends to an append-only `tasks.jsonl` log and writes initial
//! per-task metadata, then returns immediately - the request path never
//! blocks on execution. Task ids are derived from submission time, giving a
//! stable, monotonically increasing order.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use statestore::{now_ms, FsKeyDir, KeyDir};

const QUEUE_LOG_KEY: &str = "tasks.jsonl";

/// Task lifecycle status. Transitions are owned by the worker, except for
/// the pre-start `queued -> cancelled` edge owned by [`TaskQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One unit of deferred work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    /// Submission timestamp (Unix milliseconds)
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line of a task's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix milliseconds
    pub ts: i64,
    pub msg: String,
}

/// Durable submission log plus per-task metadata
#[derive(Clone)]
pub struct TaskQueue {
    dir: Arc<dyn KeyDir>,
    /// Last id issued by this instance, to keep ids strictly increasing
    /// even within one millisecond
    last_id_ms: Arc<AtomicI64>,
}

impl TaskQueue {
    /// Create a queue over an existing key directory
    pub fn new(dir: Arc<dyn KeyDir>) -> Self {
        Self {
            dir,
            last_id_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Open a filesystem-backed queue rooted at a tasks directory
    pub fn open(tasks_root: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(FsKeyDir::open(tasks_root)?)))
    }

    fn next_id(&self) -> (String, i64) {
        let now = now_ms();
        let ms = self
            .last_id_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .map(|last| now.max(last + 1))
            .unwrap_or(now);
        (format!("task_{ms}"), ms)
    }

    fn meta_key(task_id: &str) -> String {
        format!("{task_id}/meta.json")
    }

    /// Append a task to the queue log and write its initial metadata.
    /// Returns immediately with the new time-ordered id.
    pub fn submit(&self, task_type: &str, payload: Value) -> Result<String> {
        let (id, ts) = self.next_id();
        let record = TaskRecord {
            id: id.clone(),
            task_type: task_type.to_string(),
            payload,
            status: TaskStatus::Queued,
            ts,
            error: None,
        };
        self.dir.append_line(QUEUE_LOG_KEY, &serde_json::to_string(&record)?)?;
        self.write_meta(&record)?;
        debug!(task = %id, task_type, "task submitted");
        Ok(id)
    }

    fn write_meta(&self, record: &TaskRecord) -> Result<()> {
        self.dir
            .write_atomic(&Self::meta_key(&record.id), &serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// The last `limit` submitted tasks in submission order, each merged
    /// with its current per-task metadata
    pub fn list(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let raw = self.dir.read(QUEUE_LOG_KEY)?.unwrap_or_default();
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        let mut tasks = Vec::with_capacity(lines.len() - start);
        for line in &lines[start..] {
            let mut record: TaskRecord = serde_json::from_str(line)?;
            if let Some(meta) = self.status(&record.id)? {
                record.status = meta.status;
                record.error = meta.error;
            }
            tasks.push(record);
        }
        Ok(tasks)
    }

    /// Current metadata for a task, `None` if unknown
    pub fn status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        match self.dir.read(&Self::meta_key(task_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn require(&self, task_id: &str) -> Result<TaskRecord> {
        self.status(task_id)?.ok_or_else(|| eyre!("unknown task: {task_id}"))
    }

    /// Transition a task's status (worker-owned edges)
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut record = self.require(task_id)?;
        record.status = status;
        self.write_meta(&record)
    }

    /// Record a failure with its error text
    pub fn set_failed(&self, task_id: &str, error: &str) -> Result<()> {
        let mut record = self.require(task_id)?;
        record.status = TaskStatus::Failed;
        record.error = Some(error.to_string());
        self.write_meta(&record)
    }

    /// Best-effort, pre-start-only cancellation: flips queued to cancelled
    /// and returns true; any other state is left untouched and returns
    /// false. A running task is never stopped mid-execution.
    pub fn cancel(&self, task_id: &str) -> Result<bool> {
        let mut record = self.require(task_id)?;
        if record.status != TaskStatus::Queued {
            return Ok(false);
        }
        record.status = TaskStatus::Cancelled;
        self.write_meta(&record)?;
        debug!(task = task_id, "task cancelled before start");
        Ok(true)
    }

    /// Append one line to a task's log
    pub fn append_log(&self, task_id: &str, msg: &str) -> Result<()> {
        let entry = LogEntry {
            ts: now_ms(),
            msg: msg.to_string(),
        };
        self.dir
            .append_line(&format!("{task_id}/logs.jsonl"), &serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Log entries for a task, optionally only those strictly after a
    /// timestamp cursor (incremental tailing)
    pub fn read_logs(&self, task_id: &str, after: Option<i64>) -> Result<Vec<LogEntry>> {
        let raw = self.dir.read(&format!("{task_id}/logs.jsonl"))?.unwrap_or_default();
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(line)?;
            if let Some(cursor) = after
                && entry.ts <= cursor
            {
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Persist a task's result payload
    pub fn write_result(&self, task_id: &str, result: &Value) -> Result<()> {
        self.dir
            .write_atomic(&format!("{task_id}/result.json"), &serde_json::to_string_pretty(result)?)?;
        Ok(())
    }

    /// A task's result payload, `None` if not finished or absent
    pub fn read_result(&self, task_id: &str) -> Result<Option<Value>> {
        match self.dir.read(&format!("{task_id}/result.json"))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
