//! Background task worker
//!
//! A single dedicated consumer: exactly one task executes at a time. The
//! loop blocks on an enqueue channel and additionally sweeps the durable
//! queue log on a fixed interval, so tasks appended by a previous run (or
//! another writer) are still picked up in listed order.
//!
//! Cancellation is best-effort and pre-start only: each task is re-checked
//! against its durable metadata immediately before execution, and a task
//! that already left the queued state is skipped. An in-flight handler is
//! never interrupted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::queue::{TaskQueue, TaskRecord, TaskStatus};

/// Default sweep interval between queue-log scans
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of log entries scanned per sweep
pub const DEFAULT_SCAN_LIMIT: usize = 200;

/// Handler for one task type. Implementations wrap the external
/// collaborators (plan generation, indexing, patching) - the worker itself
/// knows nothing about what a task does.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &TaskRecord) -> Result<Value>;
}

enum WorkerMsg {
    Enqueue(String),
    Shutdown,
}

/// Cloneable handle to a spawned worker
#[derive(Clone)]
pub struct WorkerHandle {
    queue: TaskQueue,
    tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerHandle {
    /// Durably submit a task and wake the worker. The submission is
    /// persisted first, so it survives even if the worker is gone.
    pub async fn submit(&self, task_type: &str, payload: Value) -> Result<String> {
        let id = self.queue.submit(task_type, payload)?;
        let _ = self.tx.send(WorkerMsg::Enqueue(id.clone())).await;
        Ok(id)
    }

    /// Wake the worker for a task submitted through the queue directly
    pub async fn notify(&self, task_id: &str) {
        let _ = self.tx.send(WorkerMsg::Enqueue(task_id.to_string())).await;
    }

    /// Stop the worker loop after the current task finishes
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown).await;
    }
}

/// The single background consumer
pub struct TaskWorker {
    queue: TaskQueue,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    poll_interval: Duration,
    scan_limit: usize,
}

impl TaskWorker {
    pub fn new(queue: TaskQueue, handlers: HashMap<String, Arc<dyn TaskHandler>>) -> Self {
        Self {
            queue,
            handlers,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Spawn the worker onto the runtime and return its handle
    pub fn spawn(self) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(256);
        let handle = WorkerHandle {
            queue: self.queue.clone(),
            tx,
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(self, mut rx: mpsc::Receiver<WorkerMsg>) {
        info!("task worker started");
        // Recovery: tasks still queued in the durable log from a previous run
        self.sweep().await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(WorkerMsg::Enqueue(id)) => self.process(&id).await,
                    Some(WorkerMsg::Shutdown) | None => break,
                },
                _ = ticker.tick() => self.sweep().await,
            }
        }
        info!("task worker stopped");
    }

    /// Scan the queue log in listed order and run whatever is still queued
    async fn sweep(&self) {
        let tasks = match self.queue.list(self.scan_limit) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "failed to scan queue log");
                return;
            }
        };
        for task in tasks {
            if task.status == TaskStatus::Queued {
                self.process(&task.id).await;
            }
        }
    }

    /// Execute one task if it is still queued. Handler failures (and
    /// panics) are recorded on the task and never crash the loop.
    async fn process(&self, task_id: &str) {
        let record = match self.queue.status(task_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(task = task_id, "enqueued task has no metadata, skipping");
                return;
            }
            Err(e) => {
                warn!(task = task_id, error = %e, "failed to read task metadata");
                return;
            }
        };
        // Cancelled (or already handled) between submission and pickup
        if record.status != TaskStatus::Queued {
            debug!(task = task_id, status = %record.status, "skipping non-queued task");
            return;
        }

        if let Err(e) = self.queue.set_status(task_id, TaskStatus::Running) {
            warn!(task = task_id, error = %e, "failed to mark task running");
            return;
        }
        let _ = self.queue.append_log(task_id, &format!("running {}", record.task_type));
        debug!(task = task_id, task_type = %record.task_type, "task started");

        let outcome = match self.handlers.get(&record.task_type) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let task = record.clone();
                // Run in a child task so a panicking handler is recorded as
                // a failure instead of taking the worker down with it
                match tokio::spawn(async move { handler.run(&task).await }).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(join_err) => Err(format!("handler panicked: {join_err}")),
                }
            }
            None => Err(format!("no handler registered for task type '{}'", record.task_type)),
        };

        let finish = match outcome {
            Ok(value) => self
                .queue
                .write_result(task_id, &value)
                .and_then(|_| self.queue.set_status(task_id, TaskStatus::Succeeded))
                .map(|_| info!(task = task_id, "task succeeded")),
            Err(error) => {
                warn!(task = task_id, %error, "task failed");
                self.queue.set_failed(task_id, &error)
            }
        };
        if let Err(e) = finish {
            warn!(task = task_id, error = %e, "failed to record task outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::bail;
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn run(&self, task: &TaskRecord) -> Result<Value> {
            Ok(json!({"echo": task.payload.clone()}))
        }
    }

    struct Boom;

    #[async_trait]
    impl TaskHandler for Boom {
        async fn run(&self, _task: &TaskRecord) -> Result<Value> {
            bail!("kaboom")
        }
    }

    struct Slow;

    #[async_trait]
    impl TaskHandler for Slow {
        async fn run(&self, _task: &TaskRecord) -> Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({"ok": true}))
        }
    }

    struct Panicky;

    #[async_trait]
    impl TaskHandler for Panicky {
        async fn run(&self, _task: &TaskRecord) -> Result<Value> {
            panic!("unexpected");
        }
    }

    fn handlers() -> HashMap<String, Arc<dyn TaskHandler>> {
        let mut map: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
        map.insert("echo".to_string(), Arc::new(Echo));
        map.insert("boom".to_string(), Arc::new(Boom));
        map.insert("slow".to_string(), Arc::new(Slow));
        map.insert("panicky".to_string(), Arc::new(Panicky));
        map
    }

    async fn wait_for_terminal(queue: &TaskQueue, id: &str) -> TaskRecord {
        for _ in 0..100 {
            if let Some(record) = queue.status(id).unwrap()
                && record.status.is_terminal()
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_task_lifecycle_succeeds() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();
        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();

        let id = handle.submit("echo", json!({"n": 1})).await.unwrap();
        let record = wait_for_terminal(&queue, &id).await;

        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(queue.read_result(&id).unwrap().unwrap()["echo"]["n"], 1);

        let logs = queue.read_logs(&id, None).unwrap();
        assert!(logs.iter().any(|l| l.msg.contains("running echo")));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_handler_is_isolated() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();
        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();

        let bad = handle.submit("boom", json!({})).await.unwrap();
        let good = handle.submit("echo", json!({})).await.unwrap();

        let bad_record = wait_for_terminal(&queue, &bad).await;
        assert_eq!(bad_record.status, TaskStatus::Failed);
        assert!(bad_record.error.unwrap().contains("kaboom"));

        // The failure must not prevent the next queued task from running
        let good_record = wait_for_terminal(&queue, &good).await;
        assert_eq!(good_record.status, TaskStatus::Succeeded);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_task_type_fails() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();
        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();

        let id = handle.submit("mystery", json!({})).await.unwrap();
        let record = wait_for_terminal(&queue, &id).await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("no handler"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_worker() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();
        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();

        let bad = handle.submit("panicky", json!({})).await.unwrap();
        let bad_record = wait_for_terminal(&queue, &bad).await;
        assert_eq!(bad_record.status, TaskStatus::Failed);
        assert!(bad_record.error.unwrap().contains("panicked"));

        let good = handle.submit("echo", json!({})).await.unwrap();
        assert_eq!(wait_for_terminal(&queue, &good).await.status, TaskStatus::Succeeded);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_honored() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();

        // Cancel before any worker exists, then start one
        let id = queue.submit("echo", json!({})).unwrap();
        assert!(queue.cancel(&id).unwrap());

        let handle = TaskWorker::new(queue.clone(), handlers())
            .with_poll_interval(Duration::from_millis(20))
            .spawn();
        handle.notify(&id).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.status(&id).unwrap().unwrap().status, TaskStatus::Cancelled);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_after_start_is_ignored() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();
        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();

        let id = handle.submit("slow", json!({})).await.unwrap();

        // Wait until it is running, then try to cancel
        for _ in 0..100 {
            if queue.status(&id).unwrap().unwrap().status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!queue.cancel(&id).unwrap());

        // Once started it still reaches a real terminal state, never cancelled
        let record = wait_for_terminal(&queue, &id).await;
        assert_eq!(record.status, TaskStatus::Succeeded);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_recovery_runs_preexisting_queued_tasks() {
        let temp = TempDir::new().unwrap();
        let queue = TaskQueue::open(temp.path()).unwrap();

        // Submitted while no worker was alive
        let id = queue.submit("echo", json!({"recovered": true})).unwrap();

        let handle = TaskWorker::new(queue.clone(), handlers()).spawn();
        let record = wait_for_terminal(&queue, &id).await;
        assert_eq!(record.status, TaskStatus::Succeeded);

        handle.shutdown().await;
    }
}
