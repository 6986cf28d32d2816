//! Durable, observable asynchronous task execution
//!
//! [`TaskQueue`] is the persistence half (append-only submission log plus
//! per-task metadata, logs, and result); [`TaskWorker`] is the single
//! background consumer that executes tasks one at a time.

pub mod queue;
pub mod worker;

pub use queue::{LogEntry, TaskQueue, TaskRecord, TaskStatus};
pub use worker::{TaskHandler, TaskWorker, WorkerHandle};
