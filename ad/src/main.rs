//! AgentD - local coding assistant control plane
//!
//! CLI entry point for classification, planning, branch state, snapshots,
//! and the background task worker.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use eyre::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use agentd::cli::{BranchCommand, Cli, Command, OutputFormat, SnapshotCommand, TaskCommand};
use agentd::config::Config;
use agentd::intent::classify;
use agentd::tasks::{TaskHandler, TaskQueue, TaskRecord, TaskWorker};
use agentd::Agent;
use statestore::{BranchStore, RepoSnapshotCache};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentd")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("agentd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(session) = cli.session {
        config.session.id = session;
    }
    config.validate()?;

    let repo_root = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if !repo_root.is_dir() {
        return Err(eyre::eyre!("Repository root not found: {}", repo_root.display()));
    }

    info!(repo = %repo_root.display(), session = %config.session.id, "AgentD loaded config");

    // Dispatch command
    match cli.command {
        Command::Init => cmd_init(&config, &repo_root),
        Command::Classify { text } => cmd_classify(&text),
        Command::Plan { text } => cmd_plan(&config, &repo_root, &text),
        Command::Branch { command } => match command {
            BranchCommand::List => cmd_branch_list(&config, &repo_root),
            BranchCommand::Switch { name } => cmd_branch_switch(&config, &repo_root, &name),
        },
        Command::Snapshot { command } => match command {
            SnapshotCommand::Take { message } => cmd_snapshot_take(&config, &repo_root, &message),
            SnapshotCommand::List { format } => cmd_snapshot_list(&config, &repo_root, format),
            SnapshotCommand::Restore { id } => cmd_snapshot_restore(&config, &repo_root, &id),
            SnapshotCommand::Head => cmd_snapshot_head(&config, &repo_root),
        },
        Command::Task { command } => match command {
            TaskCommand::Submit { task_type, payload } => cmd_task_submit(&config, &repo_root, &task_type, &payload),
            TaskCommand::Status { id } => cmd_task_status(&config, &repo_root, &id),
            TaskCommand::List { limit, format } => cmd_task_list(&config, &repo_root, limit, format),
            TaskCommand::Cancel { id } => cmd_task_cancel(&config, &repo_root, &id),
            TaskCommand::Logs { id, after } => cmd_task_logs(&config, &repo_root, &id, after),
        },
        Command::Worker => cmd_worker(&config, &repo_root).await,
    }
}

fn open_store(config: &Config, repo_root: &Path) -> Result<BranchStore> {
    Ok(BranchStore::open(config.session.session_root(repo_root))?)
}

fn open_cache(config: &Config, repo_root: &Path) -> Result<RepoSnapshotCache> {
    Ok(RepoSnapshotCache::open(repo_root, config.snapshots.cache_config())?)
}

fn open_queue(config: &Config, repo_root: &Path) -> Result<TaskQueue> {
    TaskQueue::open(config.session.tasks_root(repo_root))
}

/// Initialize session state for a repository
fn cmd_init(config: &Config, repo_root: &Path) -> Result<()> {
    let store = open_store(config, repo_root)?;
    store.ensure_session(&config.session.default_branch)?;
    let cache = open_cache(config, repo_root)?;

    println!("Initialized session '{}' in {}", config.session.id, repo_root.display());
    println!("Active branch: {}", store.active_branch()?);
    println!("Working-tree snapshots: {}", cache.list_snapshots().len());
    Ok(())
}

/// Classify a request without planning
fn cmd_classify(text: &str) -> Result<()> {
    println!("{}", classify(text));
    Ok(())
}

/// Run one planner step and print the decision
fn cmd_plan(config: &Config, repo_root: &Path, text: &str) -> Result<()> {
    let store = open_store(config, repo_root)?;
    let mut agent = Agent::new(store, true)?;
    let output = agent.handle(text)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// List branches, marking the active one
fn cmd_branch_list(config: &Config, repo_root: &Path) -> Result<()> {
    let store = open_store(config, repo_root)?;
    store.ensure_session(&config.session.default_branch)?;
    let active = store.active_branch()?;

    for branch in store.list_branches()? {
        let marker = if branch == active { "*" } else { " " };
        println!("{} {}", marker, branch);
    }
    Ok(())
}

/// Switch the active branch, creating it if missing
fn cmd_branch_switch(config: &Config, repo_root: &Path, name: &str) -> Result<()> {
    let store = open_store(config, repo_root)?;
    store.ensure_session(&config.session.default_branch)?;
    store.switch_branch(name)?;
    println!("Switched to branch '{}'", name);
    Ok(())
}

/// Capture a working-tree snapshot
fn cmd_snapshot_take(config: &Config, repo_root: &Path, message: &str) -> Result<()> {
    let cache = open_cache(config, repo_root)?;
    let meta = cache.snapshot(message)?;
    println!("Captured {} ({} files)", meta.snapshot_id, meta.file_count);
    Ok(())
}

/// List retained snapshots
fn cmd_snapshot_list(config: &Config, repo_root: &Path, format: OutputFormat) -> Result<()> {
    let cache = open_cache(config, repo_root)?;
    let snapshots = cache.list_snapshots();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        OutputFormat::Text => {
            if snapshots.is_empty() {
                println!("No snapshots retained.");
                return Ok(());
            }
            let head = cache.get_head();
            for meta in &snapshots {
                let marker = if meta.snapshot_id == head { "*" } else { " " };
                println!(
                    "{} {}  {} files  {}",
                    marker, meta.snapshot_id, meta.file_count, meta.message
                );
            }
        }
    }
    Ok(())
}

/// Restore the working tree from a snapshot
fn cmd_snapshot_restore(config: &Config, repo_root: &Path, id: &str) -> Result<()> {
    let cache = open_cache(config, repo_root)?;
    cache.restore(id)?;
    println!("Restored working tree from {}", id);
    Ok(())
}

/// Show the current head marker
fn cmd_snapshot_head(config: &Config, repo_root: &Path) -> Result<()> {
    let cache = open_cache(config, repo_root)?;
    println!("{}", cache.get_head());
    Ok(())
}

/// Submit a task to the durable queue
fn cmd_task_submit(config: &Config, repo_root: &Path, task_type: &str, payload: &str) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload must be valid JSON")?;
    let queue = open_queue(config, repo_root)?;
    let id = queue.submit(task_type, payload)?;
    println!("{}", id);
    Ok(())
}

/// Show a task's current status
fn cmd_task_status(config: &Config, repo_root: &Path, id: &str) -> Result<()> {
    let queue = open_queue(config, repo_root)?;
    let record = queue.status(id)?.ok_or_else(|| eyre::eyre!("Unknown task: {}", id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    if let Some(result) = queue.read_result(id)? {
        println!("Result:");
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

/// List recent tasks
fn cmd_task_list(config: &Config, repo_root: &Path, limit: usize, format: OutputFormat) -> Result<()> {
    let queue = open_queue(config, repo_root)?;
    let tasks = queue.list(limit)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks submitted.");
                return Ok(());
            }
            for task in &tasks {
                println!("{}  {:9}  {}", task.id, task.status.to_string(), task.task_type);
            }
        }
    }
    Ok(())
}

/// Cancel a task that has not started
fn cmd_task_cancel(config: &Config, repo_root: &Path, id: &str) -> Result<()> {
    let queue = open_queue(config, repo_root)?;
    if queue.cancel(id)? {
        println!("Cancelled {}", id);
    } else {
        println!("{} already started or finished; not cancelled", id);
    }
    Ok(())
}

/// Show a task's log
fn cmd_task_logs(config: &Config, repo_root: &Path, id: &str, after: Option<i64>) -> Result<()> {
    let queue = open_queue(config, repo_root)?;
    for entry in queue.read_logs(id, after)? {
        println!("{}  {}", entry.ts, entry.msg);
    }
    Ok(())
}

/// Run the task worker in the foreground until Ctrl+C
async fn cmd_worker(config: &Config, repo_root: &Path) -> Result<()> {
    let queue = open_queue(config, repo_root)?;

    let mut handlers: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
    handlers.insert(
        "classify".to_string(),
        Arc::new(ClassifyTask) as Arc<dyn TaskHandler>,
    );
    handlers.insert(
        "plan".to_string(),
        Arc::new(PlanTask {
            session_root: config.session.session_root(repo_root),
        }) as Arc<dyn TaskHandler>,
    );

    let handle = TaskWorker::new(queue, handlers)
        .with_poll_interval(std::time::Duration::from_millis(config.worker.poll_interval_ms))
        .with_scan_limit(config.worker.scan_limit)
        .spawn();

    println!("Worker running on {} (Ctrl+C to stop)", config.session.tasks_root(repo_root).display());
    tokio::signal::ctrl_c().await?;

    println!("Stopping worker...");
    handle.shutdown().await;
    Ok(())
}

fn payload_text(task: &TaskRecord) -> Result<String> {
    task.payload
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| eyre::eyre!("payload must contain a 'text' string"))
}

/// Task handler that classifies the payload text
struct ClassifyTask;

#[async_trait]
impl TaskHandler for ClassifyTask {
    async fn run(&self, task: &TaskRecord) -> Result<Value> {
        let text = payload_text(task)?;
        Ok(json!({ "intent": classify(&text) }))
    }
}

/// Task handler that runs one planner step against the session's branch state
struct PlanTask {
    session_root: PathBuf,
}

#[async_trait]
impl TaskHandler for PlanTask {
    async fn run(&self, task: &TaskRecord) -> Result<Value> {
        let text = payload_text(task)?;
        let store = BranchStore::open(&self.session_root)?;
        let mut agent = Agent::new(store, true)?;
        let output = agent.handle(&text)?;
        Ok(serde_json::to_value(&output)?)
    }
}
