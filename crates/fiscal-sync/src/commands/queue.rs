//! Queue inspection and maintenance commands
//!
//! - stats: counts by status
//! - list: operations in processing order, optionally filtered by status
//! - clear: remove all, completed or failed operations
//! - remove: remove one operation

use anyhow::{anyhow, Result};
use fiscal_offline::{OperationStatus, QueuedOperation};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::{QueueClearArgs, QueueCommands, QueueListArgs, QueueRemoveArgs, QueueStatsArgs};
use crate::output;
use crate::utils::{short_id, Context};

/// Main entry point for queue subcommands
pub async fn run(cmd: QueueCommands, ctx: &Context) -> Result<()> {
    match cmd {
        QueueCommands::Stats(args) => stats(args, ctx).await,
        QueueCommands::List(args) => list(args, ctx).await,
        QueueCommands::Clear(args) => clear(args, ctx).await,
        QueueCommands::Remove(args) => remove(args, ctx).await,
    }
}

async fn stats(args: QueueStatsArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let queue = ctx.open_queue(&config.queue).await?;
    let stats = queue.get_stats().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    output::header(&format!("Queue {}", ctx.queue_dir));
    output::kv("Total", &format!("{} / {}", stats.total, config.queue.max_size));
    output::kv("Pending", &stats.pending.to_string());
    output::kv("Processing", &stats.processing.to_string());
    output::kv("Completed", &stats.completed.to_string());
    output::kv("Failed", &stats.failed.to_string());
    output::kv("Conflict", &stats.conflict.to_string());
    Ok(())
}

#[derive(Tabled)]
struct OperationRow {
    id: String,
    priority: String,
    status: String,
    #[tabled(rename = "type")]
    operation_type: String,
    target: String,
    attempts: u32,
    #[tabled(rename = "next retry")]
    next_retry: String,
    #[tabled(rename = "last error")]
    last_error: String,
}

impl From<&QueuedOperation> for OperationRow {
    fn from(op: &QueuedOperation) -> Self {
        Self {
            id: short_id(&op.id).to_string(),
            priority: op.priority.to_string(),
            status: op.status.to_string(),
            operation_type: op.operation_type.to_string(),
            target: format!("{} {}", op.target.method, op.target.endpoint),
            attempts: op.metadata.attempt_count,
            next_retry: op
                .metadata
                .next_retry
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            last_error: op
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// JSON listing leaves the payload out
#[derive(Serialize)]
struct OperationJson<'a> {
    id: &'a str,
    priority: String,
    status: String,
    operation_type: String,
    resource: &'a str,
    method: String,
    endpoint: &'a str,
    attempts: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    next_retry: Option<chrono::DateTime<chrono::Utc>>,
    error: Option<&'a str>,
    payload_bytes: usize,
}

async fn list(args: QueueListArgs, ctx: &Context) -> Result<()> {
    let status = args
        .status
        .as_deref()
        .map(|s| s.parse::<OperationStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let config = ctx.load_config()?;
    let queue = ctx.open_queue(&config.queue).await?;
    let operations = queue.list(status).await;

    if args.json {
        let rows: Vec<OperationJson> = operations
            .iter()
            .map(|op| OperationJson {
                id: &op.id,
                priority: op.priority.to_string(),
                status: op.status.to_string(),
                operation_type: op.operation_type.to_string(),
                resource: &op.target.resource,
                method: op.target.method.to_string(),
                endpoint: &op.target.endpoint,
                attempts: op.metadata.attempt_count,
                created_at: op.metadata.created_at,
                next_retry: op.metadata.next_retry,
                error: op.error.as_ref().map(|e| e.message.as_str()),
                payload_bytes: op.payload.len(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if operations.is_empty() {
        output::info("No operations queued");
        return Ok(());
    }

    let rows: Vec<OperationRow> = operations.iter().map(OperationRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
    Ok(())
}

async fn clear(args: QueueClearArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let queue = ctx.open_queue(&config.queue).await?;

    let (removed, what) = if args.completed {
        (queue.clear_completed().await?, "completed ")
    } else if args.failed {
        (queue.clear_failed().await?, "failed ")
    } else {
        (queue.clear().await?, "")
    };

    output::success(&format!("Removed {removed} {what}operation(s)"));
    Ok(())
}

async fn remove(args: QueueRemoveArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let queue = ctx.open_queue(&config.queue).await?;

    match queue.remove(&args.id).await? {
        Some(op) => {
            output::success(&format!(
                "Removed {} {} {}",
                op.id, op.target.method, op.target.endpoint
            ));
            Ok(())
        }
        None => Err(anyhow!("Operation {} not found", args.id)),
    }
}
