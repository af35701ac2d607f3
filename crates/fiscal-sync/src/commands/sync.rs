//! Sync command
//!
//! Probes the API, then runs passes until nothing eligible is left.

use anyhow::{anyhow, Context as _, Result};
use fiscal_http::{HttpProbeMonitor, HttpProcessor, ReqwestTransport};
use fiscal_offline::{ProcessorRegistry, SyncCoordinator, SyncEvent};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::SyncArgs;
use crate::output;
use crate::utils::{short_id, Context};

#[derive(Debug, Default, Serialize)]
struct SyncSummary {
    passes: usize,
    completed: usize,
    failed: usize,
    conflicts: usize,
    retried: usize,
    pending: usize,
}

pub async fn run(args: SyncArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.load_config()?;
    if let Some(base_url) = args.base_url {
        config.http.base_url = base_url;
    }

    let transport =
        Arc::new(ReqwestTransport::new(&config.http).context("Failed to create HTTP client")?);
    let monitor = HttpProbeMonitor::new(transport.clone(), args.health_path);
    if !monitor.check().await {
        return Err(anyhow!("API at {} is unreachable", config.http.base_url));
    }
    tracing::debug!(base_url = %config.http.base_url, "api reachable");

    let queue = Arc::new(ctx.open_queue(&config.queue).await?);
    let mut processors = ProcessorRegistry::new();
    processors.set_fallback(Arc::new(HttpProcessor::new(transport)));
    let coordinator = SyncCoordinator::builder(queue.clone(), monitor)
        .with_config(&config)
        .with_processors(processors)
        .build();
    let mut events = coordinator.subscribe();

    let spinner = output::spinner(&format!("Syncing with {}...", config.http.base_url));
    let mut summary = SyncSummary::default();
    while summary.passes < args.max_passes {
        let Some(batch) = coordinator.sync_now().await? else {
            break;
        };
        if batch.total() == 0 {
            break;
        }
        summary.passes += 1;
        summary.completed += batch.completed;
        summary.failed += batch.failed;
        summary.conflicts += batch.conflicts;
        summary.retried += batch.retried;
        spinner.set_message(format!(
            "Syncing with {}... {} done",
            config.http.base_url, summary.completed
        ));
    }
    spinner.finish_and_clear();
    summary.pending = queue.get_stats().await.pending;
    coordinator.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::OperationFailed {
                operation_id,
                error,
                ..
            } => output::warning(&format!("{} failed: {}", short_id(&operation_id), error)),
            SyncEvent::OperationConflict {
                operation_id,
                strategy,
                ..
            } => output::info(&format!(
                "{} conflicted, resolved with {}",
                short_id(&operation_id),
                strategy
            )),
            _ => {}
        }
    }

    output::success(&format!(
        "Sync finished after {} pass(es)",
        summary.passes
    ));
    output::kv("Completed", &summary.completed.to_string());
    output::kv("Failed", &summary.failed.to_string());
    output::kv("Conflicts", &summary.conflicts.to_string());
    output::kv("Rescheduled", &summary.retried.to_string());
    output::kv("Still pending", &summary.pending.to_string());
    Ok(())
}
