use std::path::Path;

use chorely_core::config::SyncConfig;
use chorely_core::db::LocalStore;
use chorely_core::state::SyncState;
use chorely_core::{GateOutcome, SyncStatus};

use crate::commands::common::{
    format_sync_conflict_lines, list_sync_conflicts, open_sync_engine, sync_conflict_to_item,
    CliContext, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let config = SyncConfig::default().without_polling().without_realtime();
    let engine = open_sync_engine(context, config).await?;

    match engine.sync_now().await {
        GateOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
        outcome @ GateOutcome::Completed { .. } => {
            let pending = engine.store().pending_count().await?;
            match engine.status().last_error {
                Some(warning) => println!("Sync {outcome} with warnings: {warning}"),
                None => println!("Sync {outcome}"),
            }
            if pending > 0 {
                println!("{pending} change(s) still pending");
            }
            Ok(())
        }
        outcome => {
            println!("Sync {outcome}");
            Ok(())
        }
    }
}

pub async fn run_sync_watch(context: &CliContext) -> Result<(), CliError> {
    let engine = open_sync_engine(context, SyncConfig::default()).await?;
    let mut updates = engine.subscribe();
    engine.start().await;
    println!("Watching for changes. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                let pending = engine.store().pending_count().await?;
                println!("{}", format_status_line(&status, pending));
            }
        }
    }

    engine.stop();
    println!("Stopped watching.");
    Ok(())
}

pub fn format_status_line(status: &SyncStatus, pending: usize) -> String {
    let state = SyncState::derive(status, true, pending);
    let mut line = format!("[{}] {state}, {pending} pending", status.phase);
    if let Some(retry_ms) = status.pending_retry_ms {
        line.push_str(&format!(", retry in {}s", retry_ms.div_ceil(1_000)));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(", last error: {error}"));
    }
    line
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let conflicts = list_sync_conflicts(limit, db_path).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
