use chorely_core::db::LocalStore;
use chrono::Utc;
use serde::Serialize;

use crate::auth::load_stored_session;
use crate::commands::common::{format_relative_time, open_store, CliContext, DEMO_OWNER_ID};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub signed_in_as: Option<String>,
    pub pending_changes: usize,
    pub oldest_pending_at: Option<i64>,
    pub last_conflict_at: Option<i64>,
}

pub async fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(context).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    println!("Profile:         {}", report.profile);
    match &report.signed_in_as {
        Some(identity) => println!("Signed in as:    {identity}"),
        None => println!("Signed in as:    (not signed in)"),
    }
    match report.oldest_pending_at {
        Some(oldest) => println!(
            "Pending changes: {} (oldest {})",
            report.pending_changes,
            format_relative_time(oldest, now_ms)
        ),
        None => println!("Pending changes: 0"),
    }
    if let Some(resolved_at) = report.last_conflict_at {
        println!(
            "Last conflict:   {}",
            format_relative_time(resolved_at, now_ms)
        );
    }
    Ok(())
}

async fn collect_status(context: &CliContext) -> Result<StatusReport, CliError> {
    let store = open_store(&context.db_path)?;
    let pending = store.drain_queue().await?;
    let last_conflict_at = store
        .list_conflicts(1)
        .await?
        .first()
        .map(|conflict| conflict.resolved_at);

    let (profile, signed_in_as) = if context.demo_remote {
        ("demo".to_string(), Some(DEMO_OWNER_ID.to_string()))
    } else {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(context.profile());
        let session = load_stored_session(&profile_name)?;
        let identity = session.map(|session| {
            session
                .user
                .email
                .clone()
                .unwrap_or_else(|| session.owner_id().to_string())
        });
        (profile_name, identity)
    };

    Ok(StatusReport {
        profile,
        signed_in_as,
        pending_changes: pending.len(),
        oldest_pending_at: pending.iter().map(|entry| entry.created_at).min(),
        last_conflict_at,
    })
}
