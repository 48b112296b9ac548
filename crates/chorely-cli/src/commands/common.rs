use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorely_core::config::SyncConfig;
use chorely_core::db::{LocalStore, SqliteStore};
use chorely_core::models::SyncConflict;
use chorely_core::remote::{MemoryRemote, PostgrestRemote, SessionProvider, StaticSession};
use chorely_core::services::RecordService;
use chorely_core::{EntityKind, OutboxEntry, Record, SyncEngine};
use serde::Serialize;

use crate::auth::{auth_client_for_profile, restore_provider};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Owner id used by `--demo-remote`
pub const DEMO_OWNER_ID: &str = "demo-owner";

const SHORT_ID_LEN: usize = 13;

/// Connection flags shared by every command
pub struct CliContext {
    pub db_path: PathBuf,
    pub profile: Option<String>,
    pub demo_remote: bool,
}

impl CliContext {
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}

#[derive(Debug, Serialize)]
pub struct OutboxItem {
    pub sequence: i64,
    pub kind: String,
    pub action: String,
    pub record_id: String,
    pub created_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub kind: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("CHORELY_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("chorely").join("chorely.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn open_store(path: &Path) -> Result<Arc<SqliteStore>, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(SqliteStore::open(path)?))
}

pub fn open_service(path: &Path) -> Result<RecordService, CliError> {
    Ok(RecordService::new(open_store(path)?))
}

/// Build an engine over the local store and the profile's remote.
///
/// `--demo-remote` swaps in an in-process remote with a fixed signed-in owner.
pub async fn open_sync_engine(
    context: &CliContext,
    config: SyncConfig,
) -> Result<SyncEngine, CliError> {
    let store = open_store(&context.db_path)?;

    if context.demo_remote {
        let remote = MemoryRemote::new();
        return Ok(SyncEngine::builder(
            store,
            Arc::new(remote.clone()),
            Arc::new(StaticSession::signed_in(DEMO_OWNER_ID)),
        )
        .change_feed(Arc::new(remote))
        .config(config)
        .build());
    }

    let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = profiles.resolve_profile_name(context.profile());
    let profile = profiles
        .profile(&profile_name)
        .ok_or(CliError::SyncNotConfigured)?;
    let remote_config = profile
        .remote_config()
        .map_err(CliError::Config)?
        .ok_or(CliError::SyncNotConfigured)?;
    let client =
        auth_client_for_profile(&profile_name, profile)?.ok_or(CliError::SyncNotConfigured)?;
    let provider = Arc::new(restore_provider(client).await?);
    if provider.current_identity().is_none() {
        return Err(CliError::Config(format!(
            "Profile '{profile_name}' is not signed in. Run `chorely auth login --profile {profile_name}` first."
        )));
    }

    let remote = PostgrestRemote::new(&remote_config, provider.clone())?;
    // PostgREST offers no change feed; polling covers remote changes
    Ok(SyncEngine::builder(store, Arc::new(remote), provider)
        .config(config)
        .build())
}

pub async fn list_outbox(store: &dyn LocalStore) -> Result<Vec<OutboxEntry>, CliError> {
    Ok(store.drain_queue().await?)
}

pub async fn list_sync_conflicts(
    limit: usize,
    db_path: &Path,
) -> Result<Vec<SyncConflict>, CliError> {
    let store = open_store(db_path)?;
    Ok(store.list_conflicts(limit).await?)
}

/// Find a record by full id or by a unique id prefix
pub async fn resolve_record(
    service: &RecordService,
    kind: EntityKind,
    query: &str,
) -> Result<Record, CliError> {
    let query = normalize_record_identifier(query)?;
    if let Some(record) = service.get(kind, &query).await? {
        return Ok(record);
    }

    let mut matches = service
        .list(kind)
        .await?
        .into_iter()
        .filter(|record| record.id().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::RecordNotFound {
            kind: kind.as_str(),
            id: query,
        }),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|record| short_id(record.id()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Join CLI words into a title, collapsing whitespace
pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let title = parts
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(title)
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn outbox_to_item(entry: &OutboxEntry, now_ms: i64) -> OutboxItem {
    OutboxItem {
        sequence: entry.sequence,
        kind: entry.entity_kind.to_string(),
        action: entry.action.as_str().to_string(),
        record_id: entry.record_id.clone(),
        created_at: entry.created_at,
        relative_time: format_relative_time(entry.created_at, now_ms),
    }
}

pub fn format_outbox_lines(entries: &[OutboxEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "#{:<6} {:<7} {:<17} {}  {}",
                entry.sequence,
                entry.action.as_str(),
                entry.entity_kind.as_str(),
                short_id(&entry.record_id),
                format_relative_time(entry.created_at, now_ms)
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        kind: conflict.entity_kind.to_string(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entity_kind,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
