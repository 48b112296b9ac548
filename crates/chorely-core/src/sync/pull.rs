//! Remote-to-local reconciliation for one entity kind

use crate::db::LocalStore;
use crate::mapper::{self, RemoteRow};
use crate::models::{EntityKind, Record, SyncConflict};
use crate::remote::RemoteStore;
use crate::util::now_millis;

use super::{SyncError, SyncResult};

/// What one table pull did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Rows written or deleted locally
    pub applied: usize,
    /// Remote rows older than the local record
    pub conflicts: usize,
    /// One message per rejected row
    pub rejected: Vec<String>,
}

/// Pull every row of `kind` owned by `owner_id` and reconcile it locally.
///
/// Tombstones always delete. Other rows overwrite the local record when
/// `remote_updated_at >= local_updated_at`. Invalid rows are skipped and
/// reported, never partially applied.
pub async fn pull_table(
    store: &dyn LocalStore,
    remote: &dyn RemoteStore,
    owner_id: &str,
    kind: EntityKind,
) -> SyncResult<PullReport> {
    let pull_error = |source| SyncError::Pull {
        table: kind.table_name(),
        source,
    };
    let rows = if kind.is_singleton() {
        remote
            .select_one_owned_by(kind, owner_id)
            .await
            .map_err(pull_error)?
            .into_iter()
            .collect()
    } else {
        remote
            .select_all_owned_by(kind, owner_id)
            .await
            .map_err(pull_error)?
    };

    let mut report = PullReport::default();
    for row in &rows {
        apply_row(store, kind, row, &mut report).await?;
    }

    tracing::debug!(
        table = kind.table_name(),
        fetched = rows.len(),
        applied = report.applied,
        conflicts = report.conflicts,
        rejected = report.rejected.len(),
        "Pulled table"
    );
    Ok(report)
}

async fn apply_row(
    store: &dyn LocalStore,
    kind: EntityKind,
    row: &RemoteRow,
    report: &mut PullReport,
) -> SyncResult<()> {
    let table = kind.table_name();

    if row.is_tombstone() {
        let Some(id) = row.id() else {
            reject(report, table, "tombstone without id");
            return Ok(());
        };
        store.apply_remote_delete(kind, id).await?;
        report.applied += 1;
        return Ok(());
    }

    if let Err(field) = mapper::validate(kind, row) {
        reject(report, table, &format!("missing {field}"));
        return Ok(());
    }

    let local = local_counterpart(store, kind, row).await?;
    let local_updated_at = local.as_ref().map_or(0, Record::updated_at);
    let remote_updated_at = row.remote_timestamp();

    if remote_updated_at < local_updated_at {
        let record_id = row.id().unwrap_or_default().to_string();
        let logged = store
            .record_conflict(&SyncConflict {
                id: 0,
                entity_kind: kind,
                record_id: record_id.clone(),
                local_updated_at,
                incoming_updated_at: remote_updated_at,
                resolved_at: now_millis(),
                strategy: "lww".to_string(),
            })
            .await?;
        if logged {
            tracing::debug!(
                table,
                record_id = %record_id,
                local_updated_at,
                remote_updated_at,
                "Local version is newer, keeping it"
            );
        }
        report.conflicts += 1;
        return Ok(());
    }

    let record = match mapper::to_local(kind, row) {
        Ok(record) => record,
        Err(error) => {
            reject(report, table, &error.to_string());
            return Ok(());
        }
    };

    // A singleton replaced under a new id must not leave the old row behind
    if let Some(local) = local.filter(|local| local.id() != record.id()) {
        store.apply_remote_delete(kind, local.id()).await?;
    }
    store.apply_remote(&record).await?;
    report.applied += 1;
    Ok(())
}

/// The local record a remote row competes with
async fn local_counterpart(
    store: &dyn LocalStore,
    kind: EntityKind,
    row: &RemoteRow,
) -> SyncResult<Option<Record>> {
    if kind.is_singleton() {
        return Ok(store.get_all(kind).await?.into_iter().next());
    }
    let id = row.id().unwrap_or_default();
    Ok(store.get_by_id(kind, id).await?)
}

fn reject(report: &mut PullReport, table: &str, reason: &str) {
    let message = format!("{table} rejected a remote payload: {reason}");
    tracing::warn!(table, %reason, "Skipping invalid remote row");
    report.rejected.push(message);
}
