//! Outbox drain against the remote store

use crate::db::LocalStore;
use crate::mapper::{self, conflict_key};
use crate::models::{sort_for_push, EntityKind, OutboxAction, OutboxEntry, Record};
use crate::remote::{RemoteError, RemoteStore};

use super::{SyncError, SyncResult};

/// How far up the parent chain a missing-parent retry walks
const MAX_PARENT_DEPTH: usize = 3;

/// Drain the outbox in priority order and return how many entries were applied.
///
/// Stops at the first failure: that entry and everything after it stay
/// queued, everything before it has already been removed.
pub async fn push(
    store: &dyn LocalStore,
    remote: &dyn RemoteStore,
    owner_id: &str,
) -> SyncResult<usize> {
    let mut entries = store.drain_queue().await?;
    if entries.is_empty() {
        return Ok(0);
    }
    sort_for_push(&mut entries);

    let total = entries.len();
    let mut pushed = 0;
    for entry in &entries {
        if let Err(error) = push_entry(store, remote, owner_id, entry).await {
            tracing::warn!(
                sequence = entry.sequence,
                kind = %entry.entity_kind,
                record_id = %entry.record_id,
                pushed,
                remaining = total - pushed,
                %error,
                "Push halted"
            );
            return Err(error);
        }
        store.remove_queue_entry(entry.sequence).await?;
        pushed += 1;
        tracing::debug!(
            sequence = entry.sequence,
            kind = %entry.entity_kind,
            action = %entry.action,
            record_id = %entry.record_id,
            "Pushed outbox entry"
        );
    }

    Ok(pushed)
}

async fn push_entry(
    store: &dyn LocalStore,
    remote: &dyn RemoteStore,
    owner_id: &str,
    entry: &OutboxEntry,
) -> SyncResult<()> {
    let kind = entry.entity_kind;
    let push_error = |source| SyncError::Push {
        kind,
        record_id: entry.record_id.clone(),
        source,
    };

    match entry.action {
        OutboxAction::Delete => remote
            .soft_delete(kind, &entry.record_id, owner_id)
            .await
            .map_err(push_error),
        OutboxAction::Upsert => {
            let record = decode_entry(entry)?;
            match upsert(remote, &record, owner_id).await {
                Err(RemoteError::ForeignKey(reason)) => {
                    tracing::info!(
                        kind = %kind,
                        record_id = %entry.record_id,
                        %reason,
                        "Parent missing remotely, re-pushing parent chain"
                    );
                    push_parents(store, remote, owner_id, &record).await?;
                    upsert(remote, &record, owner_id).await.map_err(push_error)
                }
                other => other.map_err(push_error),
            }
        }
    }
}

fn decode_entry(entry: &OutboxEntry) -> SyncResult<Record> {
    let corrupt = |reason: String| SyncError::CorruptEntry {
        sequence: entry.sequence,
        reason,
    };
    let payload = entry
        .payload
        .clone()
        .ok_or_else(|| corrupt("upsert entry has no payload".to_string()))?;
    Record::from_payload(entry.entity_kind, payload).map_err(|error| corrupt(error.to_string()))
}

async fn upsert(
    remote: &dyn RemoteStore,
    record: &Record,
    owner_id: &str,
) -> Result<(), RemoteError> {
    let kind = record.kind();
    let row = mapper::to_remote(record, owner_id)
        .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
    remote.upsert(kind, row, conflict_key(kind)).await
}

/// Upsert the locally stored ancestors of `record`, root first
async fn push_parents(
    store: &dyn LocalStore,
    remote: &dyn RemoteStore,
    owner_id: &str,
    record: &Record,
) -> SyncResult<()> {
    let mut chain: Vec<Record> = Vec::new();
    let mut next: Option<(EntityKind, String)> = record
        .parent()
        .map(|(kind, id)| (kind, id.to_string()));

    while let Some((kind, id)) = next.take() {
        if chain.len() >= MAX_PARENT_DEPTH {
            break;
        }
        let Some(parent) = store.get_by_id(kind, &id).await? else {
            tracing::debug!(kind = %kind, record_id = %id, "Parent not stored locally");
            break;
        };
        next = parent.parent().map(|(kind, id)| (kind, id.to_string()));
        chain.push(parent);
    }

    for parent in chain.iter().rev() {
        upsert(remote, parent, owner_id)
            .await
            .map_err(|source| SyncError::Push {
                kind: parent.kind(),
                record_id: parent.id().to_string(),
                source,
            })?;
    }
    Ok(())
}
