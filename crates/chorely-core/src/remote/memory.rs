//! In-process remote store and session, for tests and offline demos

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    ChangeFeed, ChangeNotice, RemoteError, RemoteResult, RemoteStore, SessionProvider,
};
use crate::mapper::RemoteRow;
use crate::models::EntityKind;

const FEED_CAPACITY: usize = 64;

/// Foreign keys enforced when enabled: (child kind, column, parent kind)
const FOREIGN_KEYS: &[(EntityKind, &str, EntityKind)] = &[
    (EntityKind::Task, "profile_id", EntityKind::Profile),
    (EntityKind::Completion, "task_id", EntityKind::Task),
    (EntityKind::Redemption, "reward_id", EntityKind::Reward),
];

#[derive(Default)]
struct MemoryState {
    /// Rows per kind, keyed by id
    tables: HashMap<EntityKind, BTreeMap<String, RemoteRow>>,
    enforce_foreign_keys: bool,
    unavailable: bool,
    failing_records: HashSet<String>,
    failing_selects: HashSet<EntityKind>,
    upserts: usize,
    soft_deletes: usize,
    selects: usize,
    subscribers: Vec<(EntityKind, String, mpsc::Sender<ChangeNotice>)>,
}

impl MemoryState {
    fn check_available(&self) -> RemoteResult<()> {
        if self.unavailable {
            Err(RemoteError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn check_record(&self, id: &str) -> RemoteResult<()> {
        if self.failing_records.contains(id) {
            return Err(RemoteError::Api {
                status: 500,
                message: format!("injected failure for {id}"),
            });
        }
        Ok(())
    }

    fn check_foreign_keys(&self, kind: EntityKind, row: &RemoteRow) -> RemoteResult<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        for &(child, column, parent) in FOREIGN_KEYS {
            if child != kind {
                continue;
            }
            let Some(parent_id) = row.get(column).and_then(Value::as_str) else {
                continue;
            };
            let exists = self
                .tables
                .get(&parent)
                .is_some_and(|rows| rows.contains_key(parent_id));
            if !exists {
                return Err(RemoteError::ForeignKey(format!(
                    "{}.{column} references missing {} {parent_id}",
                    kind.table_name(),
                    parent.table_name()
                )));
            }
        }
        Ok(())
    }

    fn notify(&mut self, kind: EntityKind, owner_id: &str, record_id: &str) {
        self.subscribers.retain(|(subscribed_kind, owner, sender)| {
            if *subscribed_kind != kind || owner != owner_id {
                return !sender.is_closed();
            }
            let notice = ChangeNotice {
                kind,
                record_id: Some(record_id.to_string()),
            };
            match sender.try_send(notice) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Remote store kept in memory.
///
/// Mimics the PostgREST backend closely enough for sync tests: rows are
/// scoped by owner, upserts merge on the conflict key, deletes set a
/// tombstone, and foreign keys can be enforced. Failures can be scripted.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject child rows whose parent is missing
    #[must_use]
    pub fn with_foreign_keys(self) -> Self {
        self.lock().enforce_foreign_keys = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail every write to `record_id` until cleared
    pub fn fail_record(&self, record_id: impl Into<String>) {
        self.lock().failing_records.insert(record_id.into());
    }

    pub fn fail_selects(&self, kind: EntityKind) {
        self.lock().failing_selects.insert(kind);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_records.clear();
        state.failing_selects.clear();
        state.unavailable = false;
    }

    pub fn upsert_calls(&self) -> usize {
        self.lock().upserts
    }

    pub fn soft_delete_calls(&self) -> usize {
        self.lock().soft_deletes
    }

    pub fn select_calls(&self) -> usize {
        self.lock().selects
    }

    /// All rows of a kind, tombstones included, ordered by id
    pub fn rows(&self, kind: EntityKind) -> Vec<RemoteRow> {
        self.lock()
            .tables
            .get(&kind)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, kind: EntityKind, id: &str) -> Option<RemoteRow> {
        self.lock()
            .tables
            .get(&kind)
            .and_then(|rows| rows.get(id).cloned())
    }

    /// Write a row directly, as another device would. Notifies subscribers.
    pub fn insert_row(&self, kind: EntityKind, row: RemoteRow) {
        let (Some(id), Some(owner)) = (
            row.id().map(ToString::to_string),
            row.owner_id().map(ToString::to_string),
        ) else {
            tracing::warn!(kind = %kind, "Ignoring remote row without id or owner");
            return;
        };
        let mut state = self.lock();
        state.tables.entry(kind).or_default().insert(id.clone(), row);
        state.notify(kind, &owner, &id);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        conflict_key: &str,
    ) -> RemoteResult<()> {
        let mut state = self.lock();
        state.upserts += 1;
        state.check_available()?;

        let (Some(id), Some(owner)) = (
            row.id().map(ToString::to_string),
            row.owner_id().map(ToString::to_string),
        ) else {
            return Err(RemoteError::Api {
                status: 400,
                message: "row requires id and owner_id".to_string(),
            });
        };
        state.check_record(&id)?;
        state.check_foreign_keys(kind, &row)?;

        let key_value = row.get(conflict_key).cloned().ok_or_else(|| RemoteError::Api {
            status: 400,
            message: format!("row has no {conflict_key} column"),
        })?;

        let table = state.tables.entry(kind).or_default();
        let existing_id = table
            .iter()
            .find(|(_, stored)| stored.get(conflict_key) == Some(&key_value))
            .map(|(stored_id, stored)| (stored_id.clone(), stored.owner_id() == Some(owner.as_str())));

        let merged = match existing_id {
            Some((_, false)) => {
                return Err(RemoteError::Unauthorized(format!(
                    "{} row belongs to another owner",
                    kind.table_name()
                )));
            }
            Some((stored_id, true)) => {
                let mut merged = table.remove(&stored_id).unwrap_or_default();
                for (field, value) in row.fields() {
                    merged.set(field.clone(), value.clone());
                }
                merged
            }
            None => row,
        };
        table.insert(id.clone(), merged);
        state.notify(kind, &owner, &id);
        Ok(())
    }

    async fn soft_delete(&self, kind: EntityKind, id: &str, owner_id: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        state.soft_deletes += 1;
        state.check_available()?;
        state.check_record(id)?;

        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        let updated = state
            .tables
            .get_mut(&kind)
            .and_then(|rows| rows.get_mut(id))
            .filter(|row| row.owner_id() == Some(owner_id))
            .map(|row| {
                row.set("deleted_at", now.clone());
                row.set("updated_at", now);
            })
            .is_some();

        // Zero matched rows is still a success, like a filtered PATCH
        if updated {
            state.notify(kind, owner_id, id);
        }
        Ok(())
    }

    async fn select_all_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        let mut state = self.lock();
        state.selects += 1;
        state.check_available()?;
        if state.failing_selects.contains(&kind) {
            return Err(RemoteError::Api {
                status: 500,
                message: format!("injected select failure for {}", kind.table_name()),
            });
        }

        Ok(state
            .tables
            .get(&kind)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.owner_id() == Some(owner_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn select_one_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Option<RemoteRow>> {
        Ok(self
            .select_all_owned_by(kind, owner_id)
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl ChangeFeed for MemoryRemote {
    async fn subscribe(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<mpsc::Receiver<ChangeNotice>> {
        let (sender, receiver) = mpsc::channel(FEED_CAPACITY);
        self.lock()
            .subscribers
            .push((kind, owner_id.to_string(), sender));
        Ok(receiver)
    }
}

/// Session with host-controlled identity and connectivity
#[derive(Debug)]
pub struct StaticSession {
    identity: Mutex<Option<String>>,
    online: AtomicBool,
    valid: AtomicBool,
    validity_checks: AtomicUsize,
}

impl StaticSession {
    /// Online, valid session for `owner_id`
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self {
            identity: Mutex::new(Some(owner_id.into())),
            online: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            validity_checks: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: Mutex::new(None),
            online: AtomicBool::new(true),
            valid: AtomicBool::new(false),
            validity_checks: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_identity(&self, owner_id: Option<String>) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = owner_id;
    }

    /// How many times the gate asked whether the session is valid
    pub fn validity_checks(&self) -> usize {
        self.validity_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    fn current_identity(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn session_valid(&self) -> bool {
        self.validity_checks.fetch_add(1, Ordering::SeqCst);
        self.valid.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RemoteRow {
        RemoteRow::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_key() {
        let remote = MemoryRemote::new();
        remote
            .upsert(
                EntityKind::Task,
                row(json!({ "id": "t1", "owner_id": "o", "title": "A", "points": 1 })),
                "id",
            )
            .await
            .unwrap();
        remote
            .upsert(
                EntityKind::Task,
                row(json!({ "id": "t1", "owner_id": "o", "title": "B" })),
                "id",
            )
            .await
            .unwrap();

        let rows = remote.rows(EntityKind::Task);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title"), Some(&json!("B")));
        assert_eq!(rows[0].get("points"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn singleton_upsert_replaces_row_for_owner() {
        let remote = MemoryRemote::new();
        for id in ["a1", "a2"] {
            remote
                .upsert(
                    EntityKind::AccountSettings,
                    row(json!({ "id": id, "owner_id": "o", "timezone": "UTC" })),
                    "owner_id",
                )
                .await
                .unwrap();
        }

        let rows = remote.rows(EntityKind::AccountSettings);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), Some("a2"));
    }

    #[tokio::test]
    async fn soft_delete_requires_matching_owner() {
        let remote = MemoryRemote::new();
        remote.insert_row(
            EntityKind::Reward,
            row(json!({ "id": "r1", "owner_id": "o", "title": "Movie", "cost": 5 })),
        );

        remote
            .soft_delete(EntityKind::Reward, "r1", "someone-else")
            .await
            .unwrap();
        assert!(!remote.row(EntityKind::Reward, "r1").unwrap().is_tombstone());

        remote.soft_delete(EntityKind::Reward, "r1", "o").await.unwrap();
        assert!(remote.row(EntityKind::Reward, "r1").unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn foreign_keys_reject_orphans() {
        let remote = MemoryRemote::new().with_foreign_keys();
        let error = remote
            .upsert(
                EntityKind::Completion,
                row(json!({ "id": "c1", "owner_id": "o", "task_id": "missing" })),
                "id",
            )
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::ForeignKey(_)));
    }

    #[tokio::test]
    async fn selects_are_owner_scoped() {
        let remote = MemoryRemote::new();
        remote.insert_row(EntityKind::Profile, row(json!({ "id": "p1", "owner_id": "o" })));
        remote.insert_row(EntityKind::Profile, row(json!({ "id": "p2", "owner_id": "x" })));

        let rows = remote
            .select_all_owned_by(EntityKind::Profile, "o")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(remote.select_calls(), 1);
    }

    #[tokio::test]
    async fn change_feed_notifies_matching_subscribers() {
        let remote = MemoryRemote::new();
        let mut tasks = remote.subscribe(EntityKind::Task, "o").await.unwrap();
        let mut other = remote.subscribe(EntityKind::Task, "x").await.unwrap();

        remote.insert_row(
            EntityKind::Task,
            row(json!({ "id": "t1", "owner_id": "o", "title": "A" })),
        );

        let notice = tasks.recv().await.unwrap();
        assert_eq!(notice.record_id.as_deref(), Some("t1"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn unavailable_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);
        assert!(matches!(
            remote.select_all_owned_by(EntityKind::Task, "o").await,
            Err(RemoteError::Unavailable)
        ));
        remote.clear_failures();
        assert!(remote
            .select_all_owned_by(EntityKind::Task, "o")
            .await
            .is_ok());
    }
}
