//! Local durable store: entity tables plus the ordered outbox

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{EntityKind, OutboxAction, OutboxEntry, Record, SyncConflict};
use crate::util::now_millis;

/// Storage contract the sync engine and record services write through.
///
/// `write` and `delete` commit the record mutation and its outbox entry as
/// one unit. `apply_remote*` are the pull-side writes and never enqueue.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Upsert a record and enqueue an `upsert` entry. Returns the entry's sequence.
    async fn write(&self, record: &Record) -> Result<i64>;

    /// Remove a record and enqueue a `delete` entry. Returns the entry's sequence.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<i64>;

    /// All pending outbox entries in sequence order
    async fn drain_queue(&self) -> Result<Vec<OutboxEntry>>;

    /// Remove one acknowledged entry
    async fn remove_queue_entry(&self, sequence: i64) -> Result<()>;

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>>;

    /// All records of a kind, most recently updated first
    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>>;

    /// Store a record received from the remote without enqueueing it
    async fn apply_remote(&self, record: &Record) -> Result<()>;

    /// Delete a record because of a remote tombstone. Returns whether a row existed.
    async fn apply_remote_delete(&self, kind: EntityKind, id: &str) -> Result<bool>;

    async fn pending_count(&self) -> Result<usize>;

    /// Log a kept-local resolution. Returns `false` when this incoming
    /// version of the record was already logged.
    async fn record_conflict(&self, conflict: &SyncConflict) -> Result<bool>;

    /// Recently resolved conflicts, newest first
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of [`LocalStore`]
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    /// Open a store at the given filesystem path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn upsert_record(conn: &Connection, record: &Record) -> Result<()> {
        let table = record.kind().table_name();
        let payload = serde_json::to_string(&record.to_payload()?)?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at"
            ),
            params![record.id(), payload, record.updated_at()],
        )?;
        Ok(())
    }

    fn enqueue(
        conn: &Connection,
        kind: EntityKind,
        action: OutboxAction,
        record_id: &str,
        payload: Option<String>,
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO outbox (entity_kind, action, record_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                action.as_str(),
                record_id,
                payload,
                now_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn parse_entry(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, Option<String>, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn entry_from_columns(
        (sequence, kind, action, record_id, payload, created_at): (
            i64,
            String,
            String,
            String,
            Option<String>,
            i64,
        ),
    ) -> Result<OutboxEntry> {
        let entity_kind = kind.parse::<EntityKind>().map_err(Error::Database)?;
        let action = action.parse::<OutboxAction>().map_err(Error::Database)?;
        let payload = payload
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;
        Ok(OutboxEntry {
            sequence,
            entity_kind,
            action,
            record_id,
            payload,
            created_at,
        })
    }

    fn decode_record(kind: EntityKind, raw: &str) -> Result<Record> {
        Record::from_payload(kind, serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn write(&self, record: &Record) -> Result<i64> {
        let payload = serde_json::to_string(&record.to_payload()?)?;
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        Self::upsert_record(&tx, record)?;
        let sequence = Self::enqueue(
            &tx,
            record.kind(),
            OutboxAction::Upsert,
            record.id(),
            Some(payload),
        )?;
        tx.commit()?;

        tracing::debug!(kind = %record.kind(), record_id = record.id(), sequence, "Queued upsert");
        Ok(sequence)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<i64> {
        let table = kind.table_name();
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        // The remote copy may exist even when nothing is stored locally
        let sequence = Self::enqueue(&tx, kind, OutboxAction::Delete, id, None)?;
        tx.commit()?;

        tracing::debug!(kind = %kind, record_id = id, sequence, "Queued delete");
        Ok(sequence)
    }

    async fn drain_queue(&self) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(
            "SELECT sequence, entity_kind, action, record_id, payload, created_at
             FROM outbox
             ORDER BY sequence ASC",
        )?;

        let rows = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::entry_from_columns).collect()
    }

    async fn remove_queue_entry(&self, sequence: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM outbox WHERE sequence = ?1", params![sequence])?;
        Ok(())
    }

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let table = kind.table_name();
        let db = self.db.lock().await;
        let raw: Option<String> = db
            .connection()
            .query_row(
                &format!("SELECT payload FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| Self::decode_record(kind, &raw)).transpose()
    }

    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let table = kind.table_name();
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(&format!(
            "SELECT payload FROM {table} ORDER BY updated_at DESC, id ASC"
        ))?;

        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        payloads
            .iter()
            .map(|raw| Self::decode_record(kind, raw))
            .collect()
    }

    async fn apply_remote(&self, record: &Record) -> Result<()> {
        let db = self.db.lock().await;
        Self::upsert_record(db.connection(), record)
    }

    async fn apply_remote_delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let table = kind.table_name();
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(rows > 0)
    }

    async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }

    async fn record_conflict(&self, conflict: &SyncConflict) -> Result<bool> {
        let db = self.db.lock().await;
        let inserted = db.connection().execute(
            "INSERT OR IGNORE INTO sync_conflicts (
                entity_kind, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.entity_kind.as_str(),
                conflict.record_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at,
                conflict.resolved_at,
                conflict.strategy
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(
            "SELECT id, entity_kind, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, kind, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy)| {
                    Ok(SyncConflict {
                        id,
                        entity_kind: kind.parse().map_err(Error::Database)?,
                        record_id,
                        local_updated_at,
                        incoming_updated_at,
                        resolved_at,
                        strategy,
                    })
                },
            )
            .collect()
    }
}
