//! Record CRUD on top of the local store.
//!
//! Every write lands in the store together with its outbox entry, then asks
//! the attached engine (if any) for a background sync.

use std::sync::Arc;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{Completion, EntityKind, Record, Redemption};
use crate::sync::SyncEngine;
use crate::util::now_millis;

/// Business rules applied when a new record is created.
///
/// Plan limits and similar gating live here, never in the sync engine.
pub trait RecordPolicy: Send + Sync {
    /// `existing` is the number of stored records of the same kind
    fn check(&self, record: &Record, existing: usize) -> Result<()>;
}

/// Default policy
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RecordPolicy for AllowAll {
    fn check(&self, _record: &Record, _existing: usize) -> Result<()> {
        Ok(())
    }
}

/// Caps how many records of one kind may exist
#[derive(Debug, Clone, Copy)]
pub struct KindLimit {
    pub kind: EntityKind,
    pub max: usize,
}

impl RecordPolicy for KindLimit {
    fn check(&self, record: &Record, existing: usize) -> Result<()> {
        if record.kind() == self.kind && existing >= self.max {
            return Err(Error::PolicyDenied(format!(
                "at most {} {} records are allowed",
                self.max,
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordService {
    store: Arc<dyn LocalStore>,
    engine: Option<SyncEngine>,
    policy: Arc<dyn RecordPolicy>,
}

impl RecordService {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            engine: None,
            policy: Arc::new(AllowAll),
        }
    }

    /// Request a background sync after every write
    #[must_use]
    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn RecordPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Create or update a record. Stamps `updated_at` with the current time.
    pub async fn save(&self, record: impl Into<Record> + Send) -> Result<Record> {
        let mut record = record.into();
        let kind = record.kind();
        if record.id().trim().is_empty() {
            return Err(Error::InvalidInput(format!("{kind} record id is empty")));
        }

        if self.store.get_by_id(kind, record.id()).await?.is_none() {
            let existing = self.store.get_all(kind).await?.len();
            self.policy.check(&record, existing)?;
        }

        record.touch(now_millis());
        self.store.write(&record).await?;
        tracing::debug!(kind = %kind, record_id = record.id(), "Saved record");

        self.notify_engine();
        Ok(record)
    }

    pub async fn remove(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.store.delete(kind, id).await?;
        tracing::debug!(kind = %kind, record_id = id, "Removed record");
        self.notify_engine();
        Ok(())
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.store.get_by_id(kind, id).await
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Record>> {
        self.store.get_all(kind).await
    }

    /// Record a completion of the task with `task_id`
    pub async fn complete_task(&self, task_id: &str) -> Result<Completion> {
        let Some(Record::Task(task)) = self.get(EntityKind::Task, task_id).await? else {
            return Err(Error::NotFound(format!("task {task_id}")));
        };
        match self.save(Completion::of(&task)).await? {
            Record::Completion(completion) => Ok(completion),
            other => Err(Error::Database(format!(
                "expected a completion, stored {}",
                other.kind()
            ))),
        }
    }

    /// Redeem the reward with `reward_id` for an optional profile
    pub async fn redeem(&self, reward_id: &str, profile_id: Option<String>) -> Result<Redemption> {
        let Some(Record::Reward(reward)) = self.get(EntityKind::Reward, reward_id).await? else {
            return Err(Error::NotFound(format!("reward {reward_id}")));
        };
        match self.save(Redemption::of(&reward, profile_id)).await? {
            Record::Redemption(redemption) => Ok(redemption),
            other => Err(Error::Database(format!(
                "expected a redemption, stored {}",
                other.kind()
            ))),
        }
    }

    fn notify_engine(&self) {
        if let Some(engine) = &self.engine {
            engine.request_sync_detached();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{OutboxAction, Reward, Task};
    use pretty_assertions::assert_eq;

    fn service() -> (RecordService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        (RecordService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn save_stamps_and_enqueues() {
        let (service, store) = service();
        let mut task = Task::new("Dust shelves", 2);
        task.updated_at = 1;

        let saved = service.save(task).await.unwrap();
        assert!(saved.updated_at() > 1);

        let queue = store.drain_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action, OutboxAction::Upsert);
        assert_eq!(queue[0].payload, Some(saved.to_payload().unwrap()));
    }

    #[tokio::test]
    async fn remove_enqueues_delete() {
        let (service, store) = service();
        let saved = service.save(Reward::new("Ice cream", 20)).await.unwrap();

        service.remove(EntityKind::Reward, saved.id()).await.unwrap();

        assert!(service
            .get(EntityKind::Reward, saved.id())
            .await
            .unwrap()
            .is_none());
        let actions: Vec<OutboxAction> = store
            .drain_queue()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![OutboxAction::Upsert, OutboxAction::Delete]);
    }

    #[tokio::test]
    async fn policy_limits_new_records_only() {
        let (service, _) = service();
        let service = service.with_policy(Arc::new(KindLimit {
            kind: EntityKind::Reward,
            max: 1,
        }));

        let first = service.save(Reward::new("Movie", 10)).await.unwrap();
        let error = service.save(Reward::new("Park", 5)).await.unwrap_err();
        assert!(matches!(error, Error::PolicyDenied(_)));

        // Updating an existing record is not a new record
        service.save(first).await.unwrap();
        // Other kinds are unaffected
        service.save(Task::new("Walk dog", 3)).await.unwrap();
    }

    #[tokio::test]
    async fn complete_task_copies_points() {
        let (service, _) = service();
        let Record::Task(task) = service.save(Task::new("Vacuum", 7)).await.unwrap() else {
            panic!("expected task");
        };

        let completion = service.complete_task(&task.id).await.unwrap();
        assert_eq!(completion.task_id, task.id);
        assert_eq!(completion.points, 7);

        let error = service.complete_task("missing").await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn redeem_freezes_cost() {
        let (service, _) = service();
        let Record::Reward(reward) = service.save(Reward::new("Game night", 30)).await.unwrap()
        else {
            panic!("expected reward");
        };

        let redemption = service
            .redeem(&reward.id, Some("profile-1".to_string()))
            .await
            .unwrap();
        assert_eq!(redemption.cost, 30);
        assert_eq!(redemption.profile_id.as_deref(), Some("profile-1"));
    }
}
