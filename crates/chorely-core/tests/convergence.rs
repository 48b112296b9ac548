//! End-to-end data convergence through the sync engine

use std::sync::Arc;

use chorely_core::config::SyncConfig;
use chorely_core::db::{LocalStore, SqliteStore};
use chorely_core::mapper::to_remote;
use chorely_core::models::{Completion, Profile, Reward, Task};
use chorely_core::remote::{MemoryRemote, StaticSession};
use chorely_core::services::RecordService;
use chorely_core::sync::{push, SkipReason};
use chorely_core::{EntityKind, GateOutcome, Record, SyncEngine};
use pretty_assertions::assert_eq;

const OWNER: &str = "household-1";

struct Device {
    store: Arc<SqliteStore>,
    session: Arc<StaticSession>,
    engine: SyncEngine,
    records: RecordService,
}

fn device(remote: &MemoryRemote) -> Device {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let session = Arc::new(StaticSession::signed_in(OWNER));
    let engine = SyncEngine::builder(store.clone(), Arc::new(remote.clone()), session.clone())
        .config(
            SyncConfig::default()
                .with_min_interval(std::time::Duration::ZERO)
                .without_polling()
                .without_realtime(),
        )
        .build();
    let records = RecordService::new(store.clone());
    Device {
        store,
        session,
        engine,
        records,
    }
}

async fn task_title(store: &SqliteStore, id: &str) -> Option<String> {
    match store.get_by_id(EntityKind::Task, id).await.unwrap() {
        Some(Record::Task(task)) => Some(task.title),
        _ => None,
    }
}

#[tokio::test]
async fn offline_mutations_reach_the_remote_exactly_once() {
    let remote = MemoryRemote::new().with_foreign_keys();
    let phone = device(&remote);
    phone.session.set_online(false);

    let profile = phone.records.save(Profile::new("Mia")).await.unwrap();
    let Record::Task(mut task) = phone
        .records
        .save(Task::new("Feed fish", 1).assigned_to(profile.id()))
        .await
        .unwrap()
    else {
        panic!("expected task");
    };
    task.title = "Feed fish (morning)".to_string();
    phone.records.save(task.clone()).await.unwrap();
    phone.records.complete_task(&task.id).await.unwrap();
    let scrapped = phone.records.save(Task::new("Scrapped", 0)).await.unwrap();
    phone
        .records
        .remove(EntityKind::Task, scrapped.id())
        .await
        .unwrap();

    assert_eq!(
        phone.engine.sync_now().await,
        GateOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(phone.store.pending_count().await.unwrap(), 6);

    phone.session.set_online(true);
    assert_eq!(
        phone.engine.sync_now().await,
        GateOutcome::Completed { cycles: 1 }
    );

    assert_eq!(phone.store.pending_count().await.unwrap(), 0);
    let tasks = remote.rows(EntityKind::Task);
    assert_eq!(tasks.len(), 2);
    let live = remote.row(EntityKind::Task, &task.id).unwrap();
    assert_eq!(
        live.get("title").and_then(|v| v.as_str()),
        Some("Feed fish (morning)")
    );
    assert!(remote
        .row(EntityKind::Task, scrapped.id())
        .unwrap()
        .is_tombstone());
    assert_eq!(remote.rows(EntityKind::Completion).len(), 1);
    assert_eq!(remote.rows(EntityKind::Profile).len(), 1);
}

#[tokio::test]
async fn redelivered_entries_do_not_duplicate_rows() {
    let remote = MemoryRemote::new();
    let store = SqliteStore::open_in_memory().unwrap();
    let reward = Record::from(Reward::new("Sleepover", 100));

    store.write(&reward).await.unwrap();
    // Same entry delivered twice, as after a crash between upsert and dequeue
    store.write(&reward).await.unwrap();

    assert_eq!(push(&store, &remote, OWNER).await.unwrap(), 2);
    assert_eq!(push(&store, &remote, OWNER).await.unwrap(), 0);
    assert_eq!(remote.rows(EntityKind::Reward).len(), 1);
    assert_eq!(remote.upsert_calls(), 2);
}

#[tokio::test]
async fn two_devices_converge_on_last_writer() {
    let remote = MemoryRemote::new();
    let laptop = device(&remote);
    let phone = device(&remote);

    let Record::Task(task) = laptop.records.save(Task::new("Water plants", 2)).await.unwrap()
    else {
        panic!("expected task");
    };
    laptop.engine.sync_now().await;
    phone.engine.sync_now().await;
    assert_eq!(
        task_title(&phone.store, &task.id).await.as_deref(),
        Some("Water plants")
    );

    let mut edited = task.clone();
    edited.title = "Water plants and herbs".to_string();
    phone.records.save(edited).await.unwrap();
    phone.engine.sync_now().await;
    laptop.engine.sync_now().await;
    assert_eq!(
        task_title(&laptop.store, &task.id).await.as_deref(),
        Some("Water plants and herbs")
    );

    laptop
        .records
        .remove(EntityKind::Task, &task.id)
        .await
        .unwrap();
    laptop.engine.sync_now().await;
    phone.engine.sync_now().await;
    assert_eq!(task_title(&phone.store, &task.id).await, None);
    assert_eq!(phone.store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn pending_local_edit_survives_an_older_remote_row() {
    let remote = MemoryRemote::new();
    let phone = device(&remote);

    let mut stale = Task::new("Old title", 1);
    stale.updated_at = 1;
    remote.insert_row(
        EntityKind::Task,
        to_remote(&Record::from(stale.clone()), OWNER).unwrap(),
    );

    let mut fresh = stale.clone();
    fresh.title = "New title".to_string();
    phone.records.save(fresh).await.unwrap();

    phone.engine.sync_now().await;
    assert_eq!(
        task_title(&phone.store, &stale.id).await.as_deref(),
        Some("New title")
    );
    let row = remote.row(EntityKind::Task, &stale.id).unwrap();
    assert_eq!(row.get("title").and_then(|v| v.as_str()), Some("New title"));
}

#[tokio::test]
async fn rejected_rows_surface_as_last_error_without_failing() {
    let remote = MemoryRemote::new();
    let phone = device(&remote);
    remote.insert_row(
        EntityKind::Completion,
        chorely_core::mapper::RemoteRow::from_value(serde_json::json!({
            "id": "c-bad",
            "owner_id": OWNER,
        }))
        .unwrap(),
    );
    let task = Task::new("Fold laundry", 1);
    remote.insert_row(
        EntityKind::Completion,
        to_remote(&Record::from(Completion::of(&task)), OWNER).unwrap(),
    );

    assert_eq!(
        phone.engine.sync_now().await,
        GateOutcome::Completed { cycles: 1 }
    );
    let status = phone.engine.status();
    assert_eq!(status.consecutive_errors, 0);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|message| message.contains("completions")));
    assert_eq!(
        phone
            .store
            .get_all(EntityKind::Completion)
            .await
            .unwrap()
            .len(),
        1
    );
}
