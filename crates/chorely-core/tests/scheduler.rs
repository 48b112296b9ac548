//! Gate, coalescing, backoff and realtime behaviour with paused time

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorely_core::config::SyncConfig;
use chorely_core::db::{LocalStore, SqliteStore};
use chorely_core::mapper::{to_remote, RemoteRow};
use chorely_core::models::Task;
use chorely_core::remote::{MemoryRemote, RemoteResult, RemoteStore, StaticSession};
use chorely_core::services::RecordService;
use chorely_core::sync::{Phase, SkipReason};
use chorely_core::{EntityKind, GateOutcome, Record, SyncEngine, SyncStatus};
use pretty_assertions::assert_eq;
use tokio::sync::watch;

const OWNER: &str = "household-1";
/// Selects issued by one full cycle (one per entity kind)
const SELECTS_PER_CYCLE: usize = 7;

async fn wait_until(
    status: &mut watch::Receiver<SyncStatus>,
    condition: impl FnMut(&SyncStatus) -> bool,
) -> SyncStatus {
    tokio::time::timeout(Duration::from_secs(3_600), status.wait_for(condition))
        .await
        .expect("condition not reached")
        .expect("status channel closed")
        .clone()
}

fn quiet_config() -> SyncConfig {
    SyncConfig::default()
        .with_min_interval(Duration::from_secs(60))
        .with_backoff(Duration::from_secs(5), Duration::from_secs(20))
        .without_polling()
        .without_realtime()
}

fn engine_with(
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
) -> (SyncEngine, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = SyncEngine::builder(
        store.clone(),
        remote,
        Arc::new(StaticSession::signed_in(OWNER)),
    )
    .config(config)
    .build();
    (engine, store)
}

/// Remote whose selects take a second, to hold a cycle open
struct SlowRemote(MemoryRemote);

#[async_trait]
impl RemoteStore for SlowRemote {
    async fn upsert(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        conflict_key: &str,
    ) -> RemoteResult<()> {
        self.0.upsert(kind, row, conflict_key).await
    }

    async fn soft_delete(&self, kind: EntityKind, id: &str, owner_id: &str) -> RemoteResult<()> {
        self.0.soft_delete(kind, id, owner_id).await
    }

    async fn select_all_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.0.select_all_owned_by(kind, owner_id).await
    }

    async fn select_one_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Option<RemoteRow>> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.0.select_one_owned_by(kind, owner_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn requests_inside_min_interval_coalesce_into_one_follow_up() {
    let remote = MemoryRemote::new();
    let (engine, store) = engine_with(Arc::new(remote.clone()), quiet_config());
    let records = RecordService::new(store.clone()).with_engine(engine.clone());
    let mut status = engine.subscribe();

    engine.start().await;
    wait_until(&mut status, |s| s.refresh_tick == 1).await;
    assert_eq!(remote.select_calls(), SELECTS_PER_CYCLE);

    // Two local changes inside the window
    records.save(Task::new("Dishes", 1)).await.unwrap();
    records.save(Task::new("Laundry", 2)).await.unwrap();
    assert!(matches!(
        engine.request_sync().await,
        GateOutcome::Deferred { .. }
    ));
    assert_eq!(remote.select_calls(), SELECTS_PER_CYCLE);
    assert_eq!(remote.upsert_calls(), 0);

    let after = wait_until(&mut status, |s| s.refresh_tick == 2).await;
    assert_eq!(after.last_error, None);
    assert_eq!(remote.upsert_calls(), 2);
    assert_eq!(remote.select_calls(), 2 * SELECTS_PER_CYCLE);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    // Nothing else was requested, so nothing else runs
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(engine.status().refresh_tick, 2);
    assert_eq!(remote.select_calls(), 2 * SELECTS_PER_CYCLE);

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn request_during_cycle_triggers_exactly_one_more_pass() {
    let remote = MemoryRemote::new();
    let config = quiet_config().with_min_interval(Duration::ZERO);
    let (engine, _) = engine_with(Arc::new(SlowRemote(remote.clone())), config);
    let mut status = engine.subscribe();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.sync_now().await }
    });
    wait_until(&mut status, |s| s.is_syncing).await;

    assert_eq!(
        engine.sync_now().await,
        GateOutcome::Skipped(SkipReason::InFlight)
    );
    assert_eq!(
        engine.sync_now().await,
        GateOutcome::Skipped(SkipReason::InFlight)
    );

    assert_eq!(
        first.await.unwrap(),
        GateOutcome::Completed { cycles: 2 }
    );
    assert_eq!(remote.select_calls(), 2 * SELECTS_PER_CYCLE);
    assert!(!engine.status().is_syncing);
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_exponentially_and_success_resets() {
    let remote = MemoryRemote::new();
    remote.set_unavailable(true);
    let (engine, _) = engine_with(Arc::new(remote.clone()), quiet_config());
    let mut status = engine.subscribe();

    engine.start().await;
    let mut delays = Vec::new();
    for failures in 1..=4 {
        let snapshot = wait_until(&mut status, |s| s.consecutive_errors == failures).await;
        assert_eq!(snapshot.phase, Phase::BackoffWait);
        assert!(snapshot.last_error.is_some());
        delays.push(snapshot.pending_retry_ms.unwrap());
    }
    assert_eq!(delays, vec![5_000, 10_000, 20_000, 20_000]);

    remote.clear_failures();
    let recovered = wait_until(&mut status, |s| s.consecutive_errors == 0).await;
    assert_eq!(recovered.last_error, None);
    assert_eq!(recovered.pending_retry_ms, None);
    assert!(recovered.last_sync_at.is_some());

    // The next failure starts again from the base delay
    remote.set_unavailable(true);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(matches!(engine.request_sync().await, GateOutcome::Failed(_)));
    assert_eq!(engine.status().pending_retry_ms, Some(5_000));

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry() {
    let remote = MemoryRemote::new();
    remote.set_unavailable(true);
    let (engine, _) = engine_with(Arc::new(remote.clone()), quiet_config());
    let mut status = engine.subscribe();

    engine.start().await;
    wait_until(&mut status, |s| s.consecutive_errors == 1).await;
    let selects = remote.select_calls();

    engine.stop();
    assert_eq!(engine.phase(), Phase::Stopped);
    assert_eq!(
        engine.request_sync().await,
        GateOutcome::Skipped(SkipReason::Stopped)
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(remote.select_calls(), selects);
    assert_eq!(engine.status().consecutive_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn poll_timer_requests_cycles() {
    let remote = MemoryRemote::new();
    let config = quiet_config().with_poll_interval(Duration::from_secs(300));
    let (engine, _) = engine_with(Arc::new(remote.clone()), config);
    let mut status = engine.subscribe();

    engine.start().await;
    wait_until(&mut status, |s| s.refresh_tick == 1).await;
    wait_until(&mut status, |s| s.refresh_tick == 3).await;
    assert_eq!(remote.select_calls(), 3 * SELECTS_PER_CYCLE);

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn realtime_notice_pulls_the_changed_table() {
    let remote = MemoryRemote::new();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = SyncEngine::builder(
        store.clone(),
        Arc::new(remote.clone()),
        Arc::new(StaticSession::signed_in(OWNER)),
    )
    .change_feed(Arc::new(remote.clone()))
    .config(SyncConfig::default().without_polling())
    .build();
    let mut status = engine.subscribe();

    engine.start().await;
    wait_until(&mut status, |s| s.refresh_tick == 1).await;
    let selects = remote.select_calls();

    let task = Task::new("From the other phone", 4);
    remote.insert_row(
        EntityKind::Task,
        to_remote(&Record::from(task.clone()), OWNER).unwrap(),
    );
    wait_until(&mut status, |s| s.refresh_tick == 2).await;

    assert!(store
        .get_by_id(EntityKind::Task, &task.id)
        .await
        .unwrap()
        .is_some());
    // Only the tasks table was fetched
    assert_eq!(remote.select_calls(), selects + 1);

    engine.stop();
    let later = Task::new("After stop", 1);
    remote.insert_row(
        EntityKind::Task,
        to_remote(&Record::from(later.clone()), OWNER).unwrap(),
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(store
        .get_by_id(EntityKind::Task, &later.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn one_failed_table_fails_the_cycle_but_keeps_the_other_pulls() {
    let remote = MemoryRemote::new();
    let task = Task::new("Fold towels", 2);
    remote.insert_row(
        EntityKind::Task,
        to_remote(&Record::from(task.clone()), OWNER).unwrap(),
    );
    remote.fail_selects(EntityKind::Reward);
    let (engine, store) = engine_with(Arc::new(remote.clone()), quiet_config());

    assert!(matches!(engine.sync_now().await, GateOutcome::Failed(_)));
    assert_eq!(remote.select_calls(), SELECTS_PER_CYCLE);
    assert!(store
        .get_by_id(EntityKind::Task, &task.id)
        .await
        .unwrap()
        .is_some());

    let status = engine.status();
    assert_eq!(status.consecutive_errors, 1);
    assert_eq!(status.pending_retry_ms, Some(5_000));
    assert!(status
        .last_error
        .is_some_and(|error| error.contains("rewards")));
}

#[tokio::test(start_paused = true)]
async fn realtime_pull_failure_surfaces_without_backoff() {
    let remote = MemoryRemote::new();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = SyncEngine::builder(
        store.clone(),
        Arc::new(remote.clone()),
        Arc::new(StaticSession::signed_in(OWNER)),
    )
    .change_feed(Arc::new(remote.clone()))
    .config(SyncConfig::default().without_polling())
    .build();
    let mut status = engine.subscribe();

    engine.start().await;
    wait_until(&mut status, |s| s.refresh_tick == 1).await;
    let selects = remote.select_calls();

    remote.fail_selects(EntityKind::Task);
    remote.insert_row(
        EntityKind::Task,
        to_remote(&Record::from(Task::new("Lost in transit", 1)), OWNER).unwrap(),
    );
    let failed = wait_until(&mut status, |s| s.last_error.is_some()).await;

    assert_eq!(remote.select_calls(), selects + 1);
    assert_eq!(failed.consecutive_errors, 0);
    assert_eq!(failed.pending_retry_ms, None);
    assert_eq!(failed.refresh_tick, 1);

    engine.stop();
}
