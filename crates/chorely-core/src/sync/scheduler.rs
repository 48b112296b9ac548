//! Sync scheduler: the single gate every cycle goes through.
//!
//! Requests from local writes, the poll timer, deferral/retry timers and
//! callers all funnel into [`EngineInner::gate`]. The gate checks, in
//! order: engine started, identity present, device online, no cycle in
//! flight, session valid, and the backoff/min-interval window. A request
//! that arrives while a cycle runs sets `sync_requested` and the running
//! pass loops once more instead of starting a second cycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{self, join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::status::SyncCycleState;
use super::{pull, push, realtime};
use super::{GateOutcome, Phase, PullReport, SkipReason, SyncError, SyncResult, SyncStatus};
use crate::config::SyncConfig;
use crate::db::LocalStore;
use crate::models::EntityKind;
use crate::remote::{ChangeFeed, RemoteStore, SessionProvider};
use crate::util::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateMode {
    /// Requests made while the engine is started
    Scheduled,
    /// A single caller-driven pass that does not need `start()`
    OneShot,
}

#[derive(Default)]
struct EngineTasks {
    poll: Option<JoinHandle<()>>,
    /// The one pending deferral/retry timer, tagged with its generation
    timer: Option<(u64, JoinHandle<()>)>,
    timer_generation: u64,
    listeners: Vec<JoinHandle<()>>,
}

impl EngineTasks {
    fn abort_all(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        if let Some((_, timer)) = self.timer.take() {
            timer.abort();
        }
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
    }
}

#[derive(Debug, Default)]
struct CycleReport {
    pushed: usize,
    applied: usize,
    conflicts: usize,
    rejected: Vec<String>,
}

pub(crate) struct EngineInner {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    session: Arc<dyn SessionProvider>,
    config: SyncConfig,
    state: Mutex<SyncCycleState>,
    status: watch::Sender<SyncStatus>,
    tasks: Mutex<EngineTasks>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

/// Marks a cycle in flight; clears `is_syncing` on drop unless released
struct CycleGuard<'a> {
    inner: &'a EngineInner,
    armed: bool,
}

impl<'a> CycleGuard<'a> {
    fn claim(inner: &'a EngineInner) -> Option<Self> {
        {
            let mut state = inner.state();
            if state.is_syncing {
                return None;
            }
            state.is_syncing = true;
        }
        inner.publish();
        Some(Self { inner, armed: true })
    }

    /// Clear `is_syncing` and apply the cycle result under one lock
    fn release_with<R>(mut self, finish: impl FnOnce(&mut SyncCycleState) -> R) -> R {
        let result = {
            let mut state = self.inner.state();
            state.is_syncing = false;
            finish(&mut state)
        };
        self.armed = false;
        self.inner.publish();
        result
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state().is_syncing = false;
            self.inner.publish();
        }
    }
}

impl EngineInner {
    fn state(&self) -> MutexGuard<'_, SyncCycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, EngineTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let snapshot = self.state().snapshot(Instant::now());
        self.status.send_replace(snapshot);
    }

    fn is_running(&self) -> bool {
        self.state().running
    }

    /// Record the request, then pass through the gate
    fn request(self: Arc<Self>, mode: GateMode) -> BoxFuture<'static, GateOutcome> {
        let running = {
            let mut state = self.state();
            state.sync_requested = true;
            state.running
        };
        if mode == GateMode::Scheduled && !running {
            return future::ready(GateOutcome::Skipped(SkipReason::Stopped)).boxed();
        }
        self.gate(mode)
    }

    fn gate(self: Arc<Self>, mode: GateMode) -> BoxFuture<'static, GateOutcome> {
        async move {
            let mut cycles = 0_u32;
            loop {
                if mode == GateMode::Scheduled && !self.is_running() {
                    return settle(cycles, GateOutcome::Skipped(SkipReason::Stopped));
                }
                let Some(owner_id) = self.session.current_identity() else {
                    return settle(cycles, GateOutcome::Skipped(SkipReason::NoIdentity));
                };
                if !self.session.is_online() {
                    return settle(cycles, GateOutcome::Skipped(SkipReason::Offline));
                }
                let Some(guard) = CycleGuard::claim(&self) else {
                    return settle(cycles, GateOutcome::Skipped(SkipReason::InFlight));
                };
                if !self.session.session_valid().await {
                    drop(guard);
                    return settle(cycles, GateOutcome::Skipped(SkipReason::SessionInvalid));
                }

                let wait = self
                    .state()
                    .delay_until_allowed(Instant::now(), self.config.min_interval);
                if let Some(delay) = wait {
                    drop(guard);
                    self.arm_timer(delay);
                    tracing::debug!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Sync deferred"
                    );
                    return settle(cycles, GateOutcome::Deferred { delay });
                }

                self.state().sync_requested = false;
                match self.run_cycle(&owner_id).await {
                    Ok(report) => {
                        cycles += 1;
                        let again = guard.release_with(|state| {
                            state.last_sync_at = Some(now_millis());
                            state.last_success = Some(Instant::now());
                            state.consecutive_errors = 0;
                            state.next_sync_allowed_at = None;
                            state.last_error = (!report.rejected.is_empty())
                                .then(|| report.rejected.join("; "));
                            state.refresh_tick += 1;
                            state.sync_requested
                        });
                        if !again {
                            return GateOutcome::Completed { cycles };
                        }
                        tracing::debug!("Sync requested during cycle, passing the gate again");
                    }
                    Err(error) => {
                        let message = error.to_string();
                        let (delay, failures) = guard.release_with(|state| {
                            state.consecutive_errors = state.consecutive_errors.saturating_add(1);
                            let delay = self.config.backoff_delay(state.consecutive_errors);
                            state.next_sync_allowed_at = Some(Instant::now() + delay);
                            state.last_error = Some(message.clone());
                            state.sync_requested = true;
                            (delay, state.consecutive_errors)
                        });
                        tracing::error!(
                            %error,
                            consecutive_errors = failures,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Sync cycle failed"
                        );
                        self.arm_timer(delay);
                        return GateOutcome::Failed(message);
                    }
                }
            }
        }
        .boxed()
    }

    /// One full cycle: push, then pull every kind concurrently
    async fn run_cycle(&self, owner_id: &str) -> SyncResult<CycleReport> {
        let started = Instant::now();
        let pushed = push(self.store.as_ref(), self.remote.as_ref(), owner_id).await?;

        let pulls = join_all(EntityKind::ALL.into_iter().map(|kind| {
            pull::pull_table(self.store.as_ref(), self.remote.as_ref(), owner_id, kind)
        }))
        .await;

        let mut report = CycleReport {
            pushed,
            ..CycleReport::default()
        };
        let mut first_error = None;
        for (kind, result) in EntityKind::ALL.into_iter().zip(pulls) {
            match result {
                Ok(pulled) => {
                    report.applied += pulled.applied;
                    report.conflicts += pulled.conflicts;
                    report.rejected.extend(pulled.rejected);
                }
                Err(error) => {
                    tracing::warn!(table = kind.table_name(), %error, "Table pull failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        tracing::info!(
            pushed = report.pushed,
            applied = report.applied,
            conflicts = report.conflicts,
            rejected = report.rejected.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Sync cycle complete"
        );
        Ok(report)
    }

    /// Arm the single deferral/retry timer, replacing any pending one
    fn arm_timer(self: &Arc<Self>, delay: Duration) {
        if !self.is_running() {
            return;
        }
        let engine = Arc::downgrade(self);
        let mut tasks = self.tasks();
        tasks.timer_generation += 1;
        let generation = tasks.timer_generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = engine.upgrade() else {
                return;
            };
            inner.release_timer(generation);
            let outcome = inner.gate(GateMode::Scheduled).await;
            tracing::debug!(%outcome, "Timed sync pass finished");
        });
        if let Some((_, previous)) = tasks.timer.replace((generation, handle)) {
            previous.abort();
        }
    }

    /// A fired timer removes itself so a re-arm cannot abort its pass
    fn release_timer(&self, generation: u64) {
        let mut tasks = self.tasks();
        if tasks
            .timer
            .as_ref()
            .is_some_and(|(armed, _)| *armed == generation)
        {
            tasks.timer = None;
        }
    }

    /// Targeted pull outside the gate (realtime and manual refresh)
    pub(crate) async fn pull_one(&self, kind: EntityKind) -> SyncResult<PullReport> {
        let owner_id = self
            .session
            .current_identity()
            .ok_or(SyncError::NoIdentity)?;
        let report =
            match pull::pull_table(self.store.as_ref(), self.remote.as_ref(), &owner_id, kind)
                .await
            {
                Ok(report) => report,
                Err(error) => {
                    // Outside the gate: surfaced, but no backoff
                    self.state().last_error = Some(error.to_string());
                    self.publish();
                    return Err(error);
                }
            };

        {
            let mut state = self.state();
            if report.applied > 0 {
                state.refresh_tick += 1;
            }
            if !report.rejected.is_empty() {
                state.last_error = Some(report.rejected.join("; "));
            }
        }
        self.publish();
        Ok(report)
    }
}

/// Passes that already ran cycles report them even if a later loop bailed out
fn settle(cycles: u32, outcome: GateOutcome) -> GateOutcome {
    if cycles > 0 {
        GateOutcome::Completed { cycles }
    } else {
        outcome
    }
}

fn spawn_poll(engine: Weak<EngineInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = engine.upgrade() else {
                break;
            };
            let outcome = inner.request(GateMode::Scheduled).await;
            tracing::debug!(%outcome, "Poll sync pass finished");
        }
    })
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    feed: Option<Arc<dyn ChangeFeed>>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn build(self) -> SyncEngine {
        let (status, _) = watch::channel(SyncStatus::default());
        SyncEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                remote: self.remote,
                feed: self.feed,
                session: self.session,
                config: self.config,
                state: Mutex::new(SyncCycleState::default()),
                status,
                tasks: Mutex::new(EngineTasks::default()),
            }),
        }
    }
}

/// Handle to the sync engine. Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            remote,
            session,
            feed: None,
            config: SyncConfig::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.inner.store
    }

    /// Observe status changes. Only the engine writes to the channel.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Leave `stopped`: subscribe to realtime changes, start the poll timer
    /// and request an immediate cycle.
    pub async fn start(&self) {
        {
            let mut state = self.inner.state();
            if state.running {
                return;
            }
            state.running = true;
        }
        self.inner.publish();
        tracing::info!("Sync engine started");

        let listeners = match (&self.inner.feed, self.inner.session.current_identity()) {
            (Some(feed), Some(owner_id)) if self.inner.config.realtime => {
                realtime::spawn_listeners(&self.inner, feed.as_ref(), &owner_id).await
            }
            _ => Vec::new(),
        };
        let poll = self
            .inner
            .config
            .poll_interval
            .map(|period| spawn_poll(Arc::downgrade(&self.inner), period));

        {
            let mut tasks = self.inner.tasks();
            tasks.listeners = listeners;
            tasks.poll = poll;
            // stop() may have run while subscribing
            if !self.inner.is_running() {
                tasks.abort_all();
                return;
            }
        }
        self.request_sync_detached();
    }

    /// Tear down listeners and timers. An in-flight cycle runs to completion.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state();
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.inner.tasks().abort_all();
        self.inner.publish();
        tracing::info!("Sync engine stopped");
    }

    /// Request a cycle and wait for the gate's decision
    pub async fn request_sync(&self) -> GateOutcome {
        self.inner.clone().request(GateMode::Scheduled).await
    }

    /// Request a cycle without waiting for it
    pub fn request_sync_detached(&self) {
        let pass = self.inner.clone().request(GateMode::Scheduled);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let outcome = pass.await;
                    tracing::debug!(%outcome, "Background sync pass finished");
                });
            }
            Err(_) => tracing::warn!("No async runtime, sync request left pending"),
        }
    }

    /// One gate pass that works without `start()`. Arms no timers.
    pub async fn sync_now(&self) -> GateOutcome {
        self.inner.clone().request(GateMode::OneShot).await
    }

    /// Pull a single kind outside the gate; returns the rows applied
    pub async fn pull_table(&self, kind: EntityKind) -> SyncResult<usize> {
        Ok(self.inner.pull_one(kind).await?.applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{Record, Task};
    use crate::remote::{MemoryRemote, StaticSession};
    use pretty_assertions::assert_eq;

    fn build_engine(
        session: &Arc<StaticSession>,
        remote: &MemoryRemote,
    ) -> (SyncEngine, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = SyncEngine::builder(store.clone(), Arc::new(remote.clone()), session.clone())
            .config(SyncConfig::default().without_polling().without_realtime())
            .build();
        (engine, store)
    }

    #[tokio::test]
    async fn stopped_engine_skips_scheduled_requests() {
        let remote = MemoryRemote::new();
        let (engine, _) = build_engine(&Arc::new(StaticSession::signed_in("o")), &remote);

        assert_eq!(
            engine.request_sync().await,
            GateOutcome::Skipped(SkipReason::Stopped)
        );
        assert_eq!(engine.phase(), Phase::Stopped);
        assert_eq!(remote.select_calls(), 0);
    }

    #[tokio::test]
    async fn sync_now_runs_without_start() {
        let remote = MemoryRemote::new();
        let (engine, store) = build_engine(&Arc::new(StaticSession::signed_in("o")), &remote);
        store
            .write(&Record::from(Task::new("Laundry", 2)))
            .await
            .unwrap();

        assert_eq!(engine.sync_now().await, GateOutcome::Completed { cycles: 1 });
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let status = engine.status();
        assert!(!status.is_syncing);
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.refresh_tick, 1);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn identity_and_connectivity_are_checked_first() {
        let remote = MemoryRemote::new();
        let session = Arc::new(StaticSession::signed_out());
        let (engine, _) = build_engine(&session, &remote);
        assert_eq!(
            engine.sync_now().await,
            GateOutcome::Skipped(SkipReason::NoIdentity)
        );

        session.set_identity(Some("o".to_string()));
        session.set_valid(true);
        session.set_online(false);
        assert_eq!(
            engine.sync_now().await,
            GateOutcome::Skipped(SkipReason::Offline)
        );
        // Neither skip reached the session check or the remote
        assert_eq!(session.validity_checks(), 0);
        assert_eq!(remote.select_calls(), 0);

        session.set_online(true);
        assert_eq!(engine.sync_now().await, GateOutcome::Completed { cycles: 1 });
        assert_eq!(session.validity_checks(), 1);
    }

    #[tokio::test]
    async fn invalid_session_skips_and_releases_in_flight_flag() {
        let remote = MemoryRemote::new();
        let session = Arc::new(StaticSession::signed_in("o"));
        session.set_valid(false);
        let (engine, _) = build_engine(&session, &remote);

        assert_eq!(
            engine.sync_now().await,
            GateOutcome::Skipped(SkipReason::SessionInvalid)
        );
        assert_eq!(session.validity_checks(), 1);
        assert!(!engine.status().is_syncing);
    }
}
