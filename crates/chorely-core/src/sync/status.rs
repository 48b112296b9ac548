//! Observable sync state and gate outcomes

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Where the scheduler's state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stopped,
    Idle,
    Syncing,
    BackoffWait,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::BackoffWait => "backoff-wait",
        })
    }
}

/// Read-only snapshot published to observers after every state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: Phase,
    pub is_syncing: bool,
    /// Wall-clock time of the last successful cycle (Unix ms)
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
    /// Bumped whenever pulled data may have changed derived state
    pub refresh_tick: u64,
    pub consecutive_errors: u32,
    /// Time left until a backoff retry, if one is pending
    pub pending_retry_ms: Option<u64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Stopped,
            is_syncing: false,
            last_sync_at: None,
            last_error: None,
            refresh_tick: 0,
            consecutive_errors: 0,
            pending_retry_ms: None,
        }
    }
}

/// Why a gate pass did not run a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Stopped,
    NoIdentity,
    Offline,
    /// Another cycle is running; it will pick the request up
    InFlight,
    SessionInvalid,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "sync engine is stopped",
            Self::NoIdentity => "not signed in",
            Self::Offline => "device is offline",
            Self::InFlight => "a sync is already running",
            Self::SessionInvalid => "session is no longer valid",
        })
    }
}

/// Result of one pass through the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Ran `cycles` successful cycles; a follow-up may already be scheduled
    Completed { cycles: u32 },
    /// Rate limit or backoff window still open; retried after `delay`
    Deferred { delay: Duration },
    Skipped(SkipReason),
    Failed(String),
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { cycles } => write!(f, "completed {cycles} cycle(s)"),
            Self::Deferred { delay } => write!(f, "deferred for {}s", delay.as_secs()),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Scheduler-owned cycle state. Only the engine mutates it.
#[derive(Debug, Default)]
pub(crate) struct SyncCycleState {
    pub running: bool,
    pub is_syncing: bool,
    pub last_sync_at: Option<i64>,
    pub last_success: Option<Instant>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    pub next_sync_allowed_at: Option<Instant>,
    pub sync_requested: bool,
    pub refresh_tick: u64,
}

impl SyncCycleState {
    pub fn phase(&self, now: Instant) -> Phase {
        if !self.running {
            Phase::Stopped
        } else if self.is_syncing {
            Phase::Syncing
        } else if self.next_sync_allowed_at.is_some_and(|at| at > now) {
            Phase::BackoffWait
        } else {
            Phase::Idle
        }
    }

    /// Remaining wait before the gate reopens, if any
    pub fn delay_until_allowed(&self, now: Instant, min_interval: Duration) -> Option<Duration> {
        if let Some(at) = self.next_sync_allowed_at.filter(|at| *at > now) {
            return Some(at - now);
        }
        self.last_success
            .map(|last| last + min_interval)
            .filter(|ready| *ready > now)
            .map(|ready| ready - now)
    }

    pub fn snapshot(&self, now: Instant) -> SyncStatus {
        SyncStatus {
            phase: self.phase(now),
            is_syncing: self.is_syncing,
            last_sync_at: self.last_sync_at,
            last_error: self.last_error.clone(),
            refresh_tick: self.refresh_tick,
            consecutive_errors: self.consecutive_errors,
            pending_retry_ms: self
                .next_sync_allowed_at
                .filter(|at| *at > now)
                .map(|at| u64::try_from((at - now).as_millis()).unwrap_or(u64::MAX)),
        }
    }
}
