//! Coarse sync indicator for client shells.

use std::fmt;

use crate::sync::{Phase, SyncStatus};

/// What a status badge should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    /// Nothing pending and the last cycle succeeded
    Synced,
    /// Local changes not yet pushed
    Pending,
    Error,
}

impl SyncState {
    pub fn derive(status: &SyncStatus, online: bool, pending: usize) -> Self {
        if !online {
            Self::Offline
        } else if status.is_syncing || status.phase == Phase::Syncing {
            Self::Syncing
        } else if status.consecutive_errors > 0 {
            Self::Error
        } else if pending > 0 || status.last_sync_at.is_none() {
            Self::Pending
        } else {
            Self::Synced
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        })
    }
}
