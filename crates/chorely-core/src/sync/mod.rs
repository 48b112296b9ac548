//! Offline sync engine: outbox push, table pull, realtime listener and the
//! scheduler gate that decides when a cycle may run.

mod pull;
mod push;
mod realtime;
mod scheduler;
mod status;

use thiserror::Error;

use crate::models::EntityKind;
use crate::remote::RemoteError;

pub use pull::{pull_table, PullReport};
pub use push::push;
pub use scheduler::{SyncEngine, SyncEngineBuilder};
pub use status::{GateOutcome, Phase, SkipReason, SyncStatus};

/// A failed push or pull. `Display` is the user-facing `last_error`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Local(#[from] crate::Error),

    #[error("Push failed for {kind} {record_id}: {source}")]
    Push {
        kind: EntityKind,
        record_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("Pull failed for {table}: {source}")]
    Pull {
        table: &'static str,
        #[source]
        source: RemoteError,
    },

    /// An outbox entry whose payload cannot be replayed
    #[error("Corrupt outbox entry {sequence}: {reason}")]
    CorruptEntry { sequence: i64, reason: String },

    #[error("No signed-in identity")]
    NoIdentity,
}

pub type SyncResult<T> = Result<T, SyncError>;
