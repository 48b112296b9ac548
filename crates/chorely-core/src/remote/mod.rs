//! Remote collaborators: the authoritative store, its change feed, and the
//! session that scopes every request to one owner.

mod memory;
mod postgrest;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::mapper::RemoteRow;
use crate::models::EntityKind;

pub use memory::{MemoryRemote, StaticSession};
pub use postgrest::PostgrestRemote;

/// Faults reported by a remote collaborator
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// A referenced parent row does not exist remotely
    #[error("Missing parent row: {0}")]
    ForeignKey(String),
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Remote store is unavailable")]
    Unavailable,
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The shared remote store, addressed per entity kind
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Idempotent insert-or-merge on `conflict_key`
    async fn upsert(&self, kind: EntityKind, row: RemoteRow, conflict_key: &str)
        -> RemoteResult<()>;

    /// Set the tombstone on the row matching both `id` and `owner_id`
    async fn soft_delete(&self, kind: EntityKind, id: &str, owner_id: &str) -> RemoteResult<()>;

    async fn select_all_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteRow>>;

    /// Single-row fetch for singleton kinds
    async fn select_one_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Option<RemoteRow>>;
}

/// A remote write happened for `kind`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub kind: EntityKind,
    pub record_id: Option<String>,
}

/// Change notifications filtered to one owner and entity kind
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// The subscription ends when the receiver is dropped
    async fn subscribe(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<mpsc::Receiver<ChangeNotice>>;
}

/// Identity and connectivity signals supplied by the host
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Owner id of the signed-in caller
    fn current_identity(&self) -> Option<String>;

    fn is_online(&self) -> bool;

    /// Checked before every cycle; may refresh credentials
    async fn session_valid(&self) -> bool;
}

/// Bearer token for authenticated remote requests
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}
