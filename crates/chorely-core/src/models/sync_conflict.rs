//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::EntityKind;

/// A pull that kept the local version because it was newer (LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity_kind: EntityKind,
    pub record_id: String,
    /// Local record's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming row's timestamp that was rejected
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
