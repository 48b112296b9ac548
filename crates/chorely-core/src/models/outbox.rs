//! Outbox (mutation queue) entries

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::EntityKind;

/// What a queued entry asks the remote to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxAction {
    Upsert,
    Delete,
}

impl OutboxAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OutboxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown outbox action '{other}'")),
        }
    }
}

/// A local mutation not yet acknowledged by the remote store.
///
/// `Upsert` entries carry the full record payload, `Delete` entries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic key assigned by the store
    pub sequence: i64,
    pub entity_kind: EntityKind,
    pub action: OutboxAction,
    pub record_id: String,
    pub payload: Option<Value>,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
}

/// Order entries for a push pass: by entity priority, then by sequence.
///
/// Entries for one record share a kind, so their relative order is kept.
pub fn sort_for_push(entries: &mut [OutboxEntry]) {
    entries.sort_by_key(|entry| (entry.entity_kind.push_priority(), entry.sequence));
}
