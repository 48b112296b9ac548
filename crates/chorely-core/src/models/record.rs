//! Record: the opaque unit of synchronization

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{
    AccountSettings, Completion, EntityKind, Profile, Redemption, Reward, Settings, Task,
};
use crate::error::{Error, Result};

/// Generate a new record id (UUID v7, time-sortable)
#[must_use]
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Any record the engine can store, queue and sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
    Profile(Profile),
    Settings(Settings),
    AccountSettings(AccountSettings),
    Task(Task),
    Reward(Reward),
    Completion(Completion),
    Redemption(Redemption),
}

macro_rules! with_inner {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            Record::Profile($inner) => $body,
            Record::Settings($inner) => $body,
            Record::AccountSettings($inner) => $body,
            Record::Task($inner) => $body,
            Record::Reward($inner) => $body,
            Record::Completion($inner) => $body,
            Record::Redemption($inner) => $body,
        }
    };
}

impl Record {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Profile(_) => EntityKind::Profile,
            Self::Settings(_) => EntityKind::Settings,
            Self::AccountSettings(_) => EntityKind::AccountSettings,
            Self::Task(_) => EntityKind::Task,
            Self::Reward(_) => EntityKind::Reward,
            Self::Completion(_) => EntityKind::Completion,
            Self::Redemption(_) => EntityKind::Redemption,
        }
    }

    pub fn id(&self) -> &str {
        with_inner!(self, inner => &inner.id)
    }

    /// Last local write timestamp (Unix ms)
    pub const fn updated_at(&self) -> i64 {
        with_inner!(self, inner => inner.updated_at)
    }

    pub const fn created_at(&self) -> i64 {
        with_inner!(self, inner => inner.created_at)
    }

    /// Stamp a local write
    pub fn touch(&mut self, now_ms: i64) {
        with_inner!(self, inner => inner.updated_at = now_ms);
    }

    /// The record this one references by id, if any.
    ///
    /// Used to re-push a parent that is missing remotely.
    pub fn parent(&self) -> Option<(EntityKind, &str)> {
        match self {
            Self::Task(task) => task
                .assignee_id
                .as_deref()
                .map(|id| (EntityKind::Profile, id)),
            Self::Completion(completion) => Some((EntityKind::Task, completion.task_id.as_str())),
            Self::Redemption(redemption) => {
                Some((EntityKind::Reward, redemption.reward_id.as_str()))
            }
            _ => None,
        }
    }

    /// Serialize the inner record as a bare JSON object (the outbox payload).
    pub fn to_payload(&self) -> Result<Value> {
        Ok(with_inner!(self, inner => serde_json::to_value(inner)?))
    }

    /// Rebuild a record of `kind` from a bare JSON payload.
    pub fn from_payload(kind: EntityKind, payload: Value) -> Result<Self> {
        let record = match kind {
            EntityKind::Profile => Self::Profile(serde_json::from_value(payload)?),
            EntityKind::Settings => Self::Settings(serde_json::from_value(payload)?),
            EntityKind::AccountSettings => {
                Self::AccountSettings(serde_json::from_value(payload)?)
            }
            EntityKind::Task => Self::Task(serde_json::from_value(payload)?),
            EntityKind::Reward => Self::Reward(serde_json::from_value(payload)?),
            EntityKind::Completion => Self::Completion(serde_json::from_value(payload)?),
            EntityKind::Redemption => Self::Redemption(serde_json::from_value(payload)?),
        };
        if record.id().trim().is_empty() {
            return Err(Error::InvalidInput(format!("{kind} record id is empty")));
        }
        Ok(record)
    }
}

macro_rules! impl_from_model {
    ($($model:ident),*) => {
        $(impl From<$model> for Record {
            fn from(value: $model) -> Self {
                Self::$model(value)
            }
        })*
    };
}

impl_from_model!(Profile, Settings, AccountSettings, Task, Reward, Completion, Redemption);
