//! Data models for Chorely

mod entity;
mod outbox;
mod profile;
mod record;
mod reward;
mod sync_conflict;
mod task;

pub use entity::EntityKind;
pub use outbox::{sort_for_push, OutboxAction, OutboxEntry};
pub use profile::{AccountSettings, Profile, Settings};
pub use record::{new_record_id, Record};
pub use reward::{Redemption, Reward};
pub use sync_conflict::SyncConflict;
pub use task::{Completion, Task};
