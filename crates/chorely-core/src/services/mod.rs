//! Caller-facing services that write through the local store

mod records;

pub use records::{AllowAll, KindLimit, RecordPolicy, RecordService};
