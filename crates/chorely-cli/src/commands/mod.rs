pub mod auth_cmd;
pub mod common;
pub mod config;
pub mod outbox;
pub mod profile;
pub mod reward;
pub mod status;
pub mod sync;
pub mod task;
