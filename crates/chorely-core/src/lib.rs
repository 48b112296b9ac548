//! chorely-core - Core library for Chorely
//!
//! Holds the record models, the local durable store with its outbox, the
//! row mapper, and the offline sync engine (push, pull, realtime listener
//! and the scheduler that gates sync cycles). Clients (CLI, UI shells) talk
//! to it through [`services::RecordService`] and observe sync progress via
//! [`sync::SyncEngine::subscribe`].

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityKind, OutboxAction, OutboxEntry, Record};
pub use sync::{GateOutcome, SyncEngine, SyncStatus};
