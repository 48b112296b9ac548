//! Database layer for Chorely

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{LocalStore, SqliteStore};
