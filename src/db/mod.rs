//! Database module: models, schema and the storage facade.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: pool setup and schema bootstrap
//! - `content.rs`, `progress.rs`, `downloads.rs`, `sync_log.rs`, `users.rs`:
//!   queries grouped by table family, all on `LecternStorage`

pub mod content;
pub mod downloads;
pub mod models;
pub mod progress;
pub mod schema;
pub mod sqlite;
pub mod sync_log;
pub mod users;

pub use models::*;
pub use schema::SQLITE_INIT;
pub use sqlite::{LecternStorage, SqlitePool};
