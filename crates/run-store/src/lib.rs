//! SQLite run store: run metadata, per-kind record tables, monitor events and
//! the comparison change-log.

mod delete;
mod error;
mod insert;
mod models;
mod open;
mod query;
mod schema;
mod writer;

pub use error::StoreError;
pub use models::*;
pub use open::Db;
pub use writer::{MonitorWriter, RunWriter};

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
