pub mod config;
pub mod db;
pub mod dedup;
pub mod diagnostics;
pub mod error;
pub mod importer;
pub mod models;
pub mod parser;
pub mod store;
pub mod threads;
pub mod writer;
mod migrations;

pub use config::ImportConfig;
pub use db::{open_store, SqliteStore};
pub use error::CoreError;
pub use store::{MessageStore, StoreRow, Table};
