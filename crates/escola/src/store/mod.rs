//! Persistence adapters for the repository traits.

pub mod sqlite;

pub use sqlite::SqliteStore;
