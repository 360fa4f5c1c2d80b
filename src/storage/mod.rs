//! Database access: pool, schema, and per-entity query modules

pub mod channels;
pub mod content;
pub mod db;
pub mod payments;
pub mod users;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
