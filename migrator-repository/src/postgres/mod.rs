//! PostgreSQL store implementation.
mod store;

pub use store::PostgresStore;
