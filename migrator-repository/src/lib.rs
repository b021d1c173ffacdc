//! # Migrator Repository
//! Store access for the batch data migrator. Defines the `SourceStore` /
//! `DestinationStore` traits the pipeline consumes, together with the
//! PostgreSQL and MySQL implementations and an in-memory mock for tests.
pub mod errors;
pub mod interfaces;
pub mod mock;
pub mod mysql;
pub mod postgres;

pub use errors::StoreError;
pub use interfaces::{CopyTransaction, DestinationStore, Engine, RecordStream, SourceStore};
pub use mock::MockStore;
pub use mysql::MySqlStore;
pub use postgres::PostgresStore;
