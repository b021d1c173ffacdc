//! MySQL store implementation.
mod store;

pub use store::MySqlStore;
