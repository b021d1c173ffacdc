//! Store traits consumed by the migration pipeline.
//! The pipeline is engine-agnostic; everything engine-specific lives behind
//! these interfaces.
mod destination;
mod source;

pub use destination::{CopyTransaction, DestinationStore, Engine};
pub use source::{RecordStream, SourceStore};
