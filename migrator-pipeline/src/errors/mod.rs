//! Error types for the migration pipeline, one module per stage.
pub mod copy;
pub mod orchestrator;
pub mod plan;
pub mod validate;

pub use copy::CopyError;
pub use orchestrator::MigrationError;
pub use plan::PlanError;
pub use validate::ValidationError;
