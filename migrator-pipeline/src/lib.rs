//! # Migrator Pipeline
//! The engine-agnostic core of the batch data migrator: migration planning
//! (dependency-ordered, eligibility-checked), startup field-mapping
//! validation, the batch copier with its deferred-field second pass, and
//! the orchestrator that runs a whole migration sequentially.
pub mod copier;
pub mod errors;
pub mod orchestrator;
pub mod planner;
pub mod validate;

pub use copier::{BatchCopier, CopyStats, DEFAULT_BATCH_SIZE};
pub use errors::{CopyError, MigrationError, PlanError, ValidationError};
pub use orchestrator::{Orchestrator, RunSummary};
pub use planner::{MigrationPlan, MigrationPlanner, SkipReason};
pub use validate::{FieldMapping, build_field_mappings};
