//! Errors raised while computing the migration order.
use migrator_shared::EntityTypeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    /// A true cycle in the foreign-key graph. The order cannot be computed;
    /// the cycle members are listed in walk order.
    #[error("circular dependency between entity types: {}", .cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    CircularDependency { cycle: Vec<EntityTypeId> },
}
