//! Migration planning: eligibility checks and dependency-ordered
//! sequencing of entity types.
//!
//! The order is a depth-first post-order over the foreign-key dependency
//! graph restricted to eligible entity types: every entity type appears
//! after everything it depends on. A true cycle is an error naming its
//! members, not a silently-truncated order.
use std::collections::{HashMap, HashSet};

use migrator_shared::{EntityType, EntityTypeId};
use migrator_repository::SourceStore;
use tracing::{info, warn};

use crate::errors::PlanError;

/// Why an entity type is present in the plan printout but not copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No table with the expected name in the source catalog.
    MissingTable,
    /// The catalog existence query itself failed; treated as ineligible.
    CatalogError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingTable => "not in source database",
            SkipReason::CatalogError => "catalog check failed",
        }
    }
}

/// The computed migration order. Immutable for the run.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Eligible entity types, dependencies first.
    pub ordered: Vec<EntityType>,
    /// Ineligible entity types with the reason. Excluded types are absent
    /// entirely.
    pub skipped: Vec<(EntityTypeId, SkipReason)>,
}

impl MigrationPlan {
    /// Log the numbered plan before any copying starts.
    pub fn log(&self) {
        info!("Migration order:");
        let mut position = 1;
        for entity in &self.ordered {
            info!("{position}. {} [MIGRATE]", entity.id);
            position += 1;
        }
        for (id, reason) in &self.skipped {
            info!("{position}. {id} [SKIP: {}]", reason.as_str());
            position += 1;
        }
    }
}

/// Computes the migration plan for a configured set of entity types.
pub struct MigrationPlanner {
    entities: Vec<EntityType>,
    exclusions: HashSet<EntityTypeId>,
}

impl MigrationPlanner {
    pub fn new(entities: Vec<EntityType>, exclusions: HashSet<EntityTypeId>) -> Self {
        Self {
            entities,
            exclusions,
        }
    }

    /// Apply the exclusion set and the source-catalog existence check, then
    /// order the surviving entity types dependencies-first.
    pub async fn plan(&self, source: &dyn SourceStore) -> Result<MigrationPlan, PlanError> {
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();

        for entity in &self.entities {
            if self.exclusions.contains(&entity.id) {
                continue;
            }
            match source.table_exists(&entity.table).await {
                Ok(true) => eligible.push(entity.clone()),
                Ok(false) => skipped.push((entity.id.clone(), SkipReason::MissingTable)),
                Err(e) => {
                    warn!(
                        "Error checking table existence for {}: {e}",
                        entity.id
                    );
                    skipped.push((entity.id.clone(), SkipReason::CatalogError));
                }
            }
        }

        let ordered = order_entities(&eligible)?;
        Ok(MigrationPlan { ordered, skipped })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// Dependencies-first total order over `entities`. Edges only exist between
/// members of the slice; foreign keys pointing outside it are ignored.
pub fn order_entities(entities: &[EntityType]) -> Result<Vec<EntityType>, PlanError> {
    let index_of: HashMap<&EntityTypeId, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (&e.id, i))
        .collect();

    // adjacency in declaration order for a deterministic walk
    let dependencies: Vec<Vec<usize>> = entities
        .iter()
        .map(|entity| {
            entity
                .foreign_key_fields()
                .iter()
                .filter_map(|f| f.references.as_ref())
                .filter_map(|target| index_of.get(target).copied())
                .collect()
        })
        .collect();

    let mut state = vec![VisitState::Unvisited; entities.len()];
    let mut path: Vec<usize> = Vec::new();
    let mut order: Vec<usize> = Vec::new();

    for start in 0..entities.len() {
        visit(start, entities, &dependencies, &mut state, &mut path, &mut order)?;
    }

    Ok(order.into_iter().map(|i| entities[i].clone()).collect())
}

fn visit(
    idx: usize,
    entities: &[EntityType],
    dependencies: &[Vec<usize>],
    state: &mut [VisitState],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), PlanError> {
    match state[idx] {
        VisitState::Done => return Ok(()),
        VisitState::InProgress => {
            let from = path
                .iter()
                .position(|&i| i == idx)
                .unwrap_or_default();
            let mut cycle: Vec<EntityTypeId> =
                path[from..].iter().map(|&i| entities[i].id.clone()).collect();
            cycle.push(entities[idx].id.clone());
            return Err(PlanError::CircularDependency { cycle });
        }
        VisitState::Unvisited => {}
    }

    state[idx] = VisitState::InProgress;
    path.push(idx);
    for &dep in &dependencies[idx] {
        visit(dep, entities, dependencies, state, path, order)?;
    }
    path.pop();
    state[idx] = VisitState::Done;
    order.push(idx);
    Ok(())
}
