//! Dependency wiring: run configuration, schema registry, and the two
//! database stores, assembled into a ready-to-run orchestrator.
use std::collections::HashSet;
use std::path::PathBuf;

use migrator_pipeline::{BatchCopier, MigrationPlanner, Orchestrator};
use migrator_repository::{DestinationStore, MySqlStore, PostgresStore, SourceStore, StoreError};
use migrator_shared::SchemaRegistry;
use tracing::info;

use crate::config::{
    CONFIG_PATH_VAR, DEFAULT_CONFIG_PATH, NEW_DATABASE_URL_VAR, OLD_DATABASE_URL_VAR, RunConfig,
    require_env,
};
use crate::errors::MigratorError;

const MAX_CONNECTIONS: u32 = 5;

/// `Dependencies` holds the wired components for one migration run: the
/// source and destination stores and the orchestrator driving them.
pub struct Dependencies {
    pub source: Box<dyn SourceStore>,
    pub destination: Box<dyn DestinationStore>,
    pub orchestrator: Orchestrator,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

impl Dependencies {
    /// Load the run configuration and schema, connect both stores, and
    /// assemble the orchestrator.
    pub async fn new() -> Result<Self, MigratorError> {
        let config_path = PathBuf::from(
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
        );
        let config = RunConfig::load(&config_path)?;
        let registry = SchemaRegistry::from_path(&config.schema_path(&config_path))?;

        let entities = if config.namespaces.is_empty() {
            registry.entity_types().to_vec()
        } else {
            registry.in_namespaces(&config.namespaces)
        };
        let exclusions = config.exclusions()?;

        let old_url = require_env(OLD_DATABASE_URL_VAR)?;
        let new_url = require_env(NEW_DATABASE_URL_VAR)?;

        info!("Connecting to source database...");
        let source = connect_source(&old_url).await?;
        info!("Connecting to destination database...");
        let destination = connect_destination(&new_url).await?;
        info!("Connected to both databases ({} engine destination)", destination.engine());

        let planner = MigrationPlanner::new(entities, exclusions);
        let copier = BatchCopier::new(config.batch_size);

        Ok(Dependencies {
            source,
            destination,
            orchestrator: Orchestrator::new(planner, copier),
        })
    }
}

fn scheme_of(url: &str) -> &str {
    url.split("://").next().unwrap_or(url)
}

async fn connect_source(url: &str) -> Result<Box<dyn SourceStore>, MigratorError> {
    match scheme_of(url) {
        "postgres" | "postgresql" => Ok(Box::new(
            PostgresStore::connect(url, MAX_CONNECTIONS).await?,
        )),
        "mysql" => Ok(Box::new(MySqlStore::connect(url, MAX_CONNECTIONS).await?)),
        other => Err(StoreError::UnsupportedScheme(other.to_string()).into()),
    }
}

async fn connect_destination(url: &str) -> Result<Box<dyn DestinationStore>, MigratorError> {
    match scheme_of(url) {
        "postgres" | "postgresql" => Ok(Box::new(
            PostgresStore::connect(url, MAX_CONNECTIONS).await?,
        )),
        "mysql" => Ok(Box::new(MySqlStore::connect(url, MAX_CONNECTIONS).await?)),
        other => Err(StoreError::UnsupportedScheme(other.to_string()).into()),
    }
}
