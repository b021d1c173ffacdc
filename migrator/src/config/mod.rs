//! Configuration module for the migrator.
//! Defines the run configuration file format and wires up application
//! dependencies.
mod dependencies;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use migrator_shared::{EntityTypeId, ParseEntityTypeIdError};
use serde::Deserialize;

pub use dependencies::Dependencies;

/// Environment variable naming the run configuration file.
pub const CONFIG_PATH_VAR: &str = "MIGRATOR_CONFIG";
/// Default run configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/migration.toml";
/// Connection string for the source database.
pub const OLD_DATABASE_URL_VAR: &str = "OLD_DATABASE_URL";
/// Connection string for the destination database.
pub const NEW_DATABASE_URL_VAR: &str = "NEW_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid exclusion: {0}")]
    InvalidExclusion(#[from] ParseEntityTypeIdError),
    #[error("environment variable {0} must be set")]
    MissingEnv(&'static str),
}

fn default_batch_size() -> usize {
    migrator_pipeline::DEFAULT_BATCH_SIZE
}

/// One migration run's settings, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Entity-type schema file, resolved relative to this config file.
    pub schema_file: PathBuf,
    /// Namespaces to migrate; empty means every namespace in the schema.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Entity types to leave behind, as `namespace.name`.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The exclusion list parsed into identifiers.
    pub fn exclusions(&self) -> Result<HashSet<EntityTypeId>, ConfigError> {
        self.exclude
            .iter()
            .map(|s| s.parse::<EntityTypeId>().map_err(ConfigError::from))
            .collect()
    }

    /// Schema file path resolved against the directory holding `config_path`.
    pub fn schema_path(&self, config_path: &Path) -> PathBuf {
        if self.schema_file.is_absolute() {
            self.schema_file.clone()
        } else {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&self.schema_file)
        }
    }
}

pub(crate) fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(contents.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn minimal_config_gets_the_defaults() {
        let file = write_config(r#"schema_file = "schema.toml""#);
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.batch_size, 5000);
        assert!(config.namespaces.is_empty());
        assert!(config.exclusions().unwrap().is_empty());
    }

    #[test]
    fn full_config_round_trips() {
        let file = write_config(
            r#"
            schema_file = "schema.toml"
            namespaces = ["auth", "shop"]
            exclude = ["shop.cartitem"]
            batch_size = 1000
            "#,
        );
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.namespaces, vec!["auth", "shop"]);
        assert_eq!(config.batch_size, 1000);
        assert!(
            config
                .exclusions()
                .unwrap()
                .contains(&EntityTypeId::new("shop", "cartitem"))
        );
    }

    #[test]
    fn unqualified_exclusions_are_rejected() {
        let file = write_config(
            r#"
            schema_file = "schema.toml"
            exclude = ["cartitem"]
            "#,
        );
        let config = RunConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.exclusions().unwrap_err(),
            ConfigError::InvalidExclusion(_)
        ));
    }

    #[test]
    fn schema_path_resolves_relative_to_the_config_file() {
        let file = write_config(r#"schema_file = "schema.toml""#);
        let config = RunConfig::load(file.path()).unwrap();
        let resolved = config.schema_path(file.path());
        assert_eq!(resolved.parent(), file.path().parent());
    }
}
