//! TOML configuration for the `collision_metrics` binary.
//!
//! Every key is optional. The file is looked up at `--config`, then
//! `COLLISION_METRICS_CONFIG`, then `collision_metrics.toml` in the working
//! directory. Only the last of those may be absent.

use std::path::{Path, PathBuf};

use collision_metrics_pipeline::PipelineOptions;
use collision_metrics_pipeline_models::{OutputTable, TableNames, TimeFieldPolicy};
use collision_metrics_source::SchemaMode;
use collision_metrics_warehouse::dimension::{DIMENSION_TABLE, DimensionSource};
use collision_metrics_warehouse::{
    EngineSettings, WarehouseError, WarehouseFormat, paths, qualify, validate_identifier,
    validate_qualified,
};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "COLLISION_METRICS_CONFIG";

/// Config file used when neither `--config` nor [`CONFIG_ENV`] is given.
pub const DEFAULT_CONFIG_FILE: &str = "collision_metrics.toml";

/// Errors that can occur while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A dataset, table, or dimension name is not a plain identifier.
    #[error(transparent)]
    Identifier(#[from] WarehouseError),

    /// Both a dimension table and a dimension CSV are configured.
    #[error("[dimension] sets both `table` and `csv`")]
    ConflictingDimension,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Bucket holding the source export. Local-only when unset.
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    pub local_dir: PathBuf,
    pub schema: SchemaMode,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: "collisions/source".to_string(),
            region: "auto".to_string(),
            local_dir: paths::source_dir(),
            schema: SchemaMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    pub dataset: String,
    pub format: WarehouseFormat,
    pub parquet_dir: PathBuf,
    pub threads: u32,
    pub memory_limit: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            path: paths::warehouse_db_path(),
            dataset: "collisions".to_string(),
            format: WarehouseFormat::default(),
            parquet_dir: paths::exports_dir(),
            threads: engine.threads,
            memory_limit: engine.memory_limit,
        }
    }
}

impl WarehouseConfig {
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            threads: self.threads,
            memory_limit: self.memory_limit.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DimensionConfig {
    /// Table name, plain (resolved in the dataset) or qualified.
    pub table: Option<String>,
    pub csv: Option<PathBuf>,
}

impl DimensionConfig {
    /// Name of the dimension table, before qualification.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(DIMENSION_TABLE)
    }

    /// Resolves where the dimension is read from. A plain table name is
    /// looked up under `qualifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingDimension`] if both a table and a
    /// CSV are set, or [`ConfigError::Identifier`] for an unsafe name.
    pub fn source(&self, qualifier: &str) -> Result<DimensionSource, ConfigError> {
        match (&self.table, &self.csv) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingDimension),
            (None, Some(csv)) => Ok(DimensionSource::Csv(csv.clone())),
            (_, None) => Ok(DimensionSource::Table(self.qualified_table(qualifier)?)),
        }
    }

    /// The dimension table qualified under `qualifier` unless it already
    /// names its schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identifier`] for an unsafe name.
    pub fn qualified_table(&self, qualifier: &str) -> Result<String, ConfigError> {
        let table = self.table_name();
        if table.contains('.') {
            Ok(validate_qualified(table)?.to_string())
        } else {
            Ok(qualify(qualifier, table)?)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub time_policy: TimeFieldPolicy,
    pub persist_season_metrics: bool,
}

/// Complete `collision_metrics` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub warehouse: WarehouseConfig,
    pub dimension: DimensionConfig,
    pub tables: TableNames,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document does not parse or names an
    /// unsafe identifier.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config file chosen by [`config_path`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if an explicitly named file cannot be
    /// read, or any parse or validation error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = std::env::var(CONFIG_ENV).ok();
        let (path, required) = config_path(explicit, env.as_deref());

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                log::info!("Loading config from {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No {} found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Rejects dataset and table names that are not plain identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identifier`] for the first unsafe name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.warehouse.dataset)?;
        for table in OutputTable::ALL {
            validate_identifier(self.tables.name(*table))?;
        }
        if let Some(table) = &self.dimension.table {
            validate_qualified(table)?;
        }
        if self.dimension.table.is_some() && self.dimension.csv.is_some() {
            return Err(ConfigError::ConflictingDimension);
        }
        Ok(())
    }

    /// Pipeline options from the `[tables]` and `[pipeline]` sections.
    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            time_policy: self.pipeline.time_policy,
            table_names: self.tables.clone(),
            persist_season_metrics: self.pipeline.persist_season_metrics,
        }
    }

    /// Applies command-line overrides.
    pub fn apply_overrides(
        &mut self,
        time_policy: Option<TimeFieldPolicy>,
        schema: Option<SchemaMode>,
    ) {
        if let Some(policy) = time_policy {
            self.pipeline.time_policy = policy;
        }
        if let Some(schema) = schema {
            self.source.schema = schema;
        }
    }
}

/// Picks the config file and whether it must exist.
#[must_use]
pub fn config_path(explicit: Option<&Path>, env: Option<&str>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    match env {
        Some(path) if !path.is_empty() => (PathBuf::from(path), true),
        _ => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    }
}
