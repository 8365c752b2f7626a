#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` warehouse access for the collision pipeline.
//!
//! The pipeline runs in an in-memory working connection. The warehouse
//! database file is attached to it under [`WAREHOUSE_ALIAS`], and every
//! output table lives in a dataset schema inside that file. Output tables
//! are written through a [`sink::TableSink`], which replaces the prior
//! content of a table in a single statement.

pub mod dimension;
pub mod paths;
pub mod sink;

use std::path::Path;
use std::sync::LazyLock;

use duckdb::Connection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Alias the warehouse file is attached under.
pub const WAREHOUSE_ALIAS: &str = "warehouse";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Errors that can occur during warehouse operations.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A table, schema, or relation name is not a plain identifier.
    #[error("Invalid identifier: {name:?}")]
    InvalidIdentifier {
        /// The rejected name.
        name: String,
    },

    /// The date dimension has more than one row for a date.
    #[error("Date dimension has {count} rows for {date}")]
    DuplicateDimensionKey {
        /// The duplicated `full_date`.
        date: String,
        /// Number of rows with that date.
        count: u64,
    },

    /// A date range ends before it starts.
    #[error("Invalid date range: {end} is before {start}")]
    InvalidDateRange {
        /// First date.
        start: chrono::NaiveDate,
        /// Last date.
        end: chrono::NaiveDate,
    },

    /// A row count reported by the engine does not fit a `u64`.
    #[error("Invalid row count: {value}")]
    InvalidCount {
        /// The value as reported.
        value: String,
    },

    /// A file the warehouse needs does not exist.
    #[error("File not found: {}", path.display())]
    NotFound {
        /// Missing path.
        path: std::path::PathBuf,
    },
}

/// Where output tables are written.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WarehouseFormat {
    /// Tables in the attached `DuckDB` warehouse file.
    #[default]
    Duckdb,
    /// One Parquet file per table.
    Parquet,
}

/// Engine resource limits applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub threads: u32,
    /// `DuckDB` memory limit string, e.g. `"512MB"`.
    pub memory_limit: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            memory_limit: "512MB".to_string(),
        }
    }
}

/// Checks that `name` is a plain SQL identifier.
///
/// # Errors
///
/// Returns [`WarehouseError::InvalidIdentifier`] otherwise.
pub fn validate_identifier(name: &str) -> Result<&str, WarehouseError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(WarehouseError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// Checks a dot-separated name (`schema.table`, `catalog.schema.table`)
/// part by part.
///
/// # Errors
///
/// Returns [`WarehouseError::InvalidIdentifier`] if any part is invalid.
pub fn validate_qualified(name: &str) -> Result<&str, WarehouseError> {
    for part in name.split('.') {
        validate_identifier(part).map_err(|_| WarehouseError::InvalidIdentifier {
            name: name.to_string(),
        })?;
    }
    Ok(name)
}

/// Joins a qualifier and a table name after validating both.
///
/// # Errors
///
/// Returns [`WarehouseError::InvalidIdentifier`] if either is invalid.
pub fn qualify(qualifier: &str, table: &str) -> Result<String, WarehouseError> {
    validate_qualified(qualifier)?;
    validate_identifier(table)?;
    Ok(format!("{qualifier}.{table}"))
}

/// Escapes a value for use inside a single-quoted SQL string literal.
#[must_use]
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Converts a count reported by `DuckDB` (or a collection length) to `u64`.
///
/// # Errors
///
/// Returns [`WarehouseError::InvalidCount`] for a negative or oversized
/// value.
pub fn to_count<T>(value: T) -> Result<u64, WarehouseError>
where
    T: TryInto<u64> + Copy + std::fmt::Display,
{
    value.try_into().map_err(|_| WarehouseError::InvalidCount {
        value: value.to_string(),
    })
}

/// Opens an in-memory working connection with `settings` applied.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the connection cannot be created.
pub fn open_working(settings: &EngineSettings) -> Result<Connection, WarehouseError> {
    let conn = Connection::open_in_memory()?;
    apply_settings(&conn, settings)?;
    Ok(conn)
}

/// Opens (or creates) a warehouse file directly.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the file cannot be opened, for example
/// because another process holds its lock.
pub fn open(path: &Path, settings: &EngineSettings) -> Result<Connection, WarehouseError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    apply_settings(&conn, settings)?;
    Ok(conn)
}

fn apply_settings(conn: &Connection, settings: &EngineSettings) -> Result<(), WarehouseError> {
    conn.execute_batch(&format!(
        "SET threads = {};
         SET memory_limit = {};",
        settings.threads,
        sql_literal(&settings.memory_limit)
    ))?;
    Ok(())
}

/// Attaches the warehouse file at `path` to `conn` and ensures the
/// `dataset` schema exists in it.
///
/// Returns the qualifier output tables are created under
/// (`warehouse.<dataset>`).
///
/// # Errors
///
/// Returns [`WarehouseError`] if the dataset name is invalid or the file
/// cannot be attached.
pub fn attach(conn: &Connection, path: &Path, dataset: &str) -> Result<String, WarehouseError> {
    validate_identifier(dataset)?;
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let literal = sql_literal(&path.to_string_lossy());
    conn.execute_batch(&format!(
        "ATTACH {literal} AS {WAREHOUSE_ALIAS};
         CREATE SCHEMA IF NOT EXISTS {WAREHOUSE_ALIAS}.{dataset};"
    ))?;

    log::info!("Attached warehouse {} (dataset {dataset})", path.display());

    Ok(format!("{WAREHOUSE_ALIAS}.{dataset}"))
}

/// Flushes and detaches the warehouse so its file can be copied.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the checkpoint or detach fails.
pub fn detach(conn: &Connection) -> Result<(), WarehouseError> {
    conn.execute_batch(&format!(
        "CHECKPOINT {WAREHOUSE_ALIAS};
         DETACH {WAREHOUSE_ALIAS};"
    ))?;
    Ok(())
}

/// Counts the rows of a table or view.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the name is invalid or the query fails.
pub fn count_rows(conn: &Connection, relation: &str) -> Result<u64, WarehouseError> {
    validate_qualified(relation)?;
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {relation}"), [], |row| {
        row.get(0)
    })?;
    to_count(count)
}
