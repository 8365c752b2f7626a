#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collision record sources.
//!
//! A [`CollisionSource`] loads raw collision records into the
//! [`RAW_TABLE`] table of a `DuckDB` connection, renaming the raw export
//! headers to their canonical column names and converting every field to
//! its contract type. Two sources are provided: [`CsvFileSource`] for the
//! raw CSV export and [`RecordsSource`] for records built in memory.

pub mod csv;
pub mod records;

use std::collections::BTreeSet;
use std::path::PathBuf;

use collision_metrics_collision_models::CollisionField;
use collision_metrics_warehouse::{WarehouseError, count_rows};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use csv::CsvFileSource;
pub use records::RecordsSource;

/// Table every source loads into.
pub const RAW_TABLE: &str = "raw_collisions";

/// Errors that can occur while loading a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// `DuckDB` error, including fatal casts in explicit schema mode.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row counting or identifier validation failed.
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// The source file does not exist.
    #[error("Source file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The header does not match the schema contract.
    #[error("Schema mismatch: missing headers {missing:?}, unexpected headers {unexpected:?}")]
    SchemaMismatch {
        /// Contract headers absent from the source.
        missing: Vec<String>,
        /// Source headers not in the contract.
        unexpected: Vec<String>,
    },
}

/// How field types are determined when reading a CSV export.
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
pub enum SchemaMode {
    /// Every field is read as text and cast to its contract type. A value
    /// that does not cast is fatal.
    #[default]
    Explicit,
    /// `DuckDB` infers column types (except date and time, which stay text)
    /// and values are converted with lenient casts.
    Inferred,
}

/// A source of raw collision records.
pub trait CollisionSource {
    /// Human-readable description used in log output.
    fn describe(&self) -> String;

    /// Creates (or replaces) [`RAW_TABLE`] on `conn` and fills it.
    ///
    /// Returns the number of rows loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the records cannot be read or do not
    /// conform to the schema contract.
    fn load(&self, conn: &Connection) -> Result<u64, SourceError>;
}

/// Checks that `headers` are exactly the contract's raw headers.
///
/// Order is not significant.
///
/// # Errors
///
/// Returns [`SourceError::SchemaMismatch`] listing missing and unexpected
/// headers.
pub fn validate_headers<S: AsRef<str>>(headers: &[S]) -> Result<(), SourceError> {
    let mut found = BTreeSet::new();
    let mut unexpected = Vec::new();
    for header in headers.iter().map(AsRef::as_ref) {
        match CollisionField::from_raw_name(header) {
            Some(field) if found.insert(field) => {}
            _ => unexpected.push(header.to_string()),
        }
    }

    let missing: Vec<String> = CollisionField::ALL
        .iter()
        .filter(|f| !found.contains(*f))
        .map(|f| f.raw_name().to_string())
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }

    Err(SourceError::SchemaMismatch {
        missing,
        unexpected,
    })
}

/// Column definitions of [`RAW_TABLE`] in contract order.
#[must_use]
pub fn raw_table_columns() -> String {
    CollisionField::ALL
        .iter()
        .map(|f| format!("{} {}", f.column(), f.field_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counts the rows currently in [`RAW_TABLE`].
///
/// # Errors
///
/// Returns [`SourceError`] if the query fails.
pub fn count_raw_rows(conn: &Connection) -> Result<u64, SourceError> {
    Ok(count_rows(conn, RAW_TABLE)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract_headers() -> Vec<&'static str> {
        CollisionField::ALL.iter().map(|f| f.raw_name()).collect()
    }

    #[test]
    fn contract_headers_validate() {
        assert!(validate_headers(&contract_headers()).is_ok());
    }

    #[test]
    fn header_order_is_not_significant() {
        let mut headers = contract_headers();
        headers.reverse();
        assert!(validate_headers(&headers).is_ok());
    }

    #[test]
    fn missing_and_unexpected_headers_are_reported() {
        let mut headers = contract_headers();
        headers.retain(|h| *h != "BOROUGH");
        headers.push("PRECINCT");

        match validate_headers(&headers) {
            Err(SourceError::SchemaMismatch {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, vec!["BOROUGH".to_string()]);
                assert_eq!(unexpected, vec!["PRECINCT".to_string()]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_header_is_a_mismatch() {
        let mut headers = contract_headers();
        headers.push("BOROUGH");
        assert!(matches!(
            validate_headers(&headers),
            Err(SourceError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn raw_table_columns_use_contract_types() {
        let columns = raw_table_columns();
        assert!(columns.starts_with("crash_date VARCHAR, crash_time VARCHAR"));
        assert!(columns.contains("latitude DOUBLE"));
        assert!(columns.contains("collision_id BIGINT"));
    }

    #[test]
    fn schema_mode_parses() {
        assert_eq!("inferred".parse::<SchemaMode>().unwrap(), SchemaMode::Inferred);
        assert_eq!(SchemaMode::default(), SchemaMode::Explicit);
    }
}
