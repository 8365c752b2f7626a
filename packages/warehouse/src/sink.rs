//! Overwrite-mode table sinks.
//!
//! A sink materializes a relation (table or view) from the working
//! connection under an output table name, replacing whatever the table held
//! before. Nothing is appended and nothing is merged.

use std::path::PathBuf;

use duckdb::Connection;

use crate::{
    WarehouseError, count_rows, qualify, sql_literal, to_count, validate_identifier,
    validate_qualified,
};

/// Destination for output tables.
pub trait TableSink {
    /// Human-readable description used in log output.
    fn describe(&self) -> String;

    /// Replaces the content of `table` with every row of `relation`.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`] if a name is invalid or the write fails.
    /// A failed write leaves the previous content of `table` in place.
    fn overwrite(&self, conn: &Connection, table: &str, relation: &str)
    -> Result<u64, WarehouseError>;

    /// Files holding the written tables, for publishing.
    fn artifacts(&self, tables: &[&str]) -> Vec<PathBuf>;
}

/// Writes tables into a `DuckDB` schema visible to the working connection.
#[derive(Debug, Clone)]
pub struct DuckDbSink {
    qualifier: String,
    file: Option<PathBuf>,
}

impl DuckDbSink {
    /// Creates a sink writing under `qualifier` (`schema` or
    /// `catalog.schema`).
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::InvalidIdentifier`] if the qualifier is not
    /// a dotted sequence of plain identifiers.
    pub fn new(qualifier: impl Into<String>) -> Result<Self, WarehouseError> {
        let qualifier = qualifier.into();
        validate_qualified(&qualifier)?;
        Ok(Self {
            qualifier,
            file: None,
        })
    }

    /// Records the warehouse file backing this sink.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

impl TableSink for DuckDbSink {
    fn describe(&self) -> String {
        match &self.file {
            Some(file) => format!("{} in {}", self.qualifier, file.display()),
            None => self.qualifier.clone(),
        }
    }

    fn overwrite(
        &self,
        conn: &Connection,
        table: &str,
        relation: &str,
    ) -> Result<u64, WarehouseError> {
        let target = qualify(&self.qualifier, table)?;
        validate_qualified(relation)?;

        let sql = format!("CREATE OR REPLACE TABLE {target} AS SELECT * FROM {relation}");
        log::debug!("{sql}");
        conn.execute_batch(&sql)?;

        let rows = count_rows(conn, &target)?;
        log::info!("Wrote {rows} rows to {target}");
        Ok(rows)
    }

    fn artifacts(&self, _tables: &[&str]) -> Vec<PathBuf> {
        self.file.iter().cloned().collect()
    }
}

/// Writes each table to `<dir>/<table>.parquet`.
///
/// The file is first written under a temporary name and then renamed over
/// the target, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    dir: PathBuf,
}

impl ParquetSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Final path of `table`.
    #[must_use]
    pub fn file_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.parquet"))
    }
}

impl TableSink for ParquetSink {
    fn describe(&self) -> String {
        format!("Parquet files in {}", self.dir.display())
    }

    fn overwrite(
        &self,
        conn: &Connection,
        table: &str,
        relation: &str,
    ) -> Result<u64, WarehouseError> {
        validate_identifier(table)?;
        validate_qualified(relation)?;
        crate::paths::ensure_dir(&self.dir)?;

        let target = self.file_path(table);
        let partial = self.dir.join(format!("{table}.parquet.partial"));
        if partial.exists() {
            std::fs::remove_file(&partial)?;
        }

        let sql = format!(
            "COPY (SELECT * FROM {relation}) TO {} (FORMAT PARQUET)",
            sql_literal(&partial.to_string_lossy())
        );
        log::debug!("{sql}");
        conn.execute_batch(&sql)?;
        std::fs::rename(&partial, &target)?;

        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM read_parquet({})",
                sql_literal(&target.to_string_lossy())
            ),
            [],
            |row| row.get(0),
        )?;
        let rows = to_count(count)?;

        log::info!("Wrote {rows} rows to {}", target.display());
        Ok(rows)
    }

    fn artifacts(&self, tables: &[&str]) -> Vec<PathBuf> {
        tables.iter().map(|t| self.file_path(t)).collect()
    }
}
