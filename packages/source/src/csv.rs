//! Raw CSV export source.
//!
//! `DuckDB` reads the file directly with `read_csv`. The header is checked
//! against the schema contract before any row is loaded.

use std::path::{Path, PathBuf};

use collision_metrics_collision_models::CollisionField;
use collision_metrics_warehouse::sql_literal;
use duckdb::Connection;

use crate::{CollisionSource, RAW_TABLE, SchemaMode, SourceError};

/// A collision CSV export on local disk.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    mode: SchemaMode,
}

impl CsvFileSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mode: SchemaMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// Returns the header names of the file as `DuckDB` sees them.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read.
    pub fn headers(&self, conn: &Connection) -> Result<Vec<String>, SourceError> {
        let sql = format!(
            "DESCRIBE SELECT * FROM read_csv({}, header = true, all_varchar = true)",
            self.literal_path()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut headers = Vec::new();
        while let Some(row) = rows.next()? {
            headers.push(row.get::<_, String>(0)?);
        }

        Ok(headers)
    }

    fn literal_path(&self) -> String {
        sql_literal(&self.path.to_string_lossy())
    }

    /// The `read_csv` call for this file and schema mode.
    fn reader(&self) -> String {
        match self.mode {
            SchemaMode::Explicit => format!(
                "read_csv({}, header = true, all_varchar = true)",
                self.literal_path()
            ),
            SchemaMode::Inferred => {
                let text_columns = CollisionField::ALL
                    .iter()
                    .filter(|f| f.always_text())
                    .map(|f| format!("{}: 'VARCHAR'", sql_literal(f.raw_name())))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "read_csv({}, header = true, types = {{{text_columns}}})",
                    self.literal_path()
                )
            }
        }
    }

    /// Projection renaming every raw header and converting it to its
    /// contract type.
    fn projection(&self) -> String {
        let cast = match self.mode {
            SchemaMode::Explicit => "CAST",
            SchemaMode::Inferred => "TRY_CAST",
        };

        CollisionField::ALL
            .iter()
            .map(|f| {
                format!(
                    "{cast}(\"{}\" AS {}) AS {}",
                    f.raw_name(),
                    f.field_type(),
                    f.column()
                )
            })
            .collect::<Vec<_>>()
            .join(",\n    ")
    }

    #[must_use]
    fn load_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE TABLE {RAW_TABLE} AS\nSELECT\n    {}\nFROM {}",
            self.projection(),
            self.reader()
        )
    }
}

impl CollisionSource for CsvFileSource {
    fn describe(&self) -> String {
        format!("{} ({} schema)", self.path.display(), self.mode)
    }

    fn load(&self, conn: &Connection) -> Result<u64, SourceError> {
        if !self.path.is_file() {
            return Err(SourceError::NotFound {
                path: self.path.clone(),
            });
        }

        let headers = self.headers(conn)?;
        crate::validate_headers(&headers)?;

        let sql = self.load_sql();
        log::debug!("Loading source:\n{sql}");
        conn.execute_batch(&sql)?;

        let rows = crate::count_raw_rows(conn)?;
        log::info!("Loaded {rows} rows from {}", self.describe());

        Ok(rows)
    }
}
