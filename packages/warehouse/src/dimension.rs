//! Date dimension: loading it into the working connection and seeding it
//! for environments that lack one.

use std::path::PathBuf;

use chrono::NaiveDate;
use collision_metrics_collision_models::Season;
use duckdb::Connection;

use crate::{WarehouseError, count_rows, sql_literal, to_count, validate_qualified};

/// Working-connection table the dimension is loaded into.
pub const DIMENSION_TABLE: &str = "dim_date";

/// Where the date dimension is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionSource {
    /// A table with `full_date` and `season` columns, by qualified name.
    Table(String),
    /// A CSV file with `full_date` and `season` headers.
    Csv(PathBuf),
}

impl std::fmt::Display for DimensionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table(name) => f.write_str(name),
            Self::Csv(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Loads the dimension into [`DIMENSION_TABLE`] and checks that every
/// `full_date` appears once.
///
/// Returns the number of dimension rows.
///
/// # Errors
///
/// Returns [`WarehouseError::DuplicateDimensionKey`] if a date repeats,
/// [`WarehouseError::NotFound`] for a missing CSV, or any `DuckDB` error
/// (including a missing table).
pub fn load_date_dimension(
    conn: &Connection,
    source: &DimensionSource,
) -> Result<u64, WarehouseError> {
    let from = match source {
        DimensionSource::Table(name) => validate_qualified(name)?.to_string(),
        DimensionSource::Csv(path) => {
            if !path.is_file() {
                return Err(WarehouseError::NotFound { path: path.clone() });
            }
            format!(
                "read_csv({}, header = true, all_varchar = true)",
                sql_literal(&path.to_string_lossy())
            )
        }
    };

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {DIMENSION_TABLE} AS
         SELECT CAST(full_date AS DATE) AS full_date, CAST(season AS VARCHAR) AS season
         FROM {from}"
    ))?;

    let duplicate: Option<(String, i64)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT full_date::TEXT, COUNT(*) AS n
             FROM {DIMENSION_TABLE}
             GROUP BY full_date
             HAVING COUNT(*) > 1
             ORDER BY full_date
             LIMIT 1"
        ))?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Some((row.get(0)?, row.get(1)?)),
            None => None,
        }
    };

    if let Some((date, count)) = duplicate {
        return Err(WarehouseError::DuplicateDimensionKey {
            date,
            count: to_count(count)?,
        });
    }

    let rows = count_rows(conn, DIMENSION_TABLE)?;
    log::info!("Loaded {rows} date dimension rows from {source}");
    Ok(rows)
}

/// SQL `CASE` expression mapping the month of `column` to its season,
/// one arm per season in [`Season::ALL`] order.
fn season_case(column: &str) -> String {
    let arms: String = Season::ALL
        .iter()
        .map(|&season| {
            let months = (1..=12)
                .filter(|&month| Season::for_month(month) == Some(season))
                .map(|month| month.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!(" WHEN month({column}) IN ({months}) THEN '{season}'")
        })
        .collect();
    format!("CASE{arms} END")
}

/// (Re)creates `table` with one row per day from `start` to `end`
/// inclusive, each tagged with its meteorological season.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`WarehouseError::InvalidDateRange`] if `end` is before `start`,
/// [`WarehouseError::InvalidIdentifier`] for an unsafe table name, or any
/// `DuckDB` error.
pub fn seed_date_dimension(
    conn: &Connection,
    table: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<u64, WarehouseError> {
    if end < start {
        return Err(WarehouseError::InvalidDateRange { start, end });
    }
    validate_qualified(table)?;

    let sql = format!(
        "CREATE OR REPLACE TABLE {table} AS
         SELECT CAST(d AS DATE) AS full_date, {} AS season
         FROM generate_series(DATE '{start}', DATE '{end}', INTERVAL 1 DAY) AS s(d)
         ORDER BY full_date",
        season_case("d")
    );
    log::debug!("{sql}");
    conn.execute_batch(&sql)?;

    let rows = count_rows(conn, table)?;
    log::info!("Seeded {rows} date dimension rows into {table} ({start} to {end})");
    Ok(rows)
}
