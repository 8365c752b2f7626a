//! Exploratory inspection of the cleaned records: a per-column profile and
//! the distinct values of selected columns dumped to text files.

use std::path::{Path, PathBuf};

use collision_metrics_collision_models::CollisionField;
use collision_metrics_source::CollisionSource;
use collision_metrics_warehouse::{paths, to_count, validate_qualified};
use duckdb::Connection;
use serde::Serialize;

use crate::PipelineError;
use crate::cleaner::CLEANED_VIEW;

/// Columns dumped when none are requested.
pub const DEFAULT_COLUMNS: &[&str] = &[
    "contributing_factor_vehicle_1",
    "contributing_factor_vehicle_4",
    "vehicle_type_code_1",
    "vehicle_type_code_5",
];

/// Type and value statistics of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: String,
    pub null_count: u64,
    pub distinct_count: u64,
}

/// Result of an exploration run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploreReport {
    pub raw_rows: u64,
    pub cleaned_rows: u64,
    pub profile: Vec<ColumnProfile>,
    /// One file per dumped column.
    pub files: Vec<PathBuf>,
}

/// Profiles every column of `relation`.
///
/// # Errors
///
/// Returns [`PipelineError`] if the relation name is invalid or a query
/// fails.
pub fn column_profile(
    conn: &Connection,
    relation: &str,
) -> Result<Vec<ColumnProfile>, PipelineError> {
    validate_qualified(relation)?;

    let columns: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!("DESCRIBE {relation}"))?;
        let mut rows = stmt.query([])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push((row.get(0)?, row.get(1)?));
        }
        columns
    };

    let mut profile = Vec::with_capacity(columns.len());
    for (name, data_type) in columns {
        let (nulls, distinct): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*) - COUNT(\"{name}\"), COUNT(DISTINCT \"{name}\") FROM {relation}"
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        profile.push(ColumnProfile {
            name,
            data_type,
            null_count: to_count(nulls)?,
            distinct_count: to_count(distinct)?,
        });
    }

    Ok(profile)
}

/// Checks that `column` is a column of the cleaned records.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownColumn`] otherwise.
pub fn validate_column(column: &str) -> Result<(), PipelineError> {
    if CollisionField::from_column(column).is_some_and(|f| !f.dropped_by_cleaner()) {
        Ok(())
    } else {
        Err(PipelineError::UnknownColumn {
            name: column.to_string(),
        })
    }
}

/// Sorted distinct values of `column` in [`CLEANED_VIEW`], null first.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownColumn`] for a column the cleaner does
/// not keep, or any query error.
pub fn distinct_values(
    conn: &Connection,
    column: &str,
) -> Result<Vec<Option<String>>, PipelineError> {
    validate_column(column)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {column}::TEXT AS value FROM {CLEANED_VIEW} ORDER BY value ASC NULLS FIRST"
    ))?;
    let mut rows = stmt.query([])?;

    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(row.get(0)?);
    }
    Ok(values)
}

/// Writes the distinct values of each column to `<out_dir>/<column>.txt`,
/// one value per line, null as an empty line.
///
/// # Errors
///
/// Returns [`PipelineError`] if a column is unknown, a query fails, or a
/// file cannot be written.
pub fn write_distinct_values(
    conn: &Connection,
    columns: &[String],
    out_dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    for column in columns {
        validate_column(column)?;
    }
    paths::ensure_dir(out_dir)?;

    let mut files = Vec::with_capacity(columns.len());
    for column in columns {
        let values = distinct_values(conn, column)?;
        let mut content = values
            .iter()
            .map(|v| v.as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        content.push('\n');

        let path = out_dir.join(format!("{column}.txt"));
        std::fs::write(&path, content)?;
        log::info!("Wrote {} distinct values to {}", values.len(), path.display());
        files.push(path);
    }

    Ok(files)
}

/// Loads `source`, cleans it, logs a column profile, and dumps the
/// distinct values of `columns` into `out_dir`.
///
/// # Errors
///
/// Returns [`PipelineError`] if loading, querying, or writing fails.
pub fn explore(
    conn: &Connection,
    source: &dyn CollisionSource,
    columns: &[String],
    out_dir: &Path,
) -> Result<ExploreReport, PipelineError> {
    for column in columns {
        validate_column(column)?;
    }

    let raw_rows = source.load(conn)?;
    crate::cleaner::create_view(conn)?;
    let cleaned_rows = collision_metrics_warehouse::count_rows(conn, CLEANED_VIEW)?;
    log::info!("{cleaned_rows} of {raw_rows} rows have a well-formed crash date");

    let profile = column_profile(conn, CLEANED_VIEW)?;
    for column in &profile {
        log::info!(
            "  {:<32} {:<8} nulls={:<8} distinct={}",
            column.name,
            column.data_type,
            column.null_count,
            column.distinct_count
        );
    }

    let files = write_distinct_values(conn, columns, out_dir)?;

    Ok(ExploreReport {
        raw_rows,
        cleaned_rows,
        profile,
        files,
    })
}

#[cfg(test)]
mod tests {
    use collision_metrics_collision_models::RawCollision;
    use collision_metrics_source::RecordsSource;

    use super::*;

    fn records() -> Vec<RawCollision> {
        let mut first = RawCollision::new("03/01/2024", "3:15");
        first.contributing_factors[0] = Some("Unsafe Speed".to_string());
        first.vehicle_types[0] = Some("Sedan".to_string());
        let mut second = RawCollision::new("03/02/2024", "4:15");
        second.contributing_factors[0] = Some("Glare".to_string());
        second.vehicle_types[0] = Some("Sedan".to_string());
        let third = RawCollision::new("03/03/2024", "5:15");
        let mut rejected = RawCollision::new("bad-date", "6:15");
        rejected.contributing_factors[0] = Some("Rejected".to_string());
        vec![first, second, third, rejected]
    }

    #[test]
    fn explore_profiles_and_dumps_distinct_values() {
        let tmp = std::env::temp_dir().join("collision_pipeline_test_explore");
        let _ = std::fs::remove_dir_all(&tmp);

        let conn = Connection::open_in_memory().unwrap();
        let columns = vec![
            "contributing_factor_vehicle_1".to_string(),
            "vehicle_type_code_1".to_string(),
        ];
        let report = explore(&conn, &RecordsSource::new(records()), &columns, &tmp).unwrap();

        assert_eq!(report.raw_rows, 4);
        assert_eq!(report.cleaned_rows, 3);
        assert_eq!(report.files.len(), 2);

        let factors = std::fs::read_to_string(tmp.join("contributing_factor_vehicle_1.txt")).unwrap();
        assert_eq!(factors, "\nGlare\nUnsafe Speed\n");
        let vehicles = std::fs::read_to_string(tmp.join("vehicle_type_code_1.txt")).unwrap();
        assert_eq!(vehicles, "\nSedan\n");

        let factor_profile = report
            .profile
            .iter()
            .find(|c| c.name == "contributing_factor_vehicle_1")
            .unwrap();
        assert_eq!(factor_profile.data_type, "VARCHAR");
        assert_eq!(factor_profile.null_count, 1);
        assert_eq!(factor_profile.distinct_count, 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn dropped_or_unknown_columns_are_rejected() {
        assert!(validate_column("borough").is_ok());
        assert!(matches!(
            validate_column("latitude"),
            Err(PipelineError::UnknownColumn { .. })
        ));
        assert!(matches!(
            validate_column("precinct"),
            Err(PipelineError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn default_columns_are_kept_by_the_cleaner() {
        for column in DEFAULT_COLUMNS {
            assert!(validate_column(column).is_ok(), "{column}");
        }
    }
}
