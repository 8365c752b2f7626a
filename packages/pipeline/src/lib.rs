#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collision metrics pipeline.
//!
//! Each stage is a view over the previous one inside a single working
//! `DuckDB` connection:
//!
//! ```text
//! raw_collisions -> cleaned_collisions -> pruned_collisions -> collision_facts
//!                          \-> vehicle_type_counts           |-> crashes_per_hour
//!                                                            |-> crashes_per_dayofweek
//!                                                            |-> metrics_by_contributing_factor
//!                                                            \-> metrics_by_season (+ dim_date)
//! ```
//!
//! Nothing is evaluated until a sink writes a view out. [`run`] drives the
//! stages in order, writes every output table through a
//! [`TableSink`], and checks the row-count invariants between stages.

pub mod cleaner;
pub mod enrich;
pub mod explore;
pub mod facts;
pub mod metrics;
pub mod progress;
pub mod time_field;
pub mod vehicle_types;

use std::sync::Arc;

use chrono::Utc;
use collision_metrics_pipeline_models::{
    OutputTable, PipelineReport, TableNames, TableWrite, TimeFieldPolicy,
};
use collision_metrics_source::{CollisionSource, SourceError};
use collision_metrics_warehouse::dimension::{DimensionSource, load_date_dimension};
use collision_metrics_warehouse::sink::TableSink;
use collision_metrics_warehouse::{WarehouseError, count_rows, validate_identifier};
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::progress::{ProgressCallback, Stage, enter};

/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Loading the source failed.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Writing output or reading the dimension failed.
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Two stages disagree on a row count.
    #[error("Invariant violated ({invariant}): expected {expected}, got {actual}")]
    InvariantViolation {
        /// Which invariant.
        invariant: &'static str,
        /// Rows the upstream stage produced.
        expected: u64,
        /// Rows the downstream stage accounts for.
        actual: u64,
    },

    /// A column that is not part of the cleaned records.
    #[error("Unknown column: {name}")]
    UnknownColumn {
        /// The requested column.
        name: String,
    },
}

/// Per-run pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PipelineOptions {
    pub time_policy: TimeFieldPolicy,
    pub table_names: TableNames,
    /// Also write the season rollup as an output table.
    pub persist_season_metrics: bool,
}

/// Fails with [`PipelineError::InvariantViolation`] unless the counts match.
///
/// # Errors
///
/// Returns [`PipelineError::InvariantViolation`] when `expected != actual`.
pub fn check_invariant(
    invariant: &'static str,
    expected: u64,
    actual: u64,
) -> Result<(), PipelineError> {
    if expected == actual {
        log::debug!("Invariant {invariant} holds ({actual} rows)");
        Ok(())
    } else {
        Err(PipelineError::InvariantViolation {
            invariant,
            expected,
            actual,
        })
    }
}

/// Writes `relation` as `table` through `sink` and records the write.
fn write_table(
    conn: &Connection,
    sink: &dyn TableSink,
    names: &TableNames,
    table: OutputTable,
    relation: &str,
    writes: &mut Vec<TableWrite>,
) -> Result<u64, PipelineError> {
    let name = names.name(table);
    let rows = sink.overwrite(conn, name, relation)?;
    writes.push(TableWrite {
        table,
        name: name.to_string(),
        rows,
    });
    Ok(rows)
}

/// Runs the full pipeline.
///
/// Loads `source` into the working connection, then cleans, aggregates,
/// and enriches it, writing each output table through `sink` as soon as it
/// is defined. A failure stops the run; tables already written stay
/// written.
///
/// # Errors
///
/// Returns [`PipelineError`] if a table name is invalid, the source cannot
/// be loaded, the dimension cannot be read, a sink write fails, or a
/// row-count invariant does not hold.
pub fn run(
    conn: &Connection,
    source: &dyn CollisionSource,
    dimension: &DimensionSource,
    sink: &dyn TableSink,
    options: &PipelineOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineReport, PipelineError> {
    let started_at = Utc::now();
    let names = &options.table_names;
    for table in OutputTable::ALL {
        validate_identifier(names.name(*table))?;
    }

    log::info!(
        "Running pipeline from {} into {} (time policy: {})",
        source.describe(),
        sink.describe(),
        options.time_policy
    );
    progress.set_total(Stage::count());
    let mut tables = Vec::with_capacity(OutputTable::ALL.len());

    enter(progress, Stage::Load);
    let raw_rows = source.load(conn)?;

    enter(progress, Stage::Clean);
    cleaner::create_view(conn)?;
    let cleaned_rows = count_rows(conn, cleaner::CLEANED_VIEW)?;
    let rejected_rows = raw_rows.saturating_sub(cleaned_rows);
    log::info!("Kept {cleaned_rows} of {raw_rows} rows ({rejected_rows} with a malformed crash date)");

    enter(progress, Stage::VehicleTypes);
    vehicle_types::create_views(conn)?;
    check_invariant(
        "vehicle type counts",
        cleaned_rows,
        vehicle_types::total_count(conn)?,
    )?;
    write_table(
        conn,
        sink,
        names,
        OutputTable::VehicleTypes,
        vehicle_types::COUNTS_VIEW,
        &mut tables,
    )?;

    enter(progress, Stage::Facts);
    facts::create_view(conn)?;
    let fact_rows = write_table(
        conn,
        sink,
        names,
        OutputTable::Facts,
        facts::FACTS_VIEW,
        &mut tables,
    )?;
    check_invariant("fact rows", cleaned_rows, fact_rows)?;

    enter(progress, Stage::Hourly);
    time_field::create_view(conn, options.time_policy)?;
    let hourly = time_field::verified_counts(conn, options.time_policy)?;
    let malformed_time_rows = hourly.malformed;
    if malformed_time_rows > 0 {
        log::warn!(
            "{malformed_time_rows} rows have no parseable crash hour ({})",
            options.time_policy
        );
    }
    let labelled = match options.time_policy {
        TimeFieldPolicy::Drop => fact_rows.saturating_sub(malformed_time_rows),
        TimeFieldPolicy::Sentinel => fact_rows,
    };
    let hourly_total = hourly.total();
    check_invariant("hourly total", labelled, hourly_total)?;
    write_table(
        conn,
        sink,
        names,
        OutputTable::Hourly,
        time_field::HOURLY_VIEW,
        &mut tables,
    )?;

    enter(progress, Stage::DayOfWeek);
    metrics::create_views(conn)?;
    let day_of_week_counts = metrics::read_day_of_week(conn)?;
    write_table(
        conn,
        sink,
        names,
        OutputTable::DayOfWeek,
        metrics::DAY_OF_WEEK_VIEW,
        &mut tables,
    )?;

    enter(progress, Stage::ContributingFactors);
    write_table(
        conn,
        sink,
        names,
        OutputTable::ContributingFactors,
        metrics::CONTRIBUTING_FACTORS_VIEW,
        &mut tables,
    )?;

    enter(progress, Stage::Season);
    load_date_dimension(conn, dimension)?;
    enrich::create_view(conn)?;
    let season_metrics = enrich::read_season_metrics(conn)?;
    for row in &season_metrics {
        log::info!(
            "  {:<8} crashes={:<8} injured={:<8} killed={}",
            row.season.as_deref().unwrap_or("-"),
            row.crashes,
            row.persons_injured.map_or_else(|| "-".to_string(), |v| v.to_string()),
            row.persons_killed.map_or_else(|| "-".to_string(), |v| v.to_string()),
        );
    }
    if options.persist_season_metrics {
        write_table(
            conn,
            sink,
            names,
            OutputTable::Season,
            enrich::SEASON_VIEW,
            &mut tables,
        )?;
    }

    progress.finish(format!("Wrote {} tables", tables.len()));

    Ok(PipelineReport {
        started_at,
        time_policy: options.time_policy,
        raw_rows,
        cleaned_rows,
        rejected_rows,
        malformed_time_rows,
        hourly_total,
        hourly_counts: hourly.counts,
        day_of_week_counts,
        tables,
        season_metrics,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use collision_metrics_collision_models::RawCollision;
    use collision_metrics_pipeline_models::{DayOfWeekCount, HourlyCount};
    use collision_metrics_source::RecordsSource;
    use collision_metrics_warehouse::dimension::seed_date_dimension;
    use collision_metrics_warehouse::sink::{DuckDbSink, ParquetSink};

    use super::*;
    use crate::progress::null_progress;

    fn example_records() -> Vec<RawCollision> {
        let mut kept = RawCollision::new("03/01/2024", "3:15");
        kept.contributing_factors[0] = Some("Unsafe Speed".to_string());
        kept.persons_injured = Some(1);
        kept.persons_killed = Some(0);
        kept.vehicle_types[0] = Some("Sedan".to_string());
        vec![kept, RawCollision::new("bad-date", "9:00")]
    }

    fn warehouse_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE SCHEMA wh").unwrap();
        seed_date_dimension(
            &conn,
            "wh.dim_date",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap();
        conn
    }

    fn dimension() -> DimensionSource {
        DimensionSource::Table("wh.dim_date".to_string())
    }

    fn run_with(
        conn: &Connection,
        records: Vec<RawCollision>,
        options: &PipelineOptions,
    ) -> Result<PipelineReport, PipelineError> {
        run(
            conn,
            &RecordsSource::new(records),
            &dimension(),
            &DuckDbSink::new("wh").unwrap(),
            options,
            &null_progress(),
        )
    }

    fn rows_as_text(conn: &Connection, sql: &str) -> Vec<Vec<Option<String>>> {
        let mut stmt = conn.prepare(sql).unwrap();
        let mut rows = stmt.query([]).unwrap();
        let column_count = rows.as_ref().unwrap().column_count();
        let mut out = Vec::new();
        while let Some(row) = rows.next().unwrap() {
            out.push((0..column_count).map(|i| row.get(i).unwrap()).collect());
        }
        out
    }

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn end_to_end_example() {
        let conn = warehouse_conn();
        let report = run_with(&conn, example_records(), &PipelineOptions::default()).unwrap();

        assert_eq!(report.raw_rows, 2);
        assert_eq!(report.cleaned_rows, 1);
        assert_eq!(report.rejected_rows, 1);
        assert_eq!(report.rows_written(OutputTable::Facts), Some(1));
        assert_eq!(report.rows_written(OutputTable::Season), None);

        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT crash_date::TEXT, crash_time FROM wh.vehicle_collisions"
            ),
            vec![vec![s("2024-03-01"), s("3:15")]]
        );

        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT hour_of_day, count::TEXT FROM wh.crashes_per_hour"
            ),
            vec![vec![s("03"), s("1")]]
        );

        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT contributing_factor_vehicle_1, contributing_factor_vehicle_2,
                        count::TEXT, persons_injured::TEXT, persons_injured_avg::TEXT,
                        persons_killed::TEXT, persons_killed_avg::TEXT
                 FROM wh.metrics_by_contributing_factor"
            ),
            vec![vec![
                s("Unsafe Speed"),
                None,
                s("1"),
                s("1"),
                s("1.0"),
                s("0"),
                s("0.0"),
            ]]
        );

        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT vehicle_type_code_1, count::TEXT FROM wh.unused_data"
            ),
            vec![vec![s("Sedan"), s("1")]]
        );

        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT day_of_week, count::TEXT FROM wh.crashes_per_dayofweek"
            ),
            vec![vec![s("Fri"), s("1")]]
        );
        assert_eq!(
            report.hourly_counts,
            vec![HourlyCount {
                hour_of_day: "03".to_string(),
                count: 1
            }]
        );
        assert_eq!(
            report.day_of_week_counts,
            vec![DayOfWeekCount {
                day_of_week: Some("Fri".to_string()),
                count: 1
            }]
        );

        assert_eq!(report.season_metrics.len(), 1);
        assert_eq!(report.season_metrics[0].season.as_deref(), Some("Spring"));
        assert_eq!(report.season_metrics[0].crashes, 1);
    }

    fn mixed_records() -> Vec<RawCollision> {
        let rows = [
            ("01/05/2024", "3:15", Some("Glare"), Some(1)),
            ("01/05/2024", "noon", Some("Glare"), None),
            ("07/20/2024", "14:05", None, Some(2)),
            ("02/30/2024", "", Some("Unsafe Speed"), Some(0)),
            ("2024-07-20", "8:00", Some("Glare"), Some(4)),
        ];
        rows.iter()
            .map(|(date, time, factor, injured)| {
                let mut record = RawCollision::new(*date, *time);
                record.contributing_factors[0] = factor.map(ToString::to_string);
                record.persons_injured = *injured;
                record
            })
            .collect()
    }

    #[test]
    fn rerun_produces_identical_tables() {
        let conn = warehouse_conn();
        let options = PipelineOptions::default();
        let queries: Vec<String> = OutputTable::ALL
            .iter()
            .filter(|t| **t != OutputTable::Season)
            .map(|t| {
                format!(
                    "SELECT CAST(COLUMNS(*) AS VARCHAR) FROM wh.{} ORDER BY ALL",
                    options.table_names.name(*t)
                )
            })
            .collect();

        let first_report = run_with(&conn, mixed_records(), &options).unwrap();
        let first: Vec<_> = queries.iter().map(|q| rows_as_text(&conn, q)).collect();
        let second_report = run_with(&conn, mixed_records(), &options).unwrap();
        let second: Vec<_> = queries.iter().map(|q| rows_as_text(&conn, q)).collect();

        assert_eq!(first, second);
        assert_eq!(first_report.tables, second_report.tables);
        assert_eq!(first_report.season_metrics, second_report.season_metrics);
    }

    #[test]
    fn drop_policy_accounts_for_malformed_times() {
        let conn = warehouse_conn();
        let report = run_with(&conn, mixed_records(), &PipelineOptions::default()).unwrap();

        assert_eq!(report.cleaned_rows, 4);
        assert_eq!(report.malformed_time_rows, 2);
        assert_eq!(report.hourly_total, 2);
        let labels: Vec<&str> = report
            .hourly_counts
            .iter()
            .map(|c| c.hour_of_day.as_str())
            .collect();
        assert_eq!(labels, vec!["03", "14"]);
    }

    #[test]
    fn sentinel_hourly_counts_sum_to_fact_rows() {
        let conn = warehouse_conn();
        let options = PipelineOptions {
            time_policy: TimeFieldPolicy::Sentinel,
            ..PipelineOptions::default()
        };
        let report = run_with(&conn, mixed_records(), &options).unwrap();

        assert_eq!(report.hourly_total, report.cleaned_rows);
        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT count::TEXT FROM wh.crashes_per_hour WHERE hour_of_day = 'unknown'"
            ),
            vec![vec![s("2")]]
        );
    }

    #[test]
    fn season_rollup_is_persisted_when_enabled() {
        let conn = warehouse_conn();
        let options = PipelineOptions {
            persist_season_metrics: true,
            ..PipelineOptions::default()
        };
        let report = run_with(&conn, mixed_records(), &options).unwrap();

        assert_eq!(report.rows_written(OutputTable::Season), Some(3));
        assert_eq!(
            rows_as_text(
                &conn,
                "SELECT season, crashes::TEXT FROM wh.metrics_by_season ORDER BY season NULLS FIRST"
            ),
            vec![
                vec![None, s("1")],
                vec![s("Summer"), s("1")],
                vec![s("Winter"), s("2")],
            ]
        );
    }

    #[test]
    fn custom_table_names_are_used() {
        let conn = warehouse_conn();
        let mut options = PipelineOptions::default();
        options.table_names.facts = "facts_2024".to_string();
        options.table_names.hourly = "hourly_2024".to_string();
        run_with(&conn, example_records(), &options).unwrap();

        let facts: i64 = conn
            .query_row("SELECT COUNT(*) FROM wh.facts_2024", [], |row| row.get(0))
            .unwrap();
        assert_eq!(facts, 1);
        let hourly: i64 = conn
            .query_row("SELECT COUNT(*) FROM wh.hourly_2024", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hourly, 1);
    }

    #[test]
    fn invalid_table_name_is_rejected_before_loading() {
        let conn = warehouse_conn();
        let mut options = PipelineOptions::default();
        options.table_names.facts = "facts; DROP TABLE x".to_string();

        let result = run_with(&conn, example_records(), &options);
        assert!(matches!(
            result,
            Err(PipelineError::Warehouse(WarehouseError::InvalidIdentifier { .. }))
        ));

        let loaded: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'raw_collisions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(loaded, 0);
    }

    #[test]
    fn missing_dimension_table_fails_the_run() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE SCHEMA wh").unwrap();
        let result = run_with(&conn, example_records(), &PipelineOptions::default());
        assert!(matches!(result, Err(PipelineError::Warehouse(_))));

        // tables written before the season stage stay written
        let facts: i64 = conn
            .query_row("SELECT COUNT(*) FROM wh.vehicle_collisions", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(facts, 1);
    }

    #[test]
    fn parquet_sink_run_writes_one_file_per_table() {
        let tmp = std::env::temp_dir().join("collision_pipeline_test_parquet_run");
        let _ = std::fs::remove_dir_all(&tmp);

        let conn = warehouse_conn();
        let sink = ParquetSink::new(&tmp);
        let report = run(
            &conn,
            &RecordsSource::new(example_records()),
            &dimension(),
            &sink,
            &PipelineOptions::default(),
            &null_progress(),
        )
        .unwrap();

        assert_eq!(report.tables.len(), 5);
        for write in &report.tables {
            assert!(sink.file_path(&write.name).is_file(), "{}", write.name);
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn invariant_check() {
        assert!(check_invariant("rows", 3, 3).is_ok());
        assert!(matches!(
            check_invariant("rows", 3, 2),
            Err(PipelineError::InvariantViolation {
                invariant: "rows",
                expected: 3,
                actual: 2,
            })
        ));
    }
}
