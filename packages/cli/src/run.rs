//! `run` command: fetch, load, run the pipeline, report, publish.

use std::io::{self, Write};

use collision_metrics_cli_utils::{IndicatifProgress, MultiProgress};
use collision_metrics_object_store::ExecutionMode;
use collision_metrics_pipeline_models::{PipelineReport, SeasonMetrics};
use collision_metrics_source::csv::CsvFileSource;
use collision_metrics_warehouse::sink::{DuckDbSink, ParquetSink, TableSink};
use collision_metrics_warehouse::{WarehouseFormat, attach, detach, open_working};

use crate::config::Config;
use crate::storage;

/// Options of a single `run` invocation.
pub struct RunArgs {
    pub mode: ExecutionMode,
    pub source_file: String,
    pub publish: bool,
    pub json: bool,
}

/// Builds the sink `config` asks for.
///
/// # Errors
///
/// Returns an error if the qualifier is not a valid dotted identifier.
pub fn build_sink(
    config: &Config,
    qualifier: &str,
) -> Result<Box<dyn TableSink>, Box<dyn std::error::Error>> {
    Ok(match config.warehouse.format {
        WarehouseFormat::Duckdb => {
            Box::new(DuckDbSink::new(qualifier)?.with_file(&config.warehouse.path))
        }
        WarehouseFormat::Parquet => Box::new(ParquetSink::new(&config.warehouse.parquet_dir)),
    })
}

fn optional(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Writes the season rollup as a plain-text table.
///
/// # Errors
///
/// Returns an error if writing to `out` fails.
pub fn write_season_table(out: &mut impl Write, metrics: &[SeasonMetrics]) -> io::Result<()> {
    writeln!(
        out,
        "{:<10} {:>10} {:>16} {:>15}",
        "SEASON", "CRASHES", "PERSONS_INJURED", "PERSONS_KILLED"
    )?;
    writeln!(out, "{}", "-".repeat(54))?;
    for row in metrics {
        writeln!(
            out,
            "{:<10} {:>10} {:>16} {:>15}",
            row.season.as_deref().unwrap_or("(none)"),
            row.crashes,
            optional(row.persons_injured),
            optional(row.persons_killed),
        )?;
    }
    Ok(())
}

/// Writes label/count pairs as a two-column table.
fn write_counts<'a>(
    out: &mut impl Write,
    header: &str,
    rows: impl Iterator<Item = (&'a str, u64)>,
) -> io::Result<()> {
    writeln!(out, "{header:<12} {:>10}", "CRASHES")?;
    writeln!(out, "{}", "-".repeat(23))?;
    for (label, count) in rows {
        writeln!(out, "{label:<12} {count:>10}")?;
    }
    Ok(())
}

/// Writes the plain-text summary of `report`.
///
/// # Errors
///
/// Returns an error if writing to `out` fails.
pub fn write_report(out: &mut impl Write, report: &PipelineReport) -> io::Result<()> {
    write_counts(
        out,
        "HOUR",
        report
            .hourly_counts
            .iter()
            .map(|c| (c.hour_of_day.as_str(), c.count)),
    )?;
    writeln!(out)?;
    write_counts(
        out,
        "DAY",
        report
            .day_of_week_counts
            .iter()
            .map(|c| (c.day_of_week.as_deref().unwrap_or("(none)"), c.count)),
    )?;
    writeln!(out)?;
    write_season_table(out, &report.season_metrics)?;
    writeln!(out)?;
    writeln!(
        out,
        "{} rows loaded, {} cleaned, {} rejected, {} with no crash hour",
        report.raw_rows, report.cleaned_rows, report.rejected_rows, report.malformed_time_rows
    )?;
    for write in &report.tables {
        writeln!(out, "  {:<32} {:>10} rows", write.name, write.rows)?;
    }
    Ok(())
}

fn print_report(report: &PipelineReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        write_report(&mut io::stdout().lock(), report)?;
    }
    Ok(())
}

/// Runs the `run` command.
///
/// # Errors
///
/// Returns an error if any stage fails. Tables written before the failure
/// stay written.
pub async fn run(
    config: &Config,
    args: &RunArgs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.publish && config.source.bucket.is_none() {
        return Err("--publish needs [source].bucket to be configured".into());
    }

    let store = storage::connect(&config.source, args.mode).await?;
    let path = storage::resolve_source(&config.source, store.as_ref(), &args.source_file).await?;
    let source = CsvFileSource::new(path, config.source.schema);
    log::info!(
        "Reading {} with the {} schema",
        source.path().display(),
        source.mode()
    );

    let conn = open_working(&config.warehouse.engine_settings())?;
    let qualifier = attach(&conn, &config.warehouse.path, &config.warehouse.dataset)?;
    let dimension = config.dimension.source(&qualifier)?;
    let sink = build_sink(config, &qualifier)?;

    let progress = IndicatifProgress::stages_bar(multi, "Running pipeline");
    let result = collision_metrics_pipeline::run(
        &conn,
        &source,
        &dimension,
        sink.as_ref(),
        &config.pipeline_options(),
        &progress,
    );
    let detached = detach(&conn);
    let report = result?;
    detached?;

    print_report(&report, args.json)?;

    if args.publish
        && let Some(store) = &store
    {
        let names: Vec<&str> = report.tables.iter().map(|w| w.name.as_str()).collect();
        let artifacts = sink.artifacts(&names);
        let spinner = IndicatifProgress::spinner(multi, "Publishing warehouse artifacts");
        let stats = store.publish(&artifacts).await?;
        spinner.finish(format!("Published {stats}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use collision_metrics_pipeline_models::{
        DayOfWeekCount, HourlyCount, OutputTable, TableWrite, TimeFieldPolicy,
    };

    use super::*;

    fn render(write: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        write(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn season_table_renders_null_season_and_missing_sums() {
        let rows = [
            SeasonMetrics {
                season: None,
                crashes: 2,
                persons_injured: None,
                persons_killed: Some(0),
            },
            SeasonMetrics {
                season: Some("Winter".to_string()),
                crashes: 12,
                persons_injured: Some(4),
                persons_killed: Some(1),
            },
        ];
        let table = render(|out| write_season_table(out, &rows));

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("SEASON"));
        assert!(lines[2].starts_with("(none)"));
        assert!(lines[2].contains(" - "));
        assert!(lines[3].starts_with("Winter"));
        assert!(lines[3].ends_with('1'));
    }

    #[test]
    fn report_lists_hourly_and_weekday_counts() {
        let report = PipelineReport {
            started_at: Utc::now(),
            time_policy: TimeFieldPolicy::Drop,
            raw_rows: 2,
            cleaned_rows: 1,
            rejected_rows: 1,
            malformed_time_rows: 0,
            hourly_total: 1,
            hourly_counts: vec![HourlyCount {
                hour_of_day: "03".to_string(),
                count: 1,
            }],
            day_of_week_counts: vec![DayOfWeekCount {
                day_of_week: None,
                count: 1,
            }],
            tables: vec![TableWrite {
                table: OutputTable::Facts,
                name: "vehicle_collisions".to_string(),
                rows: 1,
            }],
            season_metrics: Vec::new(),
        };

        let text = render(|out| write_report(out, &report));
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("HOUR"));
        assert_eq!(lines[2].split_whitespace().collect::<Vec<_>>(), ["03", "1"]);
        assert!(lines[4].starts_with("DAY"));
        assert_eq!(lines[6].split_whitespace().collect::<Vec<_>>(), ["(none)", "1"]);
        assert!(text.contains("2 rows loaded, 1 cleaned, 1 rejected, 0 with no crash hour"));
        assert_eq!(
            lines.last().unwrap().split_whitespace().collect::<Vec<_>>(),
            ["vehicle_collisions", "1", "rows"]
        );
    }

    #[test]
    fn sink_follows_configured_format() {
        let mut config = Config::default();
        let sink = build_sink(&config, "warehouse.collisions").unwrap();
        assert!(sink.describe().starts_with("warehouse.collisions"));
        assert_eq!(sink.artifacts(&["a"]), vec![config.warehouse.path.clone()]);

        config.warehouse.format = WarehouseFormat::Parquet;
        let sink = build_sink(&config, "warehouse.collisions").unwrap();
        assert_eq!(
            sink.artifacts(&["a"]),
            vec![config.warehouse.parquet_dir.join("a.parquet")]
        );
    }
}
