//! `explore` command: profile the cleaned records and dump distinct values.

use std::path::PathBuf;

use collision_metrics_cli_utils::{IndicatifProgress, MultiProgress};
use collision_metrics_object_store::ExecutionMode;
use collision_metrics_pipeline::explore::{DEFAULT_COLUMNS, explore};
use collision_metrics_source::SchemaMode;
use collision_metrics_source::csv::CsvFileSource;
use collision_metrics_warehouse::open_working;

use crate::config::Config;
use crate::storage;

pub struct ExploreArgs {
    pub mode: ExecutionMode,
    pub source_file: String,
    pub columns: Vec<String>,
    pub out: PathBuf,
}

/// Requested columns, or [`DEFAULT_COLUMNS`] when none were given.
#[must_use]
pub fn columns_or_default(columns: &[String]) -> Vec<String> {
    if columns.is_empty() {
        DEFAULT_COLUMNS.iter().map(ToString::to_string).collect()
    } else {
        columns.iter().map(|c| c.trim().to_string()).collect()
    }
}

/// Runs the `explore` command.
///
/// # Errors
///
/// Returns an error if the source cannot be fetched or loaded, a column is
/// unknown, or an output file cannot be written.
pub async fn run(
    config: &Config,
    args: &ExploreArgs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = storage::connect(&config.source, args.mode).await?;
    let path = storage::resolve_source(&config.source, store.as_ref(), &args.source_file).await?;
    let source = CsvFileSource::new(path, SchemaMode::Inferred);

    let conn = open_working(&config.warehouse.engine_settings())?;
    let columns = columns_or_default(&args.columns);

    let spinner = IndicatifProgress::spinner(multi, "Exploring source");
    let report = explore(&conn, &source, &columns, &args.out)?;
    spinner.finish_and_clear();

    println!(
        "{} of {} rows kept by the cleaner",
        report.cleaned_rows, report.raw_rows
    );
    println!("{:<32} {:<10} {:>10} {:>10}", "COLUMN", "TYPE", "NULLS", "DISTINCT");
    println!("{}", "-".repeat(65));
    for column in &report.profile {
        println!(
            "{:<32} {:<10} {:>10} {:>10}",
            column.name, column.data_type, column.null_count, column.distinct_count
        );
    }
    println!();
    for file in &report.files {
        println!("  {}", file.display());
    }

    Ok(())
}
