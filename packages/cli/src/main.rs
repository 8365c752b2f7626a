#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the collision metrics pipeline.
//!
//! Log output goes through `indicatif-log-bridge` (via
//! [`collision_metrics_cli_utils::init_logger`]) so log lines and the
//! stage progress bar do not interleave.

mod config;
mod explore;
mod run;
mod seed;
mod storage;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use collision_metrics_object_store::ExecutionMode;
use collision_metrics_pipeline_models::TimeFieldPolicy;
use collision_metrics_source::SchemaMode;

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "collision_metrics",
    about = "NYC motor vehicle collision metrics pipeline"
)]
struct Cli {
    /// Config file (defaults to `COLLISION_METRICS_CONFIG`, then
    /// `collision_metrics.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the source export, compute every metric, and write the output tables
    Run {
        /// Credential mode for object storage (`local` or `cluster`)
        #[arg(long, default_value = "local")]
        mode: ExecutionMode,
        /// Source export file name (e.g., "`Motor_Vehicle_Collisions_-_Crashes.csv`")
        #[arg(long)]
        source_file: String,
        /// What to do with rows whose crash time has no hour (`drop` or `sentinel`)
        #[arg(long)]
        time_policy: Option<TimeFieldPolicy>,
        /// How the source is typed (`explicit` or `inferred`)
        #[arg(long)]
        schema: Option<SchemaMode>,
        /// Upload the warehouse artifacts to the configured bucket afterwards
        #[arg(long)]
        publish: bool,
        /// Print the run report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Profile the cleaned records and dump distinct column values
    Explore {
        /// Credential mode for object storage (`local` or `cluster`)
        #[arg(long, default_value = "local")]
        mode: ExecutionMode,
        /// Source export file name
        #[arg(long)]
        source_file: String,
        /// Comma-separated columns to dump
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Directory for the `<column>.txt` files
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
    },
    /// Create the date dimension in the warehouse for a date range
    SeedDimDate {
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = collision_metrics_cli_utils::init_logger();
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            mode,
            source_file,
            time_policy,
            schema,
            publish,
            json,
        } => {
            config.apply_overrides(time_policy, schema);
            let args = run::RunArgs {
                mode,
                source_file,
                publish,
                json,
            };
            run::run(&config, &args, &multi).await?;
        }
        Commands::Explore {
            mode,
            source_file,
            columns,
            out,
        } => {
            let args = explore::ExploreArgs {
                mode,
                source_file,
                columns,
                out,
            };
            explore::run(&config, &args, &multi).await?;
        }
        Commands::SeedDimDate { start, end } => seed::run(&config, start, end)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::parse_from([
            "collision_metrics",
            "run",
            "--mode",
            "cluster",
            "--source-file",
            "crashes.csv",
            "--time-policy",
            "sentinel",
            "--schema",
            "inferred",
            "--json",
        ]);
        let Commands::Run {
            mode,
            source_file,
            time_policy,
            schema,
            publish,
            json,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(mode, ExecutionMode::Cluster);
        assert_eq!(source_file, "crashes.csv");
        assert_eq!(time_policy, Some(TimeFieldPolicy::Sentinel));
        assert_eq!(schema, Some(SchemaMode::Inferred));
        assert!(!publish);
        assert!(json);
    }

    #[test]
    fn explore_columns_split_on_commas() {
        let cli = Cli::parse_from([
            "collision_metrics",
            "explore",
            "--source-file",
            "crashes.csv",
            "--columns",
            "borough,zip_code",
        ]);
        let Commands::Explore {
            mode, columns, out, ..
        } = cli.command
        else {
            panic!("expected explore");
        };
        assert_eq!(mode, ExecutionMode::Local);
        assert_eq!(columns, vec!["borough", "zip_code"]);
        assert_eq!(out, PathBuf::from("outputs"));
    }

    #[test]
    fn seed_dates_parse() {
        let cli = Cli::parse_from([
            "collision_metrics",
            "--config",
            "custom.toml",
            "seed-dim-date",
            "--start",
            "2024-01-01",
            "--end",
            "2024-12-31",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        let Commands::SeedDimDate { start, end } = cli.command else {
            panic!("expected seed-dim-date");
        };
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }
}
