//! `seed-dim-date` command: create the date dimension in the warehouse.

use chrono::NaiveDate;
use collision_metrics_warehouse::dimension::seed_date_dimension;
use collision_metrics_warehouse::{attach, detach, open_working};

use crate::config::Config;

/// Runs the `seed-dim-date` command.
///
/// # Errors
///
/// Returns an error if `end` is before `start`, the warehouse cannot be
/// attached, or the table cannot be written.
pub fn run(
    config: &Config,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_working(&config.warehouse.engine_settings())?;
    let qualifier = attach(&conn, &config.warehouse.path, &config.warehouse.dataset)?;
    let table = config.dimension.qualified_table(&qualifier)?;

    let result = seed_date_dimension(&conn, &table, start, end);
    let detached = detach(&conn);
    let rows = result?;
    detached?;

    println!("Seeded {rows} days from {start} to {end} into {table}");
    Ok(())
}
