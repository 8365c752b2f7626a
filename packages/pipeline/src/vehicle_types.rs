//! Vehicle type side table.
//!
//! The five vehicle type columns are counted per distinct combination for
//! the side table, then removed from the stream that feeds the facts.

use collision_metrics_collision_models::CollisionField;
use collision_metrics_warehouse::to_count;
use duckdb::Connection;

use crate::PipelineError;
use crate::cleaner::CLEANED_VIEW;

/// View holding the per-combination row counts.
pub const COUNTS_VIEW: &str = "vehicle_type_counts";

/// View holding the cleaned stream without the vehicle type columns.
pub const PRUNED_VIEW: &str = "pruned_collisions";

fn vehicle_columns() -> String {
    CollisionField::VEHICLE_TYPES
        .iter()
        .map(|f| f.column())
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_clause() -> String {
    CollisionField::VEHICLE_TYPES
        .iter()
        .map(|f| format!("{} ASC NULLS FIRST", f.column()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn counts_sql() -> String {
    let columns = vehicle_columns();
    let order = order_clause();
    format!(
        "CREATE OR REPLACE VIEW {COUNTS_VIEW} AS
         SELECT {columns}, COUNT(*) AS count
         FROM {CLEANED_VIEW}
         GROUP BY ALL
         ORDER BY {order}"
    )
}

fn pruned_sql() -> String {
    format!(
        "CREATE OR REPLACE VIEW {PRUNED_VIEW} AS
         SELECT * EXCLUDE ({})
         FROM {CLEANED_VIEW}",
        vehicle_columns()
    )
}

/// Creates [`COUNTS_VIEW`] and [`PRUNED_VIEW`] over the cleaned stream.
///
/// # Errors
///
/// Returns [`PipelineError`] if either view cannot be created.
pub fn create_views(conn: &Connection) -> Result<(), PipelineError> {
    for sql in [counts_sql(), pruned_sql()] {
        log::debug!("{sql}");
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Sum of counts across every combination.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails.
pub fn total_count(conn: &Connection) -> Result<u64, PipelineError> {
    let total: i64 = conn.query_row(
        &format!("SELECT CAST(COALESCE(SUM(count), 0) AS BIGINT) FROM {COUNTS_VIEW}"),
        [],
        |row| row.get(0),
    )?;
    Ok(to_count(total)?)
}
