//! Column pruning and date-shape filtering.

use collision_metrics_collision_models::{CRASH_DATE_PATTERN, CollisionField};
use collision_metrics_source::RAW_TABLE;
use duckdb::Connection;

use crate::PipelineError;

/// View holding the cleaner's output.
pub const CLEANED_VIEW: &str = "cleaned_collisions";

/// Fields that survive the cleaner, in contract order.
#[must_use]
pub fn cleaned_fields() -> Vec<CollisionField> {
    CollisionField::ALL
        .iter()
        .copied()
        .filter(|f| !f.dropped_by_cleaner())
        .collect()
}

/// Whether a raw `crash_date` has the `MM/DD/YYYY` shape the cleaner keeps.
///
/// Mirrors the SQL filter of [`create_view`].
#[must_use]
pub fn is_valid_crash_date(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[2] != b'/' || bytes[5] != b'/' {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    if !(digits(0..2) && digits(3..5) && digits(6..10)) {
        return false;
    }
    let month = (bytes[0] - b'0') * 10 + (bytes[1] - b'0');
    let day = (bytes[3] - b'0') * 10 + (bytes[4] - b'0');
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

fn view_sql() -> String {
    let columns = cleaned_fields()
        .iter()
        .map(|f| f.column())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE OR REPLACE VIEW {CLEANED_VIEW} AS
         SELECT {columns}
         FROM {RAW_TABLE}
         WHERE regexp_full_match({date}, '{CRASH_DATE_PATTERN}')",
        date = CollisionField::CrashDate.column(),
    )
}

/// Creates [`CLEANED_VIEW`] over the raw table: geographic and identifier
/// columns are dropped, and rows whose date is null or not `MM/DD/YYYY`
/// are left out.
///
/// # Errors
///
/// Returns [`PipelineError`] if the view cannot be created.
pub fn create_view(conn: &Connection) -> Result<(), PipelineError> {
    let sql = view_sql();
    log::debug!("{sql}");
    conn.execute_batch(&sql)?;
    Ok(())
}
