//! Fact stream: the pruned collisions with `crash_date` as a calendar date.

use collision_metrics_collision_models::{CRASH_DATE_FORMAT, CollisionField};
use duckdb::Connection;

use crate::PipelineError;
use crate::vehicle_types::PRUNED_VIEW;

/// View holding the fact stream.
pub const FACTS_VIEW: &str = "collision_facts";

/// Creates [`FACTS_VIEW`].
///
/// A date that has the right shape but does not exist on the calendar
/// (`02/30/2024`) becomes null; the row itself is kept.
///
/// # Errors
///
/// Returns [`PipelineError`] if the view cannot be created.
pub fn create_view(conn: &Connection) -> Result<(), PipelineError> {
    let date = CollisionField::CrashDate.column();
    let sql = format!(
        "CREATE OR REPLACE VIEW {FACTS_VIEW} AS
         SELECT * REPLACE (CAST(try_strptime({date}, '{CRASH_DATE_FORMAT}') AS DATE) AS {date})
         FROM {PRUNED_VIEW}"
    );
    log::debug!("{sql}");
    conn.execute_batch(&sql)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use collision_metrics_collision_models::RawCollision;
    use collision_metrics_source::{CollisionSource, RecordsSource};

    use super::*;

    #[test]
    fn dates_become_calendar_dates_and_invalid_ones_null() {
        let conn = Connection::open_in_memory().unwrap();
        RecordsSource::new(vec![
            RawCollision::new("03/01/2024", "3:15"),
            RawCollision::new("02/30/2024", "4:00"),
        ])
        .load(&conn)
        .unwrap();
        crate::cleaner::create_view(&conn).unwrap();
        crate::vehicle_types::create_views(&conn).unwrap();
        create_view(&conn).unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT crash_time, crash_date::TEXT FROM {FACTS_VIEW} ORDER BY crash_time"
            ))
            .unwrap();
        let mut rows = stmt.query([]).unwrap();
        let mut facts: Vec<(String, Option<String>)> = Vec::new();
        while let Some(row) = rows.next().unwrap() {
            facts.push((row.get(0).unwrap(), row.get(1).unwrap()));
        }

        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().to_string();
        assert_eq!(
            facts,
            vec![
                ("3:15".to_string(), Some(expected)),
                ("4:00".to_string(), None),
            ]
        );

        let date_type: String = conn
            .query_row(
                &format!("SELECT typeof(crash_date) FROM {FACTS_VIEW} LIMIT 1"),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(date_type, "DATE");
    }
}
