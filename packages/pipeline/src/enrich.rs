//! Season rollup: facts left-joined to the date dimension.

use collision_metrics_collision_models::CollisionField;
use collision_metrics_pipeline_models::SeasonMetrics;
use collision_metrics_warehouse::dimension::DIMENSION_TABLE;
use collision_metrics_warehouse::to_count;
use duckdb::Connection;

use crate::PipelineError;
use crate::facts::FACTS_VIEW;

/// View holding the season rollup.
pub const SEASON_VIEW: &str = "metrics_by_season";

/// Creates [`SEASON_VIEW`]. The dimension must already be loaded into
/// [`DIMENSION_TABLE`].
///
/// Facts whose date has no dimension row (or no date) land in the null
/// season group.
///
/// # Errors
///
/// Returns [`PipelineError`] if the view cannot be created.
pub fn create_view(conn: &Connection) -> Result<(), PipelineError> {
    let date = CollisionField::CrashDate.column();
    let injured = CollisionField::PersonsInjured.column();
    let killed = CollisionField::PersonsKilled.column();
    let sql = format!(
        "CREATE OR REPLACE VIEW {SEASON_VIEW} AS
         SELECT d.season,
                COUNT(*) AS crashes,
                CAST(SUM(f.{injured}) AS BIGINT) AS persons_injured,
                CAST(SUM(f.{killed}) AS BIGINT) AS persons_killed
         FROM {FACTS_VIEW} f
         LEFT JOIN {DIMENSION_TABLE} d ON f.{date} = d.full_date
         GROUP BY d.season
         ORDER BY d.season ASC NULLS FIRST"
    );
    log::debug!("{sql}");
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Reads [`SEASON_VIEW`].
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails.
pub fn read_season_metrics(conn: &Connection) -> Result<Vec<SeasonMetrics>, PipelineError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT season, crashes, persons_injured, persons_killed
         FROM {SEASON_VIEW}
         ORDER BY season ASC NULLS FIRST"
    ))?;
    let mut rows = stmt.query([])?;

    let mut metrics = Vec::new();
    while let Some(row) = rows.next()? {
        let crashes: i64 = row.get(1)?;
        metrics.push(SeasonMetrics {
            season: row.get(0)?,
            crashes: to_count(crashes)?,
            persons_injured: row.get(2)?,
            persons_killed: row.get(3)?,
        });
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use collision_metrics_collision_models::RawCollision;
    use collision_metrics_source::{CollisionSource, RecordsSource};
    use collision_metrics_warehouse::dimension::{
        DimensionSource, load_date_dimension, seed_date_dimension,
    };

    use super::*;

    fn crash(date: &str, injured: i64, killed: i64) -> RawCollision {
        let mut record = RawCollision::new(date, "8:00");
        record.persons_injured = Some(injured);
        record.persons_killed = Some(killed);
        record
    }

    #[test]
    fn rollup_groups_by_season_with_null_for_unmatched_dates() {
        let conn = Connection::open_in_memory().unwrap();
        RecordsSource::new(vec![
            crash("01/15/2024", 1, 0),
            crash("02/01/2024", 2, 1),
            crash("07/04/2024", 3, 0),
            // outside the seeded range
            crash("07/04/2030", 5, 0),
            // not a calendar date
            crash("02/30/2024", 1, 0),
        ])
        .load(&conn)
        .unwrap();
        crate::cleaner::create_view(&conn).unwrap();
        crate::vehicle_types::create_views(&conn).unwrap();
        crate::facts::create_view(&conn).unwrap();

        seed_date_dimension(
            &conn,
            "lookup",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap();
        load_date_dimension(&conn, &DimensionSource::Table("lookup".to_string())).unwrap();
        create_view(&conn).unwrap();

        let metrics = read_season_metrics(&conn).unwrap();
        assert_eq!(
            metrics,
            vec![
                SeasonMetrics {
                    season: None,
                    crashes: 2,
                    persons_injured: Some(6),
                    persons_killed: Some(0),
                },
                SeasonMetrics {
                    season: Some("Summer".to_string()),
                    crashes: 1,
                    persons_injured: Some(3),
                    persons_killed: Some(0),
                },
                SeasonMetrics {
                    season: Some("Winter".to_string()),
                    crashes: 2,
                    persons_injured: Some(3),
                    persons_killed: Some(1),
                },
            ]
        );

        let total: u64 = metrics.iter().map(|m| m.crashes).sum();
        assert_eq!(total, 5);
    }
}
