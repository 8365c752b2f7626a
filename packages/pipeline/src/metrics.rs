//! Day-of-week counts and contributing factor statistics over the facts.

use collision_metrics_collision_models::CollisionField;
use collision_metrics_pipeline_models::DayOfWeekCount;
use collision_metrics_warehouse::to_count;
use duckdb::Connection;

use crate::PipelineError;
use crate::facts::FACTS_VIEW;

/// View holding crash counts per weekday.
pub const DAY_OF_WEEK_VIEW: &str = "crashes_per_dayofweek";

/// View holding contributing factor statistics.
pub const CONTRIBUTING_FACTORS_VIEW: &str = "metrics_by_contributing_factor";

fn day_of_week_sql() -> String {
    let date = CollisionField::CrashDate.column();
    format!(
        "CREATE OR REPLACE VIEW {DAY_OF_WEEK_VIEW} AS
         SELECT strftime({date}, '%a') AS day_of_week, COUNT(*) AS count
         FROM {FACTS_VIEW}
         GROUP BY day_of_week
         ORDER BY day_of_week ASC NULLS FIRST"
    )
}

fn contributing_factors_sql() -> String {
    let [first, second, ..] = CollisionField::CONTRIBUTING_FACTORS.map(CollisionField::column);
    let injured = CollisionField::PersonsInjured.column();
    let killed = CollisionField::PersonsKilled.column();
    format!(
        "CREATE OR REPLACE VIEW {CONTRIBUTING_FACTORS_VIEW} AS
         SELECT {first}, {second},
                COUNT(*) AS count,
                CAST(SUM({injured}) AS BIGINT) AS persons_injured,
                AVG({injured}) AS persons_injured_avg,
                CAST(SUM({killed}) AS BIGINT) AS persons_killed,
                AVG({killed}) AS persons_killed_avg
         FROM {FACTS_VIEW}
         GROUP BY {first}, {second}
         ORDER BY {first} ASC NULLS FIRST, {second} ASC NULLS FIRST"
    )
}

/// Creates [`DAY_OF_WEEK_VIEW`] and [`CONTRIBUTING_FACTORS_VIEW`].
///
/// # Errors
///
/// Returns [`PipelineError`] if either view cannot be created.
pub fn create_views(conn: &Connection) -> Result<(), PipelineError> {
    for sql in [day_of_week_sql(), contributing_factors_sql()] {
        log::debug!("{sql}");
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Reads [`DAY_OF_WEEK_VIEW`].
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails.
pub fn read_day_of_week(conn: &Connection) -> Result<Vec<DayOfWeekCount>, PipelineError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT day_of_week, count FROM {DAY_OF_WEEK_VIEW} ORDER BY day_of_week ASC NULLS FIRST"
    ))?;
    let mut rows = stmt.query([])?;

    let mut counts = Vec::new();
    while let Some(row) = rows.next()? {
        let count: i64 = row.get(1)?;
        counts.push(DayOfWeekCount {
            day_of_week: row.get(0)?,
            count: to_count(count)?,
        });
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use collision_metrics_collision_models::RawCollision;
    use collision_metrics_source::{CollisionSource, RecordsSource};

    use super::*;

    #[derive(Debug)]
    struct FactorRow {
        contributing_factor_vehicle_1: Option<String>,
        contributing_factor_vehicle_2: Option<String>,
        count: i64,
        persons_injured: Option<i64>,
        persons_injured_avg: Option<f64>,
        persons_killed: Option<i64>,
        persons_killed_avg: Option<f64>,
    }

    fn read_contributing_factors(conn: &Connection) -> Vec<FactorRow> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {CONTRIBUTING_FACTORS_VIEW}
                 ORDER BY contributing_factor_vehicle_1 ASC NULLS FIRST,
                          contributing_factor_vehicle_2 ASC NULLS FIRST"
            ))
            .unwrap();
        stmt.query_map([], |row| {
            Ok(FactorRow {
                contributing_factor_vehicle_1: row.get(0)?,
                contributing_factor_vehicle_2: row.get(1)?,
                count: row.get(2)?,
                persons_injured: row.get(3)?,
                persons_injured_avg: row.get(4)?,
                persons_killed: row.get(5)?,
                persons_killed_avg: row.get(6)?,
            })
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    fn crash(date: &str, factors: (Option<&str>, Option<&str>), injured: Option<i64>) -> RawCollision {
        let mut record = RawCollision::new(date, "12:00");
        record.contributing_factors[0] = factors.0.map(ToString::to_string);
        record.contributing_factors[1] = factors.1.map(ToString::to_string);
        record.persons_injured = injured;
        record.persons_killed = injured.map(|_| 0);
        record
    }

    fn setup(records: Vec<RawCollision>) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        RecordsSource::new(records).load(&conn).unwrap();
        crate::cleaner::create_view(&conn).unwrap();
        crate::vehicle_types::create_views(&conn).unwrap();
        crate::facts::create_view(&conn).unwrap();
        create_views(&conn).unwrap();
        conn
    }

    #[test]
    fn mean_ignores_null_casualties() {
        let speed = (Some("Unsafe Speed"), None);
        let conn = setup(vec![
            crash("03/01/2024", speed, Some(2)),
            crash("03/02/2024", speed, Some(4)),
            crash("03/03/2024", speed, None),
        ]);

        let metrics = read_contributing_factors(&conn);
        assert_eq!(metrics.len(), 1);
        let group = &metrics[0];
        assert_eq!(group.count, 3);
        assert_eq!(group.persons_injured, Some(6));
        // sum / non-null count, not sum / row count
        assert_eq!(group.persons_injured_avg, Some(3.0));
        assert_eq!(group.persons_killed, Some(0));
    }

    #[test]
    fn all_null_group_has_null_sum_and_mean() {
        let conn = setup(vec![crash("03/01/2024", (Some("Glare"), None), None)]);

        let metrics = read_contributing_factors(&conn);
        assert_eq!(metrics[0].persons_injured, None);
        assert_eq!(metrics[0].persons_injured_avg, None);
        assert_eq!(metrics[0].persons_killed, None);
        assert_eq!(metrics[0].persons_killed_avg, None);
    }

    #[test]
    fn factor_pairs_are_ordered_with_null_keys_first() {
        let conn = setup(vec![
            crash("03/01/2024", (Some("Glare"), Some("Unsafe Speed")), Some(1)),
            crash("03/01/2024", (Some("Glare"), None), Some(1)),
            crash("03/01/2024", (None, None), Some(1)),
            crash("03/01/2024", (Some("Driver Inattention"), None), Some(1)),
        ]);

        let keys: Vec<(Option<String>, Option<String>)> = read_contributing_factors(&conn)
            .into_iter()
            .map(|m| (m.contributing_factor_vehicle_1, m.contributing_factor_vehicle_2))
            .collect();
        assert_eq!(
            keys,
            vec![
                (None, None),
                (Some("Driver Inattention".to_string()), None),
                (Some("Glare".to_string()), None),
                (Some("Glare".to_string()), Some("Unsafe Speed".to_string())),
            ]
        );
    }

    #[test]
    fn day_of_week_uses_abbreviations_and_null_for_invalid_dates() {
        let conn = setup(vec![
            // Friday
            crash("03/01/2024", (None, None), Some(0)),
            crash("03/08/2024", (None, None), Some(0)),
            // Saturday
            crash("03/02/2024", (None, None), Some(0)),
            // shaped right, not a real day
            crash("02/30/2024", (None, None), Some(0)),
        ]);

        let counts = read_day_of_week(&conn).unwrap();
        assert_eq!(
            counts,
            vec![
                DayOfWeekCount {
                    day_of_week: None,
                    count: 1
                },
                DayOfWeekCount {
                    day_of_week: Some("Fri".to_string()),
                    count: 2
                },
                DayOfWeekCount {
                    day_of_week: Some("Sat".to_string()),
                    count: 1
                },
            ]
        );
    }
}
