//! Hour-of-day buckets from the free-text `crash_time`.
//!
//! The hour label is the text before the first `:`, left-padded with `'0'`
//! to two characters (a longer prefix keeps its first two). A value with no
//! `:`, nothing before it, or no value at all is malformed and handled by
//! the run's [`TimeFieldPolicy`].
//!
//! [`hour_label`] and the SQL built here implement the same rule.

use std::collections::BTreeMap;

use collision_metrics_collision_models::CollisionField;
use collision_metrics_pipeline_models::{HourlyCount, TimeFieldPolicy, UNKNOWN_HOUR_LABEL};
use collision_metrics_warehouse::to_count;
use duckdb::Connection;

use crate::facts::FACTS_VIEW;
use crate::{PipelineError, check_invariant};

/// View holding the hourly counts.
pub const HOURLY_VIEW: &str = "crashes_per_hour";

/// Width hour labels are padded to.
const LABEL_WIDTH: usize = 2;

/// Returns the hour label of `time`, or `None` if it is malformed.
#[must_use]
pub fn hour_label(time: &str) -> Option<String> {
    let (prefix, _) = time.split_once(':')?;
    if prefix.is_empty() {
        return None;
    }

    let mut label: String = prefix.chars().take(LABEL_WIDTH).collect();
    let len = label.chars().count();
    if len < LABEL_WIDTH {
        label.insert_str(0, &"0".repeat(LABEL_WIDTH - len));
    }
    Some(label)
}

/// Returns the label `time` is counted under for `policy`, or `None` when
/// the row does not contribute to the hourly table.
#[must_use]
pub fn bucket(time: Option<&str>, policy: TimeFieldPolicy) -> Option<String> {
    match (time.and_then(hour_label), policy) {
        (Some(label), _) => Some(label),
        (None, TimeFieldPolicy::Drop) => None,
        (None, TimeFieldPolicy::Sentinel) => Some(UNKNOWN_HOUR_LABEL.to_string()),
    }
}

/// SQL predicate true when `crash_time` has a non-empty prefix before `:`.
fn well_formed_sql() -> String {
    let time = CollisionField::CrashTime.column();
    format!("coalesce(strpos({time}, ':') > 1, false)")
}

/// SQL expression for the hour label of a well-formed `crash_time`.
fn label_sql() -> String {
    let time = CollisionField::CrashTime.column();
    format!("lpad(substr({time}, 1, strpos({time}, ':') - 1), {LABEL_WIDTH}, '0')")
}

fn view_sql(policy: TimeFieldPolicy) -> String {
    let well_formed = well_formed_sql();
    let label = label_sql();

    match policy {
        TimeFieldPolicy::Drop => format!(
            "CREATE OR REPLACE VIEW {HOURLY_VIEW} AS
             SELECT {label} AS hour_of_day, COUNT(*) AS count
             FROM {FACTS_VIEW}
             WHERE {well_formed}
             GROUP BY hour_of_day
             ORDER BY hour_of_day"
        ),
        TimeFieldPolicy::Sentinel => format!(
            "CREATE OR REPLACE VIEW {HOURLY_VIEW} AS
             SELECT CASE WHEN {well_formed} THEN {label} ELSE '{UNKNOWN_HOUR_LABEL}' END AS hour_of_day,
                    COUNT(*) AS count
             FROM {FACTS_VIEW}
             GROUP BY hour_of_day
             ORDER BY hour_of_day"
        ),
    }
}

/// Creates [`HOURLY_VIEW`] for `policy`.
///
/// # Errors
///
/// Returns [`PipelineError`] if the view cannot be created.
pub fn create_view(conn: &Connection, policy: TimeFieldPolicy) -> Result<(), PipelineError> {
    let sql = view_sql(policy);
    log::debug!("{sql}");
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Reads [`HOURLY_VIEW`] in label order.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails.
pub fn read_counts(conn: &Connection) -> Result<Vec<HourlyCount>, PipelineError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT hour_of_day, count FROM {HOURLY_VIEW} ORDER BY hour_of_day"
    ))?;
    let mut rows = stmt.query([])?;

    let mut counts = Vec::new();
    while let Some(row) = rows.next()? {
        let count: i64 = row.get(1)?;
        counts.push(HourlyCount {
            hour_of_day: row.get(0)?,
            count: to_count(count)?,
        });
    }

    Ok(counts)
}

/// Hourly counts along with the number of fact rows that have no hour
/// label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourlyTable {
    pub counts: Vec<HourlyCount>,
    pub malformed: u64,
}

impl HourlyTable {
    /// Sum of counts across every label.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.count).sum()
    }
}

/// Tallies the hourly table in Rust: every distinct `crash_time` of the
/// facts is labelled with [`bucket`], without going through the SQL label
/// expression.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails.
pub fn expected_counts(
    conn: &Connection,
    policy: TimeFieldPolicy,
) -> Result<HourlyTable, PipelineError> {
    let time = CollisionField::CrashTime.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT {time}, COUNT(*) FROM {FACTS_VIEW} GROUP BY {time}"
    ))?;
    let mut rows = stmt.query([])?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut malformed = 0;
    while let Some(row) = rows.next()? {
        let value: Option<String> = row.get(0)?;
        let rows_with_value = to_count(row.get::<_, i64>(1)?)?;

        if value.as_deref().and_then(hour_label).is_none() {
            malformed += rows_with_value;
        }
        if let Some(label) = bucket(value.as_deref(), policy) {
            *counts.entry(label).or_default() += rows_with_value;
        }
    }

    Ok(HourlyTable {
        counts: counts
            .into_iter()
            .map(|(hour_of_day, count)| HourlyCount { hour_of_day, count })
            .collect(),
        malformed,
    })
}

/// Reads [`HOURLY_VIEW`] and checks it against [`expected_counts`]: the
/// totals must match and so must the count under every label.
///
/// # Errors
///
/// Returns [`PipelineError::InvariantViolation`] when the view disagrees
/// with the tally, or any query error.
pub fn verified_counts(
    conn: &Connection,
    policy: TimeFieldPolicy,
) -> Result<HourlyTable, PipelineError> {
    let expected = expected_counts(conn, policy)?;
    let written = HourlyTable {
        counts: read_counts(conn)?,
        malformed: expected.malformed,
    };

    check_invariant("hourly counts", expected.total(), written.total())?;
    for want in &expected.counts {
        let got = written
            .counts
            .iter()
            .find(|c| c.hour_of_day == want.hour_of_day)
            .map_or(0, |c| c.count);
        check_invariant("hourly bucket", want.count, got)?;
    }

    Ok(written)
}
