#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Output table, time policy, and metric row types for the collision
//! pipeline.
//!
//! Each [`OutputTable`] is written with full-overwrite semantics: a run
//! replaces the entire prior content of the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Hour label used for malformed time values under
/// [`TimeFieldPolicy::Sentinel`].
pub const UNKNOWN_HOUR_LABEL: &str = "unknown";

/// A table produced by a pipeline run.
///
/// The `AsRef<str>` form is the default table name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputTable {
    /// Cleaned, vehicle-type-pruned, date-typed collision facts.
    #[strum(serialize = "vehicle_collisions")]
    Facts,
    /// Row counts per vehicle type 5-tuple.
    #[strum(serialize = "unused_data")]
    VehicleTypes,
    /// Crash counts per hour of day.
    #[strum(serialize = "crashes_per_hour")]
    Hourly,
    /// Crash counts per day of week.
    #[strum(serialize = "crashes_per_dayofweek")]
    DayOfWeek,
    /// Injury and fatality statistics per contributing factor pair.
    #[strum(serialize = "metrics_by_contributing_factor")]
    ContributingFactors,
    /// Season rollup (only written when explicitly enabled).
    #[strum(serialize = "metrics_by_season")]
    Season,
}

impl OutputTable {
    pub const ALL: &[Self] = &[
        Self::Facts,
        Self::VehicleTypes,
        Self::Hourly,
        Self::DayOfWeek,
        Self::ContributingFactors,
        Self::Season,
    ];
}

/// Configurable names for every output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TableNames {
    pub facts: String,
    pub vehicle_types: String,
    pub hourly: String,
    pub day_of_week: String,
    pub contributing_factors: String,
    pub season: String,
}

impl TableNames {
    /// Returns the configured name of `table`.
    #[must_use]
    pub fn name(&self, table: OutputTable) -> &str {
        match table {
            OutputTable::Facts => &self.facts,
            OutputTable::VehicleTypes => &self.vehicle_types,
            OutputTable::Hourly => &self.hourly,
            OutputTable::DayOfWeek => &self.day_of_week,
            OutputTable::ContributingFactors => &self.contributing_factors,
            OutputTable::Season => &self.season,
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            facts: OutputTable::Facts.to_string(),
            vehicle_types: OutputTable::VehicleTypes.to_string(),
            hourly: OutputTable::Hourly.to_string(),
            day_of_week: OutputTable::DayOfWeek.to_string(),
            contributing_factors: OutputTable::ContributingFactors.to_string(),
            season: OutputTable::Season.to_string(),
        }
    }
}

/// What to do with a row whose `crash_time` has no hour before a `:`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimeFieldPolicy {
    /// Leave the row out of the hourly table.
    #[default]
    Drop,
    /// Count the row under [`UNKNOWN_HOUR_LABEL`].
    Sentinel,
}

/// Crash count for one hour-of-day label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyCount {
    /// `"00"` to `"23"`, or [`UNKNOWN_HOUR_LABEL`].
    pub hour_of_day: String,
    pub count: u64,
}

/// Crash count for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayOfWeekCount {
    /// Three-letter abbreviation (`"Mon"`). `None` for rows whose date did
    /// not convert to a calendar date.
    pub day_of_week: Option<String>,
    pub count: u64,
}

/// Season rollup row. `season` is `None` for crash dates missing from the
/// date dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonMetrics {
    pub season: Option<String>,
    pub crashes: u64,
    pub persons_injured: Option<i64>,
    pub persons_killed: Option<i64>,
}

/// One completed sink write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableWrite {
    pub table: OutputTable,
    /// Name the table was written under.
    pub name: String,
    pub rows: u64,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub time_policy: TimeFieldPolicy,
    /// Rows loaded from the source.
    pub raw_rows: u64,
    /// Rows kept by the cleaner.
    pub cleaned_rows: u64,
    /// Rows rejected for a malformed `crash_date`.
    pub rejected_rows: u64,
    /// Fact rows whose `crash_time` had no parseable hour.
    pub malformed_time_rows: u64,
    /// Sum of counts across the hourly table.
    pub hourly_total: u64,
    /// The hourly table as written.
    pub hourly_counts: Vec<HourlyCount>,
    /// The day-of-week table as written.
    pub day_of_week_counts: Vec<DayOfWeekCount>,
    pub tables: Vec<TableWrite>,
    pub season_metrics: Vec<SeasonMetrics>,
}

impl PipelineReport {
    /// Rows written for `table`, if it was written during the run.
    #[must_use]
    pub fn rows_written(&self, table: OutputTable) -> Option<u64> {
        self.tables.iter().find(|w| w.table == table).map(|w| w.rows)
    }
}
