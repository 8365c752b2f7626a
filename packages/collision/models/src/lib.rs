#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collision record schema contract.
//!
//! Every raw collision record, whether it comes from a CSV export or is
//! built in memory, must conform to the fixed field list in
//! [`CollisionField::ALL`]. Raw CSV headers (`"CRASH DATE"`) are mapped to
//! snake-case column names (`crash_date`) at the source boundary, and every
//! stage after that only uses the column names.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Number of vehicles a single collision record can describe.
pub const VEHICLE_SLOTS: usize = 5;

/// Pattern a raw `crash_date` must fully match: two-digit month (01-12),
/// two-digit day (01-31), four-digit year.
///
/// Shape only. `02/30/2024` matches even though it is not a real date.
pub const CRASH_DATE_PATTERN: &str = "^(0[1-9]|1[0-2])/(0[1-9]|[12][0-9]|3[01])/[0-9]{4}$";

/// `strftime`-style format of a raw `crash_date`.
pub const CRASH_DATE_FORMAT: &str = "%m/%d/%Y";

/// Storage type of a contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FieldType {
    /// Free text.
    Varchar,
    /// 64-bit integer.
    Bigint,
    /// 64-bit float.
    Double,
}

/// What the pipeline does with a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    /// Kept in the fact table.
    Retained,
    /// Casualty counter, kept in the fact table and aggregated.
    Casualty,
    /// Location detail, dropped by the cleaner.
    Geographic,
    /// Row identifier, dropped by the cleaner.
    Identifier,
    /// Vehicle type code, summarized into the side table and then dropped.
    VehicleType,
}

/// A field of the raw collision schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollisionField {
    CrashDate,
    CrashTime,
    Borough,
    ZipCode,
    Latitude,
    Longitude,
    Location,
    OnStreetName,
    CrossStreetName,
    OffStreetName,
    PersonsInjured,
    PersonsKilled,
    PedestriansInjured,
    PedestriansKilled,
    CyclistInjured,
    CyclistKilled,
    MotoristInjured,
    MotoristKilled,
    ContributingFactorVehicle1,
    ContributingFactorVehicle2,
    ContributingFactorVehicle3,
    ContributingFactorVehicle4,
    ContributingFactorVehicle5,
    CollisionId,
    VehicleTypeCode1,
    VehicleTypeCode2,
    VehicleTypeCode3,
    VehicleTypeCode4,
    VehicleTypeCode5,
}

impl CollisionField {
    /// Every field, in raw export column order.
    pub const ALL: &[Self] = &[
        Self::CrashDate,
        Self::CrashTime,
        Self::Borough,
        Self::ZipCode,
        Self::Latitude,
        Self::Longitude,
        Self::Location,
        Self::OnStreetName,
        Self::CrossStreetName,
        Self::OffStreetName,
        Self::PersonsInjured,
        Self::PersonsKilled,
        Self::PedestriansInjured,
        Self::PedestriansKilled,
        Self::CyclistInjured,
        Self::CyclistKilled,
        Self::MotoristInjured,
        Self::MotoristKilled,
        Self::ContributingFactorVehicle1,
        Self::ContributingFactorVehicle2,
        Self::ContributingFactorVehicle3,
        Self::ContributingFactorVehicle4,
        Self::ContributingFactorVehicle5,
        Self::CollisionId,
        Self::VehicleTypeCode1,
        Self::VehicleTypeCode2,
        Self::VehicleTypeCode3,
        Self::VehicleTypeCode4,
        Self::VehicleTypeCode5,
    ];

    /// The contributing factor fields, one per vehicle slot.
    pub const CONTRIBUTING_FACTORS: [Self; VEHICLE_SLOTS] = [
        Self::ContributingFactorVehicle1,
        Self::ContributingFactorVehicle2,
        Self::ContributingFactorVehicle3,
        Self::ContributingFactorVehicle4,
        Self::ContributingFactorVehicle5,
    ];

    /// The vehicle type code fields, one per vehicle slot.
    pub const VEHICLE_TYPES: [Self; VEHICLE_SLOTS] = [
        Self::VehicleTypeCode1,
        Self::VehicleTypeCode2,
        Self::VehicleTypeCode3,
        Self::VehicleTypeCode4,
        Self::VehicleTypeCode5,
    ];

    /// Header name in the raw CSV export.
    #[must_use]
    pub const fn raw_name(self) -> &'static str {
        match self {
            Self::CrashDate => "CRASH DATE",
            Self::CrashTime => "CRASH TIME",
            Self::Borough => "BOROUGH",
            Self::ZipCode => "ZIP CODE",
            Self::Latitude => "LATITUDE",
            Self::Longitude => "LONGITUDE",
            Self::Location => "LOCATION",
            Self::OnStreetName => "ON STREET NAME",
            Self::CrossStreetName => "CROSS STREET NAME",
            Self::OffStreetName => "OFF STREET NAME",
            Self::PersonsInjured => "NUMBER OF PERSONS INJURED",
            Self::PersonsKilled => "NUMBER OF PERSONS KILLED",
            Self::PedestriansInjured => "NUMBER OF PEDESTRIANS INJURED",
            Self::PedestriansKilled => "NUMBER OF PEDESTRIANS KILLED",
            Self::CyclistInjured => "NUMBER OF CYCLIST INJURED",
            Self::CyclistKilled => "NUMBER OF CYCLIST KILLED",
            Self::MotoristInjured => "NUMBER OF MOTORIST INJURED",
            Self::MotoristKilled => "NUMBER OF MOTORIST KILLED",
            Self::ContributingFactorVehicle1 => "CONTRIBUTING FACTOR VEHICLE 1",
            Self::ContributingFactorVehicle2 => "CONTRIBUTING FACTOR VEHICLE 2",
            Self::ContributingFactorVehicle3 => "CONTRIBUTING FACTOR VEHICLE 3",
            Self::ContributingFactorVehicle4 => "CONTRIBUTING FACTOR VEHICLE 4",
            Self::ContributingFactorVehicle5 => "CONTRIBUTING FACTOR VEHICLE 5",
            Self::CollisionId => "COLLISION_ID",
            Self::VehicleTypeCode1 => "VEHICLE TYPE CODE 1",
            Self::VehicleTypeCode2 => "VEHICLE TYPE CODE 2",
            Self::VehicleTypeCode3 => "VEHICLE TYPE CODE 3",
            Self::VehicleTypeCode4 => "VEHICLE TYPE CODE 4",
            Self::VehicleTypeCode5 => "VEHICLE TYPE CODE 5",
        }
    }

    /// Canonical column name used after the source boundary.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::CrashDate => "crash_date",
            Self::CrashTime => "crash_time",
            Self::Borough => "borough",
            Self::ZipCode => "zip_code",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Location => "location",
            Self::OnStreetName => "on_street_name",
            Self::CrossStreetName => "cross_street_name",
            Self::OffStreetName => "off_street_name",
            Self::PersonsInjured => "persons_injured",
            Self::PersonsKilled => "persons_killed",
            Self::PedestriansInjured => "pedestrians_injured",
            Self::PedestriansKilled => "pedestrians_killed",
            Self::CyclistInjured => "cyclist_injured",
            Self::CyclistKilled => "cyclist_killed",
            Self::MotoristInjured => "motorist_injured",
            Self::MotoristKilled => "motorist_killed",
            Self::ContributingFactorVehicle1 => "contributing_factor_vehicle_1",
            Self::ContributingFactorVehicle2 => "contributing_factor_vehicle_2",
            Self::ContributingFactorVehicle3 => "contributing_factor_vehicle_3",
            Self::ContributingFactorVehicle4 => "contributing_factor_vehicle_4",
            Self::ContributingFactorVehicle5 => "contributing_factor_vehicle_5",
            Self::CollisionId => "collision_id",
            Self::VehicleTypeCode1 => "vehicle_type_code_1",
            Self::VehicleTypeCode2 => "vehicle_type_code_2",
            Self::VehicleTypeCode3 => "vehicle_type_code_3",
            Self::VehicleTypeCode4 => "vehicle_type_code_4",
            Self::VehicleTypeCode5 => "vehicle_type_code_5",
        }
    }

    /// Storage type of the field once it has crossed the source boundary.
    #[must_use]
    pub const fn field_type(self) -> FieldType {
        match self {
            Self::Latitude | Self::Longitude => FieldType::Double,
            Self::PersonsInjured
            | Self::PersonsKilled
            | Self::PedestriansInjured
            | Self::PedestriansKilled
            | Self::CyclistInjured
            | Self::CyclistKilled
            | Self::MotoristInjured
            | Self::MotoristKilled
            | Self::CollisionId => FieldType::Bigint,
            _ => FieldType::Varchar,
        }
    }

    /// What the pipeline does with this field.
    #[must_use]
    pub const fn role(self) -> FieldRole {
        match self {
            Self::ZipCode
            | Self::Latitude
            | Self::Longitude
            | Self::Location
            | Self::OnStreetName
            | Self::CrossStreetName
            | Self::OffStreetName => FieldRole::Geographic,
            Self::CollisionId => FieldRole::Identifier,
            Self::PersonsInjured
            | Self::PersonsKilled
            | Self::PedestriansInjured
            | Self::PedestriansKilled
            | Self::CyclistInjured
            | Self::CyclistKilled
            | Self::MotoristInjured
            | Self::MotoristKilled => FieldRole::Casualty,
            Self::VehicleTypeCode1
            | Self::VehicleTypeCode2
            | Self::VehicleTypeCode3
            | Self::VehicleTypeCode4
            | Self::VehicleTypeCode5 => FieldRole::VehicleType,
            _ => FieldRole::Retained,
        }
    }

    /// Whether the cleaner removes this field.
    #[must_use]
    pub const fn dropped_by_cleaner(self) -> bool {
        matches!(self.role(), FieldRole::Geographic | FieldRole::Identifier)
    }

    /// Whether this field must always be read as raw text, even when the
    /// storage engine is allowed to infer types.
    ///
    /// The date and time fields are validated and parsed by the pipeline
    /// from their raw text form.
    #[must_use]
    pub const fn always_text(self) -> bool {
        matches!(self, Self::CrashDate | Self::CrashTime)
    }

    /// Looks up a field by its raw CSV header.
    #[must_use]
    pub fn from_raw_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.raw_name() == name)
    }

    /// Looks up a field by its canonical column name.
    #[must_use]
    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.column() == column)
    }
}

impl std::fmt::Display for CollisionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// A single field value borrowed from a [`RawCollision`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// Text value.
    Text(Option<&'a str>),
    /// Integer value.
    Integer(Option<i64>),
    /// Floating point value.
    Real(Option<f64>),
}

/// A raw collision record conforming to the schema contract.
///
/// Date and time stay as raw text; the pipeline validates and parses them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCollision {
    /// Crash date as exported (`MM/DD/YYYY`).
    pub crash_date: Option<String>,
    /// Crash time as exported (`H:MM` or `HH:MM`).
    pub crash_time: Option<String>,
    pub borough: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub on_street_name: Option<String>,
    pub cross_street_name: Option<String>,
    pub off_street_name: Option<String>,
    pub persons_injured: Option<i64>,
    pub persons_killed: Option<i64>,
    pub pedestrians_injured: Option<i64>,
    pub pedestrians_killed: Option<i64>,
    pub cyclist_injured: Option<i64>,
    pub cyclist_killed: Option<i64>,
    pub motorist_injured: Option<i64>,
    pub motorist_killed: Option<i64>,
    /// Contributing factor per vehicle slot.
    pub contributing_factors: [Option<String>; VEHICLE_SLOTS],
    pub collision_id: Option<i64>,
    /// Vehicle type code per vehicle slot.
    pub vehicle_types: [Option<String>; VEHICLE_SLOTS],
}

impl RawCollision {
    /// Creates a record with only the date and time set.
    #[must_use]
    pub fn new(crash_date: impl Into<String>, crash_time: impl Into<String>) -> Self {
        Self {
            crash_date: Some(crash_date.into()),
            crash_time: Some(crash_time.into()),
            ..Self::default()
        }
    }

    /// Returns the value stored for `field`.
    #[must_use]
    pub fn value(&self, field: CollisionField) -> FieldValue<'_> {
        use CollisionField as F;

        match field {
            F::CrashDate => FieldValue::Text(self.crash_date.as_deref()),
            F::CrashTime => FieldValue::Text(self.crash_time.as_deref()),
            F::Borough => FieldValue::Text(self.borough.as_deref()),
            F::ZipCode => FieldValue::Text(self.zip_code.as_deref()),
            F::Latitude => FieldValue::Real(self.latitude),
            F::Longitude => FieldValue::Real(self.longitude),
            F::Location => FieldValue::Text(self.location.as_deref()),
            F::OnStreetName => FieldValue::Text(self.on_street_name.as_deref()),
            F::CrossStreetName => FieldValue::Text(self.cross_street_name.as_deref()),
            F::OffStreetName => FieldValue::Text(self.off_street_name.as_deref()),
            F::PersonsInjured => FieldValue::Integer(self.persons_injured),
            F::PersonsKilled => FieldValue::Integer(self.persons_killed),
            F::PedestriansInjured => FieldValue::Integer(self.pedestrians_injured),
            F::PedestriansKilled => FieldValue::Integer(self.pedestrians_killed),
            F::CyclistInjured => FieldValue::Integer(self.cyclist_injured),
            F::CyclistKilled => FieldValue::Integer(self.cyclist_killed),
            F::MotoristInjured => FieldValue::Integer(self.motorist_injured),
            F::MotoristKilled => FieldValue::Integer(self.motorist_killed),
            F::ContributingFactorVehicle1 => FieldValue::Text(self.contributing_factors[0].as_deref()),
            F::ContributingFactorVehicle2 => FieldValue::Text(self.contributing_factors[1].as_deref()),
            F::ContributingFactorVehicle3 => FieldValue::Text(self.contributing_factors[2].as_deref()),
            F::ContributingFactorVehicle4 => FieldValue::Text(self.contributing_factors[3].as_deref()),
            F::ContributingFactorVehicle5 => FieldValue::Text(self.contributing_factors[4].as_deref()),
            F::CollisionId => FieldValue::Integer(self.collision_id),
            F::VehicleTypeCode1 => FieldValue::Text(self.vehicle_types[0].as_deref()),
            F::VehicleTypeCode2 => FieldValue::Text(self.vehicle_types[1].as_deref()),
            F::VehicleTypeCode3 => FieldValue::Text(self.vehicle_types[2].as_deref()),
            F::VehicleTypeCode4 => FieldValue::Text(self.vehicle_types[3].as_deref()),
            F::VehicleTypeCode5 => FieldValue::Text(self.vehicle_types[4].as_deref()),
        }
    }
}

/// Meteorological season used when seeding the date dimension.
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
pub enum Season {
    /// December through February.
    Winter,
    /// March through May.
    Spring,
    /// June through August.
    Summer,
    /// September through November.
    Autumn,
}

impl Season {
    pub const ALL: &[Self] = &[Self::Winter, Self::Spring, Self::Summer, Self::Autumn];

    /// Calendar months (1-12) belonging to this season.
    #[must_use]
    pub const fn months(self) -> [u32; 3] {
        match self {
            Self::Winter => [12, 1, 2],
            Self::Spring => [3, 4, 5],
            Self::Summer => [6, 7, 8],
            Self::Autumn => [9, 10, 11],
        }
    }

    /// Returns the season of a calendar month, or `None` outside 1-12.
    #[must_use]
    pub fn for_month(month: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|season| season.months().contains(&month))
    }
}
