//! In-memory record source.

use collision_metrics_collision_models::{CollisionField, FieldValue, RawCollision};
use collision_metrics_warehouse::to_count;
use duckdb::Connection;

use crate::{CollisionSource, RAW_TABLE, SourceError};

/// Number of records per INSERT chunk.
const CHUNK_SIZE: usize = 1_000;

/// Raw collision records already held in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordsSource {
    records: Vec<RawCollision>,
}

impl RecordsSource {
    #[must_use]
    pub const fn new(records: Vec<RawCollision>) -> Self {
        Self { records }
    }
}

impl From<Vec<RawCollision>> for RecordsSource {
    fn from(records: Vec<RawCollision>) -> Self {
        Self::new(records)
    }
}

impl CollisionSource for RecordsSource {
    fn describe(&self) -> String {
        format!("{} in-memory records", self.records.len())
    }

    fn load(&self, conn: &Connection) -> Result<u64, SourceError> {
        conn.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {RAW_TABLE} ({})",
            crate::raw_table_columns()
        ))?;

        let columns = CollisionField::ALL
            .iter()
            .map(|f| f.column())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = format!("({})", vec!["?"; CollisionField::ALL.len()].join(", "));

        let mut total_inserted = 0u64;

        for chunk in self.records.chunks(CHUNK_SIZE) {
            let mut sql = format!("INSERT INTO {RAW_TABLE} ({columns}) VALUES ");
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&placeholders);
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut param_idx = 1usize;

            for record in chunk {
                for &field in CollisionField::ALL {
                    match record.value(field) {
                        FieldValue::Text(v) => stmt.raw_bind_parameter(param_idx, v)?,
                        FieldValue::Integer(v) => stmt.raw_bind_parameter(param_idx, v)?,
                        FieldValue::Real(v) => stmt.raw_bind_parameter(param_idx, v)?,
                    }
                    param_idx += 1;
                }
            }

            let rows = stmt.raw_execute()?;
            total_inserted += to_count(rows)?;
        }

        log::info!("Loaded {total_inserted} rows from {}", self.describe());

        Ok(total_inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_records_with_contract_columns() {
        let mut first = RawCollision::new("03/01/2024", "3:15");
        first.contributing_factors[0] = Some("Unsafe Speed".to_string());
        first.persons_injured = Some(1);
        first.persons_killed = Some(0);
        first.vehicle_types[0] = Some("Sedan".to_string());
        first.latitude = Some(40.7);
        let second = RawCollision::new("bad-date", "9:00");

        let conn = Connection::open_in_memory().unwrap();
        let source = RecordsSource::new(vec![first, second]);
        assert_eq!(source.load(&conn).unwrap(), 2);
        assert_eq!(crate::count_raw_rows(&conn).unwrap(), 2);

        let (factor, vehicle, injured, latitude): (String, String, i64, f64) = conn
            .query_row(
                "SELECT contributing_factor_vehicle_1, vehicle_type_code_1, persons_injured, latitude
                 FROM raw_collisions WHERE crash_date = '03/01/2024'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(factor, "Unsafe Speed");
        assert_eq!(vehicle, "Sedan");
        assert_eq!(injured, 1);
        assert!((latitude - 40.7).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_source_creates_empty_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(RecordsSource::default().load(&conn).unwrap(), 0);
        assert_eq!(crate::count_raw_rows(&conn).unwrap(), 0);
    }

    #[test]
    fn reload_replaces_previous_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let source = RecordsSource::new(vec![RawCollision::new("03/01/2024", "3:15")]);
        source.load(&conn).unwrap();
        source.load(&conn).unwrap();
        assert_eq!(crate::count_raw_rows(&conn).unwrap(), 1);
    }

    #[test]
    fn chunks_large_batches() {
        let records = (0..2_500)
            .map(|i| RawCollision::new("03/01/2024", format!("{}:00", i % 24)))
            .collect();
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(RecordsSource::new(records).load(&conn).unwrap(), 2_500);
    }
}
