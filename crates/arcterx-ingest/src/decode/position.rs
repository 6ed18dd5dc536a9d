//! Ship position log decoder
//!
//! The ship's data logger writes tab-separated `*.SPAFRM` files whose fourth
//! field is a JSON fix:
//!
//! ```text
//! 2024-11-18T00:00:01Z<TAB>SPAFRM<TAB>gps<TAB>{"time": 1731888001.2, "latitude": 17.1, "longitude": 134.5}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{query_builder::Separated, Postgres};
use std::path::Path;

use super::{
    from_epoch_seconds, valid_latitude, valid_longitude, ConflictPolicy, DecodeError, Decoded,
    LineDecoder, Record, SkipReason,
};
use crate::store::postgres::PgRecord;

const POSITION_FIELDS: usize = 4;

pub const POSITION_FILE_PATTERN: &str = r".+\.SPAFRM";

pub const DEFAULT_SHIP_NAME: &str = "nautilus";
pub const DEFAULT_SHIP_CLASS: &str = "ship";

#[derive(Debug, Clone, PartialEq)]
pub struct PositionRow {
    pub time: DateTime<Utc>,
    pub name: String,
    pub class: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Record for PositionRow {
    type Key = (DateTime<Utc>, String, String);

    const CONFLICT: ConflictPolicy = ConflictPolicy::KeepFirst;

    fn natural_key(&self) -> Self::Key {
        (self.time, self.name.clone(), self.class.clone())
    }
}

impl PgRecord for PositionRow {
    const TABLE: &'static str = "position";
    const COLUMNS: &'static [&'static str] = &["time", "name", "class", "latitude", "longitude"];
    const KEY_COLUMNS: &'static [&'static str] = &["time", "name", "class"];

    fn push_binds<'args>(&self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.time)
            .push_bind(self.name.clone())
            .push_bind(self.class.clone())
            .push_bind(self.latitude)
            .push_bind(self.longitude);
    }
}

#[derive(Debug, Deserialize)]
struct Fix {
    time: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Decoder for the ship's position logs
#[derive(Debug, Clone)]
pub struct PositionDecoder {
    name: String,
    class: String,
}

impl PositionDecoder {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
        }
    }
}

impl Default for PositionDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_SHIP_NAME, DEFAULT_SHIP_CLASS)
    }
}

impl LineDecoder for PositionDecoder {
    type Row = PositionRow;
    type Context = ();

    fn name(&self) -> &'static str {
        "position"
    }

    fn context(&self, _path: &Path) -> Result<(), DecodeError> {
        Ok(())
    }

    fn decode(&self, _ctx: &(), line: &str) -> Decoded<PositionRow> {
        if line.is_empty() {
            return Decoded::skipped(SkipReason::Blank);
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < POSITION_FIELDS {
            return Decoded::skipped(SkipReason::Truncated {
                found: fields.len(),
                required: POSITION_FIELDS,
            });
        }

        let fix: Fix = match serde_json::from_str(fields[3].trim()) {
            Ok(fix) => fix,
            Err(e) => return Decoded::skipped(SkipReason::Malformed(e.to_string())),
        };

        let Some(time) = fix.time.and_then(from_epoch_seconds) else {
            return Decoded::skipped(SkipReason::BadTimestamp(fields[3].to_string()));
        };

        Decoded::Row(PositionRow {
            time,
            name: self.name.clone(),
            class: self.class.clone(),
            latitude: valid_latitude(fix.latitude),
            longitude: valid_longitude(fix.longitude),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fix() {
        let line = "2024-11-18T00:00:01Z\tSPAFRM\tgps\t{\"time\": 1731888001, \"latitude\": 17.1, \"longitude\": 134.5}";
        let row = PositionDecoder::default().decode(&(), line).row().unwrap();

        assert_eq!(row.time.timestamp(), 1_731_888_001);
        assert_eq!(row.name, "nautilus");
        assert_eq!(row.class, "ship");
        assert_eq!(row.latitude, Some(17.1));
        assert_eq!(row.longitude, Some(134.5));
    }

    #[test]
    fn test_short_and_malformed_lines() {
        let decoder = PositionDecoder::default();
        assert!(matches!(
            decoder.decode(&(), "a\tb\tc"),
            Decoded::Skipped(SkipReason::Truncated { found: 3, .. })
        ));
        assert!(matches!(
            decoder.decode(&(), "a\tb\tc\t{\"time\": 17"),
            Decoded::Skipped(SkipReason::Malformed(_))
        ));
        assert!(matches!(
            decoder.decode(&(), "a\tb\tc\t{\"latitude\": 1.0}"),
            Decoded::Skipped(SkipReason::BadTimestamp(_))
        ));
    }

    #[test]
    fn test_custom_platform() {
        let decoder = PositionDecoder::new("thompson", "ship");
        let row = decoder
            .decode(&(), "x\ty\tz\t{\"time\": 0, \"latitude\": 100, \"longitude\": 1}")
            .row()
            .unwrap();
        assert_eq!(row.name, "thompson");
        assert_eq!(row.latitude, None);
    }
}
