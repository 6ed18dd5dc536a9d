//! Drifter CSV decoder
//!
//! Files are named `drifter.<YYYYWW>.csv` and grow as new fixes are fetched
//! from the drifter service:
//!
//! ```text
//! id,t,lat,lon,sst,slp,battery,drogue
//! 300534062894740,2024-05-01 12:00:00+00:00,17.2031,134.0987,29.41,1009.2,7.9,188
//! ```

use chrono::{DateTime, Utc};
use sqlx::{query_builder::Separated, Postgres};
use std::path::Path;

use super::{
    parse_optional_f64, parse_timestamp, valid_latitude, valid_longitude, ConflictPolicy,
    DecodeError, Decoded, LineDecoder, Record, SkipReason,
};
use crate::store::postgres::PgRecord;

/// File names the drifter fetcher writes
pub const DRIFTER_FILE_PATTERN: &str = r"drifter\.[0-9]+\.csv";

/// Columns a complete drifter line carries
pub const DRIFTER_COLUMNS: usize = 8;

/// Transmitter value meaning "no SST reading"
const SST_MISSING: f64 = -5.0;

/// Transmitter value meaning "no SLP reading"
const SLP_MISSING: f64 = 850.0;

/// One drifter fix
#[derive(Debug, Clone, PartialEq)]
pub struct DrifterRow {
    pub id: String,
    pub t: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub sst: Option<f64>,
    pub slp: Option<f64>,
    pub battery: Option<f64>,
    pub drogue_counts: Option<f64>,
}

impl Record for DrifterRow {
    type Key = (DateTime<Utc>, String);

    const CONFLICT: ConflictPolicy = ConflictPolicy::KeepFirst;

    fn natural_key(&self) -> Self::Key {
        (self.t, self.id.clone())
    }
}

impl PgRecord for DrifterRow {
    const TABLE: &'static str = "drifter";
    const COLUMNS: &'static [&'static str] =
        &["id", "t", "lat", "lon", "sst", "slp", "battery", "droguecounts"];
    const KEY_COLUMNS: &'static [&'static str] = &["t", "id"];

    fn push_binds<'args>(&self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.id.clone())
            .push_bind(self.t)
            .push_bind(self.lat)
            .push_bind(self.lon)
            .push_bind(self.sst)
            .push_bind(self.slp)
            .push_bind(self.battery)
            .push_bind(self.drogue_counts);
    }
}

/// Decoder for `drifter.*.csv`
#[derive(Debug, Clone, Default)]
pub struct DrifterDecoder;

impl LineDecoder for DrifterDecoder {
    type Row = DrifterRow;
    type Context = ();

    fn name(&self) -> &'static str {
        "drifter"
    }

    fn context(&self, _path: &Path) -> Result<(), DecodeError> {
        Ok(())
    }

    fn decode(&self, _ctx: &(), line: &str) -> Decoded<DrifterRow> {
        if line.is_empty() {
            return Decoded::skipped(SkipReason::Blank);
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < DRIFTER_COLUMNS {
            return Decoded::skipped(SkipReason::Truncated {
                found: fields.len(),
                required: DRIFTER_COLUMNS,
            });
        }

        if fields[0].eq_ignore_ascii_case("id") {
            return Decoded::skipped(SkipReason::Header);
        }
        if fields[0].is_empty() {
            return Decoded::skipped(SkipReason::Malformed("empty drifter id".to_string()));
        }

        let Some(t) = parse_timestamp(fields[1]) else {
            return Decoded::skipped(SkipReason::BadTimestamp(fields[1].to_string()));
        };

        Decoded::Row(DrifterRow {
            id: fields[0].to_string(),
            t,
            lat: valid_latitude(parse_optional_f64(fields[2])),
            lon: valid_longitude(parse_optional_f64(fields[3])),
            sst: parse_optional_f64(fields[4]).filter(|v| *v != SST_MISSING),
            slp: parse_optional_f64(fields[5]).filter(|v| *v != SLP_MISSING),
            battery: parse_optional_f64(fields[6]),
            drogue_counts: parse_optional_f64(fields[7]),
        })
    }
}
