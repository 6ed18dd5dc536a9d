//! SFMC glider position decoder
//!
//! One CSV per glider, named after the glider, with epoch-second times:
//!
//! ```text
//! time,lat,lon
//! 1731974400,17.5012,134.2210
//! ```

use chrono::{DateTime, Utc};
use sqlx::{query_builder::Separated, Postgres};
use std::path::Path;

use super::{
    from_epoch_seconds, parse_optional_f64, parse_timestamp, valid_latitude, valid_longitude,
    ConflictPolicy, DecodeError, Decoded, LineDecoder, Record, SkipReason,
};
use crate::store::postgres::PgRecord;

const SFMC_COLUMNS: usize = 3;

pub const SFMC_FILE_PATTERN: &str = r".+\.csv";

/// Device type recorded for every SFMC glider
pub const SFMC_DEVICE: &str = "slocum";

#[derive(Debug, Clone, PartialEq)]
pub struct SfmcRow {
    pub time: DateTime<Utc>,
    pub name: String,
    pub device: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Record for SfmcRow {
    type Key = (DateTime<Utc>, String);

    const CONFLICT: ConflictPolicy = ConflictPolicy::KeepFirst;

    fn natural_key(&self) -> Self::Key {
        (self.time, self.name.clone())
    }
}

impl PgRecord for SfmcRow {
    const TABLE: &'static str = "sfmc";
    const COLUMNS: &'static [&'static str] = &["time", "name", "type", "latitude", "longitude"];
    const KEY_COLUMNS: &'static [&'static str] = &["time", "name"];

    fn push_binds<'args>(&self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.time)
            .push_bind(self.name.clone())
            .push_bind(self.device.clone())
            .push_bind(self.latitude)
            .push_bind(self.longitude);
    }
}

/// Glider identity taken from the file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glider {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SfmcDecoder;

impl SfmcDecoder {
    fn is_expected_header(fields: &[&str]) -> bool {
        fields.len() >= SFMC_COLUMNS
            && fields[0].eq_ignore_ascii_case("time")
            && ["lat", "latitude"]
                .iter()
                .any(|c| fields[1].eq_ignore_ascii_case(c))
            && ["lon", "longitude"]
                .iter()
                .any(|c| fields[2].eq_ignore_ascii_case(c))
    }

    /// A full row of names rather than values
    fn is_column_names(fields: &[&str]) -> bool {
        fields.len() >= SFMC_COLUMNS
            && fields.iter().all(|f| {
                f.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                    && f.parse::<f64>().is_err()
            })
    }
}

impl LineDecoder for SfmcDecoder {
    type Row = SfmcRow;
    type Context = Glider;

    fn name(&self) -> &'static str {
        "sfmc"
    }

    fn context(&self, path: &Path) -> Result<Glider, DecodeError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or(DecodeError::BadFileName)?;
        Ok(Glider {
            name: name.to_string(),
        })
    }

    fn decode(&self, glider: &Glider, line: &str) -> Decoded<SfmcRow> {
        if line.is_empty() {
            return Decoded::skipped(SkipReason::Blank);
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if Self::is_expected_header(&fields) {
            return Decoded::skipped(SkipReason::Header);
        }
        if fields.len() < SFMC_COLUMNS {
            return Decoded::skipped(SkipReason::Truncated {
                found: fields.len(),
                required: SFMC_COLUMNS,
            });
        }

        let time = fields[0]
            .parse::<f64>()
            .ok()
            .and_then(from_epoch_seconds)
            .or_else(|| parse_timestamp(fields[0]));
        let Some(time) = time else {
            return Decoded::skipped(SkipReason::BadTimestamp(fields[0].to_string()));
        };

        Decoded::Row(SfmcRow {
            time,
            name: glider.name.clone(),
            device: SFMC_DEVICE.to_string(),
            latitude: valid_latitude(parse_optional_f64(fields[1])),
            longitude: valid_longitude(parse_optional_f64(fields[2])),
        })
    }

    /// A leading header must name `time,lat,lon` in that order
    fn decode_first(&self, glider: &Glider, line: &str) -> Decoded<SfmcRow> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if Self::is_column_names(&fields) && !Self::is_expected_header(&fields) {
            return Decoded::Fatal(DecodeError::UnexpectedHeader {
                expected: "time,lat,lon".to_string(),
                found: fields.join(","),
            });
        }
        self.decode(glider, line)
    }
}
