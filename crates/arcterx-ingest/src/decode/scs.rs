//! SCS shipboard sensor log decoder
//!
//! The ship's Scientific Computer System writes one `.Raw` file per sensor
//! per day, e.g. `CNAV3050-GGA-RAW_20230501-000000.Raw`. Every line starts
//! with a date and time, followed by the instrument's own sentence:
//!
//! ```text
//! 05/01/2023,00:00:01.512,$GPGGA,000001.50,1707.1234,N,13412.5678,E,2,09,0.9,12.3,M,,,,*5C
//! 05/01/2023,00:00:01.498,28.9141, 5.73220, 34.8312
//! ```
//!
//! NMEA-style lines carry their code in the third field. Bare numeric lines
//! take their code from the file name.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{query_builder::Separated, Postgres};
use std::path::Path;
use std::sync::LazyLock;

use super::{
    parse_optional_f64, ConflictPolicy, DecodeError, Decoded, LineDecoder, Record, SkipReason,
};
use crate::store::postgres::PgRecord;

/// Knots to metres per second
const KNOTS_TO_MPS: f64 = 1852.0 / 3600.0;

/// Basename pattern of the sensor files this decoder understands
pub const SCS_FILE_PATTERN: &str = r"^(SONIC-TWIND-RAW|PAR-RAW|BOW-MET-RAW|RAD|Campbell-RAD|BRIDGE-WIND-(?:STBD|PORT)-DRV-Data|CNAV3050-(?:GGA|VTG)-RAW|FLUOROMETER-RAW|TSG-RAW|SBE38-RAW|SS-RAW|KNUDSEN-PKEL99-RAW|MB-DEPTH)_(\d+)-\d+\.Raw$";

#[allow(clippy::expect_used)]
static SCS_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SCS_FILE_PATTERN).expect("SCS file pattern is valid"));

/// One timestamped reading from one sensor stream
#[derive(Debug, Clone, PartialEq)]
pub struct ScsRow {
    pub time: DateTime<Utc>,
    /// Sensor stream, taken from the file name
    pub name: String,
    /// Instrument code the values were decoded with
    pub code: String,
    pub values: Map<String, Value>,
}

impl Record for ScsRow {
    type Key = (DateTime<Utc>, String);

    const CONFLICT: ConflictPolicy = ConflictPolicy::ReplaceWithLatest;

    fn natural_key(&self) -> Self::Key {
        (self.time, self.name.clone())
    }
}

impl PgRecord for ScsRow {
    const TABLE: &'static str = "scs";
    const COLUMNS: &'static [&'static str] = &["time", "name", "code", "data"];
    const KEY_COLUMNS: &'static [&'static str] = &["time", "name"];

    fn push_binds<'args>(&self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.time)
            .push_bind(self.name.clone())
            .push_bind(self.code.clone())
            .push_bind(Value::Object(self.values.clone()));
    }
}

/// Sensor identity derived from the file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub sensor: String,
    /// Code used for lines that do not carry a `$` talker
    pub default_code: Option<&'static str>,
    /// Suffix for wind variables from the bridge anemometers
    pub wind_suffix: &'static str,
}

impl Instrument {
    pub fn from_file_name(file_name: &str) -> Result<Self, DecodeError> {
        let captures = SCS_FILE_RE
            .captures(file_name)
            .ok_or_else(|| DecodeError::UnknownInstrument(file_name.to_string()))?;
        let sensor = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DecodeError::UnknownInstrument(file_name.to_string()))?;

        let default_code = match sensor.as_str() {
            "TSG-RAW" => Some("TSG"),
            "SBE38-RAW" => Some("SBE38"),
            "SS-RAW" => Some("SS"),
            "FLUOROMETER-RAW" => Some("FLUOROMETER"),
            _ => None,
        };

        let wind_suffix = if sensor.contains("-STBD-") {
            "Stbd"
        } else if sensor.contains("-PORT-") {
            "Port"
        } else {
            ""
        };

        Ok(Self {
            sensor,
            default_code,
            wind_suffix,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScsDecoder;

type Fields<'a> = [&'a str];
type Values = Result<Option<Map<String, Value>>, SkipReason>;

fn field<'a>(fields: &Fields<'a>, index: usize) -> Result<&'a str, SkipReason> {
    fields.get(index).copied().ok_or(SkipReason::Truncated {
        found: fields.len(),
        required: index + 1,
    })
}

fn number(fields: &Fields<'_>, index: usize) -> Result<Value, SkipReason> {
    Ok(to_value(parse_optional_f64(field(fields, index)?)))
}

fn scaled(fields: &Fields<'_>, index: usize, norm: f64) -> Result<Value, SkipReason> {
    Ok(to_value(
        parse_optional_f64(field(fields, index)?).map(|v| v * norm),
    ))
}

fn to_value(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn values<const N: usize>(pairs: [(String, Value); N]) -> Values {
    Ok(Some(pairs.into_iter().collect()))
}

/// `ddmm.mmmm` plus hemisphere to signed decimal degrees
pub fn decode_deg_min(deg_min: &str, direction: &str) -> Option<f64> {
    let raw = deg_min.trim().parse::<f64>().ok()?;
    let mut sign = if raw < 0.0 { -1.0 } else { 1.0 };
    if matches!(direction.trim().to_ascii_uppercase().as_str(), "S" | "W") {
        sign = -sign;
    }
    let raw = raw.abs();
    let degrees = (raw / 100.0).floor();
    let minutes = raw % 100.0;
    Some(sign * (degrees + minutes / 60.0))
}

/// `MM/DD/YYYY` and `HH:MM:SS.fff`, rounded to the nearest second
fn parse_scs_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let stamp = format!("{} {}", date.trim(), time.trim());
    let t = NaiveDateTime::parse_from_str(&stamp, "%m/%d/%Y %H:%M:%S%.f")
        .ok()?
        .and_utc();
    let whole = t.with_nanosecond(0)?;
    if t.nanosecond() >= 500_000_000 {
        Some(whole + Duration::seconds(1))
    } else {
        Some(whole)
    }
}

impl ScsDecoder {
    fn decode_code(code: &str, fields: &Fields<'_>, instrument: &Instrument) -> Values {
        match code {
            "$DEPTH" => values([("depthMB".into(), number(fields, 3)?)]),
            "$GPGGA" => values([
                (
                    "lat".into(),
                    to_value(decode_deg_min(field(fields, 4)?, field(fields, 5)?)),
                ),
                (
                    "lon".into(),
                    to_value(decode_deg_min(field(fields, 6)?, field(fields, 7)?)),
                ),
            ]),
            "$GPVTG" => values([
                ("cog".into(), number(fields, 3)?),
                ("sog".into(), scaled(fields, 7, KNOTS_TO_MPS)?),
            ]),
            "$METED" => values([
                ("temperatureAir".into(), number(fields, 5)?),
                ("RH".into(), number(fields, 6)?),
                ("pressureAir".into(), number(fields, 7)?),
            ]),
            "$PKEL99" => {
                // Only soundings with a good bottom lock
                if field(fields, 4)? != "0" {
                    return Ok(None);
                }
                values([("depthKN".into(), number(fields, 3)?)])
            }
            "$PPAR" => values([("par".into(), number(fields, 3)?)]),
            "$RAD" => values([
                ("longWave".into(), number(fields, 4)?),
                ("shortWave".into(), number(fields, 6)?),
            ]),
            "$TWIND" => values([
                (format!("wSpd{}", instrument.wind_suffix), number(fields, 3)?),
                (format!("wDir{}", instrument.wind_suffix), number(fields, 4)?),
            ]),
            "$WIR37" => values([
                ("longWave".into(), number(fields, 7)?),
                ("shortWave".into(), number(fields, 10)?),
            ]),
            "SBE38" => values([("temperatureInlet".into(), number(fields, 2)?)]),
            "TSG" => values([
                ("temperatureTSG".into(), number(fields, 2)?),
                ("conductivity".into(), number(fields, 3)?),
                ("salinity".into(), number(fields, 4)?),
            ]),
            "SS" => values([("spdSound".into(), number(fields, 2)?)]),
            "FLUOROMETER" => {
                let items: Vec<&str> = field(fields, 2)?.split('\t').collect();
                if items.len() < 6 {
                    return Err(SkipReason::Truncated {
                        found: items.len(),
                        required: 6,
                    });
                }
                let count = |s: &str| {
                    s.trim()
                        .parse::<i64>()
                        .map(Value::from)
                        .map_err(|_| SkipReason::Malformed(format!("fluorometer count {}", s)))
                };
                values([
                    ("fluorometer".into(), count(items[4])?),
                    ("flThermistor".into(), count(items[5])?),
                ])
            }
            other => Err(SkipReason::UnsupportedCode(other.to_string())),
        }
    }
}

impl LineDecoder for ScsDecoder {
    type Row = ScsRow;
    type Context = Instrument;

    fn name(&self) -> &'static str {
        "scs"
    }

    fn context(&self, path: &Path) -> Result<Instrument, DecodeError> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or(DecodeError::BadFileName)?;
        Instrument::from_file_name(file_name)
    }

    fn decode(&self, instrument: &Instrument, line: &str) -> Decoded<ScsRow> {
        if line.is_empty() {
            return Decoded::skipped(SkipReason::Blank);
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 3 {
            return Decoded::skipped(SkipReason::Truncated {
                found: fields.len(),
                required: 3,
            });
        }

        let Some(time) = parse_scs_time(fields[0], fields[1]) else {
            return Decoded::skipped(SkipReason::BadTimestamp(format!(
                "{} {}",
                fields[0], fields[1]
            )));
        };

        let talker = fields[2].trim();
        let code = if talker.starts_with('$') {
            talker
        } else {
            match instrument.default_code {
                Some(code) => code,
                None => return Decoded::skipped(SkipReason::UnsupportedCode(talker.to_string())),
            }
        };

        match Self::decode_code(code, &fields, instrument) {
            Ok(Some(values)) => Decoded::Row(ScsRow {
                time,
                name: instrument.sensor.clone(),
                code: code.to_string(),
                values,
            }),
            Ok(None) => Decoded::skipped(SkipReason::Filtered("no bottom lock")),
            Err(reason) => Decoded::skipped(reason),
        }
    }
}
