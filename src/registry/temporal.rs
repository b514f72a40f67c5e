//! Codecs for date, time, timestamp, timestamptz, and interval.
//!
//! Binary timestamps count microseconds since 2000-01-01 00:00:00 (UTC for
//! timestamptz); dates count days since 2000-01-01; times count microseconds
//! since midnight. Intervals carry months, days, and microseconds separately.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::{Error, Result};
use crate::protocol::types::{oid, FormatCode, Oid};
use crate::value::{Interval, PgValue};

use super::{TypeCodec, TypeRegistry};

/// PostgreSQL epoch: 2000-01-01
const PG_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(d) => d,
    None => panic!("invalid date"),
};

/// Microseconds per second
const USECS_PER_SEC: i64 = 1_000_000;

pub(super) fn register_defaults(map: &mut HashMap<Oid, Arc<TypeCodec>>) {
    map.insert(
        oid::DATE,
        Arc::new(TypeCodec::new(encode_date, decode_date)),
    );
    map.insert(
        oid::TIME,
        Arc::new(TypeCodec::new(encode_time, decode_time)),
    );
    map.insert(
        oid::TIMESTAMP,
        Arc::new(TypeCodec::new(encode_timestamp, decode_timestamp)),
    );
    map.insert(
        oid::TIMESTAMPTZ,
        Arc::new(TypeCodec::new(encode_timestamptz, decode_timestamptz)),
    );
    map.insert(
        oid::INTERVAL,
        Arc::new(TypeCodec::new(encode_interval, decode_interval)),
    );
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {} length: {}", what, bytes.len())))
}

fn pg_epoch_datetime() -> NaiveDateTime {
    PG_EPOCH.and_hms_opt(0, 0, 0).expect("valid time")
}

// === date ===

fn decode_date(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let pg_days = i32::from_be_bytes(fixed(bytes, "date")?);
            PG_EPOCH
                .checked_add_signed(Duration::days(pg_days as i64))
                .ok_or_else(|| Error::Decode("date out of range".into()))?
        }
        FormatCode::Text => NaiveDate::parse_from_str(utf8(bytes)?, "%Y-%m-%d")
            .map_err(|e| Error::Decode(format!("invalid date: {}", e)))?,
    };
    Ok(PgValue::Date(value))
}

fn encode_date(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Date(d) => {
            let pg_days = d.signed_duration_since(PG_EPOCH).num_days() as i32;
            buf.extend_from_slice(&pg_days.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::DATE)),
    }
}

// === time ===

fn decode_time(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let usecs = i64::from_be_bytes(fixed(bytes, "time")?);
            let secs = (usecs / USECS_PER_SEC) as u32;
            let nano = ((usecs % USECS_PER_SEC) * 1000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nano)
                .ok_or_else(|| Error::Decode("time out of range".into()))?
        }
        FormatCode::Text => {
            let s = utf8(bytes)?;
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
                .map_err(|e| Error::Decode(format!("invalid time: {}", e)))?
        }
    };
    Ok(PgValue::Time(value))
}

fn encode_time(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Time(t) => {
            let usecs =
                (t.num_seconds_from_midnight() as i64) * USECS_PER_SEC + (t.nanosecond() as i64) / 1000;
            buf.extend_from_slice(&usecs.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::TIME)),
    }
}

// === timestamp ===

fn timestamp_from_micros(usecs: i64) -> Result<NaiveDateTime> {
    pg_epoch_datetime()
        .checked_add_signed(Duration::microseconds(usecs))
        .ok_or_else(|| Error::Decode("timestamp out of range".into()))
}

fn micros_from_timestamp(dt: &NaiveDateTime) -> Result<i64> {
    dt.signed_duration_since(pg_epoch_datetime())
        .num_microseconds()
        .ok_or_else(|| Error::Decode("timestamp out of range".into()))
}

fn parse_timestamp_text(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| Error::Decode(format!("invalid timestamp: {}", e)))
}

fn decode_timestamp(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => timestamp_from_micros(i64::from_be_bytes(fixed(bytes, "timestamp")?))?,
        FormatCode::Text => parse_timestamp_text(utf8(bytes)?)?,
    };
    Ok(PgValue::Timestamp(value))
}

fn encode_timestamp(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Timestamp(dt) => {
            buf.extend_from_slice(&micros_from_timestamp(dt)?.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::TIMESTAMP)),
    }
}

// === timestamptz ===

fn decode_timestamptz(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let naive = timestamp_from_micros(i64::from_be_bytes(fixed(bytes, "timestamptz")?))?;
            DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
        }
        FormatCode::Text => {
            let s = utf8(bytes)?;
            DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%#z"))
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Decode(format!("invalid timestamptz: {}", e)))?
        }
    };
    Ok(PgValue::TimestampTz(value))
}

fn encode_timestamptz(
    _reg: &TypeRegistry,
    value: &PgValue,
    buf: &mut Vec<u8>,
) -> Result<FormatCode> {
    match value {
        PgValue::TimestampTz(dt) => {
            buf.extend_from_slice(&micros_from_timestamp(&dt.naive_utc())?.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::TIMESTAMPTZ)),
    }
}

// === interval ===
//
// Binary layout: i64 microseconds, i32 days, i32 months.

fn decode_interval(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            if bytes.len() != 16 {
                return Err(Error::Decode(format!(
                    "invalid interval length: {}",
                    bytes.len()
                )));
            }
            let microseconds = i64::from_be_bytes(bytes[0..8].try_into().expect("len checked"));
            let days = i32::from_be_bytes(bytes[8..12].try_into().expect("len checked"));
            let months = i32::from_be_bytes(bytes[12..16].try_into().expect("len checked"));
            Interval {
                months,
                days,
                microseconds,
            }
        }
        FormatCode::Text => parse_interval_text(utf8(bytes)?)?,
    };
    Ok(PgValue::Interval(value))
}

fn encode_interval(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Interval(iv) => {
            buf.extend_from_slice(&iv.microseconds.to_be_bytes());
            buf.extend_from_slice(&iv.days.to_be_bytes());
            buf.extend_from_slice(&iv.months.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::INTERVAL)),
    }
}

/// Parse the default interval output style, e.g.
/// `1 year 2 mons 3 days 04:05:06.789` or `-04:05:06`.
fn parse_interval_text(s: &str) -> Result<Interval> {
    let mut interval = Interval::default();
    let bad = || Error::Decode(format!("invalid interval: {:?}", s));

    let mut tokens = s.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            // Clock part: [-]HH:MM:SS[.ffffff]
            let (sign, clock) = match token.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, token.strip_prefix('+').unwrap_or(token)),
            };
            let mut parts = clock.split(':');
            let hours: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
            let minutes: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
            let seconds_part = parts.next().ok_or_else(bad)?;
            if parts.next().is_some() {
                return Err(bad());
            }
            let (secs, micros) = match seconds_part.split_once('.') {
                Some((s, frac)) => {
                    let secs: i64 = s.parse().map_err(|_| bad())?;
                    // Right-pad the fraction to microseconds
                    let mut frac = frac.to_string();
                    while frac.len() < 6 {
                        frac.push('0');
                    }
                    let micros: i64 = frac[..6].parse().map_err(|_| bad())?;
                    (secs, micros)
                }
                None => (seconds_part.parse().map_err(|_| bad())?, 0),
            };
            interval.microseconds +=
                sign * ((hours * 3600 + minutes * 60 + secs) * USECS_PER_SEC + micros);
        } else {
            // "<n> <unit>" pair
            let n: i64 = token.parse().map_err(|_| bad())?;
            let unit = tokens.next().ok_or_else(bad)?;
            match unit.trim_end_matches('s') {
                "year" => interval.months += (n * 12) as i32,
                "mon" | "month" => interval.months += n as i32,
                "day" => interval.days += n as i32,
                _ => return Err(bad()),
            }
        }
    }

    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_binary_is_days_since_2000() {
        let reg = TypeRegistry::new();
        let mut buf = Vec::new();
        encode_date(
            &reg,
            &PgValue::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()),
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf, 1_i32.to_be_bytes());

        let decoded = decode_date(&reg, FormatCode::Binary, &(-1_i32).to_be_bytes()).unwrap();
        assert_eq!(
            decoded,
            PgValue::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap())
        );
    }

    #[test]
    fn timestamp_binary_is_micros_since_2000() {
        let reg = TypeRegistry::new();
        let decoded =
            decode_timestamp(&reg, FormatCode::Binary, &1_000_000_i64.to_be_bytes()).unwrap();
        assert_eq!(
            decoded,
            PgValue::Timestamp(
                NaiveDate::from_ymd_opt(2000, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 1)
                    .unwrap()
            )
        );
    }

    #[test]
    fn timestamp_text_parses() {
        let reg = TypeRegistry::new();
        let decoded =
            decode_timestamp(&reg, FormatCode::Text, b"2024-02-29 12:30:45.000001").unwrap();
        assert_eq!(
            decoded,
            PgValue::Timestamp(
                NaiveDate::from_ymd_opt(2024, 2, 29)
                    .unwrap()
                    .and_hms_micro_opt(12, 30, 45, 1)
                    .unwrap()
            )
        );
    }

    #[test]
    fn timestamptz_text_parses_short_offset() {
        let reg = TypeRegistry::new();
        let decoded =
            decode_timestamptz(&reg, FormatCode::Text, b"2024-01-01 00:00:00+00").unwrap();
        match decoded {
            PgValue::TimestampTz(dt) => assert_eq!(dt.timestamp(), 1704067200),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn interval_text_full_form() {
        let iv = parse_interval_text("1 year 2 mons 3 days 04:05:06.789").unwrap();
        assert_eq!(iv.months, 14);
        assert_eq!(iv.days, 3);
        assert_eq!(
            iv.microseconds,
            (4 * 3600 + 5 * 60 + 6) * USECS_PER_SEC + 789_000
        );
    }

    #[test]
    fn interval_text_negative_clock() {
        let iv = parse_interval_text("-1 days -04:05:06").unwrap();
        assert_eq!(iv.days, -1);
        assert_eq!(iv.microseconds, -(4 * 3600 + 5 * 60 + 6) * USECS_PER_SEC);
    }

    #[test]
    fn interval_binary_layout() {
        let reg = TypeRegistry::new();
        let mut buf = Vec::new();
        encode_interval(
            &reg,
            &PgValue::Interval(Interval {
                months: 2,
                days: 3,
                microseconds: 5,
            }),
            &mut buf,
        )
        .unwrap();
        assert_eq!(&buf[0..8], &5_i64.to_be_bytes());
        assert_eq!(&buf[8..12], &3_i32.to_be_bytes());
        assert_eq!(&buf[12..16], &2_i32.to_be_bytes());
    }
}
