//! Codecs for booleans, integers, floats, NUMERIC, strings, and bytea.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::types::{oid, FormatCode, Oid};
use crate::value::PgValue;

use super::{TypeCodec, TypeRegistry};

pub(super) fn register_defaults(map: &mut HashMap<Oid, Arc<TypeCodec>>) {
    map.insert(
        oid::BOOL,
        Arc::new(TypeCodec::new(encode_bool, decode_bool)),
    );
    map.insert(
        oid::INT2,
        Arc::new(TypeCodec::new(encode_int2, decode_int2)),
    );
    map.insert(
        oid::INT4,
        Arc::new(TypeCodec::new(encode_int4, decode_int4)),
    );
    map.insert(
        oid::INT8,
        Arc::new(TypeCodec::new(encode_int8, decode_int8)),
    );
    map.insert(
        oid::FLOAT4,
        Arc::new(TypeCodec::new(encode_float4, decode_float4)),
    );
    map.insert(
        oid::FLOAT8,
        Arc::new(TypeCodec::new(encode_float8, decode_float8)),
    );
    map.insert(
        oid::NUMERIC,
        Arc::new(TypeCodec::new(encode_numeric, decode_numeric)),
    );
    for text_oid in [oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME, oid::CHAR] {
        map.insert(text_oid, Arc::new(TypeCodec::new(encode_text, decode_text)));
    }
    map.insert(
        oid::BYTEA,
        Arc::new(TypeCodec::new(encode_bytea, decode_bytea)),
    );
    map.insert(
        oid::UUID,
        Arc::new(TypeCodec::new(encode_uuid, decode_uuid)),
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

// === bool ===

fn decode_bool(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            if bytes.len() != 1 {
                return Err(Error::Decode(format!(
                    "invalid boolean length: {}",
                    bytes.len()
                )));
            }
            bytes[0] != 0
        }
        FormatCode::Text => match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => true,
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => false,
            _ => {
                return Err(Error::Decode(format!(
                    "invalid boolean: {:?}",
                    String::from_utf8_lossy(bytes)
                )))
            }
        },
    };
    Ok(PgValue::Bool(value))
}

fn encode_bool(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Bool(b) => {
            buf.push(*b as u8);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::BOOL)),
    }
}

// === integers ===

macro_rules! int_codec {
    ($decode:ident, $encode:ident, $ty:ty, $variant:ident, $oid:expr, $name:literal) => {
        fn $decode(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
            let value = match format {
                FormatCode::Binary => <$ty>::from_be_bytes(fixed(bytes, $name)?),
                FormatCode::Text => utf8(bytes)?
                    .parse()
                    .map_err(|e| Error::Decode(format!("invalid {}: {}", $name, e)))?,
            };
            Ok(PgValue::$variant(value))
        }

        fn $encode(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match value {
                PgValue::$variant(v) => {
                    buf.extend_from_slice(&v.to_be_bytes());
                    Ok(FormatCode::Binary)
                }
                _ => Err(Error::UnsupportedType($oid)),
            }
        }
    };
}

int_codec!(decode_int2, encode_int2, i16, Int2, oid::INT2, "int2");
int_codec!(decode_int4, encode_int4, i32, Int4, oid::INT4, "int4");
int_codec!(decode_int8, encode_int8, i64, Int8, oid::INT8, "int8");

// === floats ===

fn parse_float_text<T>(bytes: &[u8], name: &str) -> Result<T>
where
    T: std::str::FromStr + FloatSpecial,
    T::Err: std::fmt::Display,
{
    let s = utf8(bytes)?;
    match s {
        "NaN" => Ok(T::nan()),
        "Infinity" => Ok(T::infinity()),
        "-Infinity" => Ok(T::neg_infinity()),
        _ => s
            .parse()
            .map_err(|e| Error::Decode(format!("invalid {}: {}", name, e))),
    }
}

trait FloatSpecial {
    fn nan() -> Self;
    fn infinity() -> Self;
    fn neg_infinity() -> Self;
}

impl FloatSpecial for f32 {
    fn nan() -> Self {
        f32::NAN
    }
    fn infinity() -> Self {
        f32::INFINITY
    }
    fn neg_infinity() -> Self {
        f32::NEG_INFINITY
    }
}

impl FloatSpecial for f64 {
    fn nan() -> Self {
        f64::NAN
    }
    fn infinity() -> Self {
        f64::INFINITY
    }
    fn neg_infinity() -> Self {
        f64::NEG_INFINITY
    }
}

fn decode_float4(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => f32::from_be_bytes(fixed(bytes, "float4")?),
        FormatCode::Text => parse_float_text(bytes, "float4")?,
    };
    Ok(PgValue::Float4(value))
}

fn encode_float4(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Float4(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::FLOAT4)),
    }
}

fn decode_float8(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => f64::from_be_bytes(fixed(bytes, "float8")?),
        FormatCode::Text => parse_float_text(bytes, "float8")?,
    };
    Ok(PgValue::Float8(value))
}

fn encode_float8(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Float8(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::FLOAT8)),
    }
}

// === NUMERIC ===
//
// Binary layout (PostgreSQL numeric.c):
// - ndigits: i16 - number of base-10000 digits
// - weight: i16 - weight of first digit (power of 10000)
// - sign: u16 - 0x0000 positive, 0x4000 negative, 0xC000 NaN,
//   0xD000 +Inf, 0xF000 -Inf
// - dscale: u16 - display scale
// - digits: ndigits * i16, each 0..=9999

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn numeric_from_binary(bytes: &[u8]) -> Result<Decimal> {
    if bytes.len() < 8 {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {}",
            bytes.len()
        )));
    }

    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);

    match sign {
        NUMERIC_NAN | NUMERIC_PINF | NUMERIC_NINF => {
            return Err(Error::Decode(
                "NUMERIC special value cannot be represented as Decimal".into(),
            ))
        }
        _ => {}
    }

    if ndigits == 0 {
        return Ok(Decimal::ZERO);
    }

    let expected_len = 8 + ndigits as usize * 2;
    if bytes.len() < expected_len {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {} (expected {})",
            bytes.len(),
            expected_len
        )));
    }

    let overflow = || Error::Decode("NUMERIC value out of range for Decimal".into());

    let mut acc: i128 = 0;
    for i in 0..ndigits as usize {
        let offset = 8 + i * 2;
        let digit = i16::from_be_bytes([bytes[offset], bytes[offset + 1]]) as i128;
        acc = acc
            .checked_mul(10000)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(overflow)?;
    }

    // True value = acc * 10000^(weight - ndigits + 1)
    let exp = weight - ndigits + 1;
    let mut scale: u32 = 0;
    if exp >= 0 {
        for _ in 0..exp {
            acc = acc.checked_mul(10000).ok_or_else(overflow)?;
        }
    } else {
        scale = (-exp * 4) as u32;
    }

    // Shed trailing zeros if the scale exceeds what Decimal can carry
    while scale > 28 && acc % 10 == 0 {
        acc /= 10;
        scale -= 1;
    }
    if scale > 28 {
        return Err(overflow());
    }

    if sign == NUMERIC_NEG {
        acc = -acc;
    }

    Decimal::try_from_i128_with_scale(acc, scale).map_err(|_| overflow())
}

fn decode_numeric(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => numeric_from_binary(bytes)?,
        FormatCode::Text => {
            let s = utf8(bytes)?;
            Decimal::from_str_exact(s)
                .map_err(|e| Error::Decode(format!("invalid numeric: {}", e)))?
        }
    };
    Ok(PgValue::Numeric(value))
}

fn numeric_to_binary(d: &Decimal, buf: &mut Vec<u8>) {
    let dscale = d.scale() as u16;
    let mantissa = d.mantissa();
    let negative = mantissa < 0;
    let mut m = mantissa.unsigned_abs();

    if m == 0 {
        buf.extend_from_slice(&0_i16.to_be_bytes()); // ndigits
        buf.extend_from_slice(&0_i16.to_be_bytes()); // weight
        buf.extend_from_slice(&0_u16.to_be_bytes()); // sign
        buf.extend_from_slice(&dscale.to_be_bytes());
        return;
    }

    // Pad the fractional digits to a multiple of 4 so base-10000 group
    // boundaries line up with the decimal point.
    let pad = (4 - d.scale() % 4) % 4;
    for _ in 0..pad {
        m *= 10;
    }
    let frac_groups = ((d.scale() + pad) / 4) as i32;

    let mut groups = Vec::new();
    while m > 0 {
        groups.push((m % 10000) as i16);
        m /= 10000;
    }
    groups.reverse();

    let mut weight = groups.len() as i32 - frac_groups - 1;

    // Strip zero groups at both ends; leading zeros shift the weight
    while groups.last() == Some(&0) {
        groups.pop();
    }
    let leading = groups.iter().take_while(|&&g| g == 0).count();
    groups.drain(..leading);
    weight -= leading as i32;

    let sign: u16 = if negative { NUMERIC_NEG } else { 0 };
    buf.extend_from_slice(&(groups.len() as i16).to_be_bytes());
    buf.extend_from_slice(&(weight as i16).to_be_bytes());
    buf.extend_from_slice(&sign.to_be_bytes());
    buf.extend_from_slice(&dscale.to_be_bytes());
    for g in groups {
        buf.extend_from_slice(&g.to_be_bytes());
    }
}

fn encode_numeric(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Numeric(d) => {
            numeric_to_binary(d, buf);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::NUMERIC)),
    }
}

// === text family ===

fn decode_text(_reg: &TypeRegistry, _format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    // Text and binary representations are identical for the text family
    Ok(PgValue::Text(utf8(bytes)?.to_string()))
}

fn encode_text(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Text(s) => {
            buf.extend_from_slice(s.as_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::TEXT)),
    }
}

// === bytea ===

/// Decode a hex string (without the `\x` prefix) to bytes.
fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    fn hex_digit(b: u8) -> Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
        }
    }

    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        result.push((hex_digit(chunk[0])? << 4) | hex_digit(chunk[1])?);
    }
    Ok(result)
}

fn decode_bytea(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => bytes.to_vec(),
        FormatCode::Text => {
            // Text format is hex-encoded: \x followed by hex digits
            match bytes.strip_prefix(b"\\x") {
                Some(hex) => decode_hex(hex)?,
                None => return Err(Error::Decode("bytea text format missing \\x prefix".into())),
            }
        }
    };
    Ok(PgValue::Bytea(value))
}

fn encode_bytea(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Bytea(b) => {
            buf.extend_from_slice(b);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::BYTEA)),
    }
}

// === uuid ===

fn decode_uuid(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => uuid::Uuid::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))?,
        FormatCode::Text => uuid::Uuid::parse_str(utf8(bytes)?)
            .map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))?,
    };
    Ok(PgValue::Uuid(value))
}

fn encode_uuid(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Uuid(u) => {
            buf.extend_from_slice(u.as_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::UUID)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // Helper to build NUMERIC binary representation
    fn make_numeric(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ndigits.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for &d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn numeric_binary_integer() {
        // 12345 = digits [1, 2345], weight 1
        let bytes = make_numeric(2, 1, 0x0000, 0, &[1, 2345]);
        assert_eq!(
            numeric_from_binary(&bytes).unwrap(),
            Decimal::from_str("12345").unwrap()
        );
    }

    #[test]
    fn numeric_binary_decimal() {
        // 123.45: weight 0, digits [123, 4500]
        let bytes = make_numeric(2, 0, 0x0000, 2, &[123, 4500]);
        assert_eq!(
            numeric_from_binary(&bytes).unwrap(),
            Decimal::from_str("123.45").unwrap()
        );
    }

    #[test]
    fn numeric_binary_negative() {
        let bytes = make_numeric(2, 0, NUMERIC_NEG, 2, &[123, 4500]);
        assert_eq!(
            numeric_from_binary(&bytes).unwrap(),
            Decimal::from_str("-123.45").unwrap()
        );
    }

    #[test]
    fn numeric_binary_small_fraction() {
        // 0.0001: weight -1, digits [1]
        let bytes = make_numeric(1, -1, 0x0000, 4, &[1]);
        assert_eq!(
            numeric_from_binary(&bytes).unwrap(),
            Decimal::from_str("0.0001").unwrap()
        );
    }

    #[test]
    fn numeric_binary_zero() {
        let bytes = make_numeric(0, 0, 0x0000, 0, &[]);
        assert_eq!(numeric_from_binary(&bytes).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn numeric_binary_trailing_group_padding() {
        // 7.2 is stored as digits [7, 2000] with dscale 1
        let bytes = make_numeric(2, 0, 0x0000, 1, &[7, 2000]);
        assert_eq!(
            numeric_from_binary(&bytes).unwrap(),
            Decimal::from_str("7.2").unwrap()
        );
    }

    #[test]
    fn numeric_special_values_are_rejected() {
        for sign in [NUMERIC_NAN, NUMERIC_PINF, NUMERIC_NINF] {
            let bytes = make_numeric(0, 0, sign, 0, &[]);
            assert!(numeric_from_binary(&bytes).is_err());
        }
    }

    #[test]
    fn numeric_to_binary_matches_wire_layout() {
        let mut buf = Vec::new();
        numeric_to_binary(&Decimal::from_str("123.45").unwrap(), &mut buf);
        assert_eq!(buf, make_numeric(2, 0, 0x0000, 2, &[123, 4500]));

        buf.clear();
        numeric_to_binary(&Decimal::from_str("-123.45").unwrap(), &mut buf);
        assert_eq!(buf, make_numeric(2, 0, NUMERIC_NEG, 2, &[123, 4500]));

        buf.clear();
        numeric_to_binary(&Decimal::from_str("12345").unwrap(), &mut buf);
        assert_eq!(buf, make_numeric(2, 1, 0x0000, 0, &[1, 2345]));

        buf.clear();
        numeric_to_binary(&Decimal::from_str("0.0001").unwrap(), &mut buf);
        assert_eq!(buf, make_numeric(1, -1, 0x0000, 4, &[1]));

        buf.clear();
        numeric_to_binary(&Decimal::ZERO, &mut buf);
        assert_eq!(buf, make_numeric(0, 0, 0x0000, 0, &[]));
    }

    #[test]
    fn numeric_binary_round_trip_value_equality() {
        for s in ["0", "1", "-1", "1.0000", "10000", "0.00001234", "99999999.99999999"] {
            let d = Decimal::from_str(s).unwrap();
            let mut buf = Vec::new();
            numeric_to_binary(&d, &mut buf);
            assert_eq!(numeric_from_binary(&buf).unwrap(), d, "round trip {}", s);
        }
    }

    #[test]
    fn bytea_text_hex() {
        let reg = TypeRegistry::new();
        assert_eq!(
            decode_bytea(&reg, FormatCode::Text, b"\\xDEADBEEF").unwrap(),
            PgValue::Bytea(vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
        assert!(decode_bytea(&reg, FormatCode::Text, b"DEAD").is_err());
    }

    #[test]
    fn bool_text_variants() {
        let reg = TypeRegistry::new();
        for t in [&b"t"[..], b"true", b"1"] {
            assert_eq!(
                decode_bool(&reg, FormatCode::Text, t).unwrap(),
                PgValue::Bool(true)
            );
        }
        assert_eq!(
            decode_bool(&reg, FormatCode::Text, b"f").unwrap(),
            PgValue::Bool(false)
        );
        assert!(decode_bool(&reg, FormatCode::Text, b"yes").is_err());
    }

    #[test]
    fn int_binary_length_checked() {
        let reg = TypeRegistry::new();
        assert!(decode_int4(&reg, FormatCode::Binary, &[0, 0, 1]).is_err());
        assert_eq!(
            decode_int4(&reg, FormatCode::Binary, &[0, 0, 0x30, 0x39]).unwrap(),
            PgValue::Int4(12345)
        );
    }

    #[test]
    fn float_text_specials() {
        let reg = TypeRegistry::new();
        match decode_float8(&reg, FormatCode::Text, b"NaN").unwrap() {
            PgValue::Float8(v) => assert!(v.is_nan()),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            decode_float8(&reg, FormatCode::Text, b"-Infinity").unwrap(),
            PgValue::Float8(f64::NEG_INFINITY)
        );
    }
}
