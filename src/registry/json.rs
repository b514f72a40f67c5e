//! Codecs for json and jsonb.
//!
//! json is plain UTF-8 text in both formats; jsonb binary carries a leading
//! version byte (currently 1) before the text.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{oid, FormatCode, Oid};
use crate::value::PgValue;

use super::{TypeCodec, TypeRegistry};

/// jsonb binary format version byte.
const JSONB_VERSION: u8 = 1;

pub(super) fn register_defaults(map: &mut HashMap<Oid, Arc<TypeCodec>>) {
    map.insert(
        oid::JSON,
        Arc::new(TypeCodec::new(encode_json, decode_json)),
    );
    map.insert(
        oid::JSONB,
        Arc::new(TypeCodec::new(encode_jsonb, decode_jsonb)),
    );
}

fn parse_json(bytes: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))
}

fn decode_json(_reg: &TypeRegistry, _format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    Ok(PgValue::Json(parse_json(bytes)?))
}

fn encode_json(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Json(v) => {
            serde_json::to_writer(&mut *buf, v)
                .map_err(|e| Error::Decode(format!("JSON serialization failed: {}", e)))?;
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::JSON)),
    }
}

fn decode_jsonb(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let payload = match format {
        FormatCode::Binary => {
            let (version, rest) = bytes
                .split_first()
                .ok_or_else(|| Error::Decode("empty jsonb payload".into()))?;
            if *version != JSONB_VERSION {
                return Err(Error::Decode(format!(
                    "unsupported jsonb version: {}",
                    version
                )));
            }
            rest
        }
        FormatCode::Text => bytes,
    };
    Ok(PgValue::Jsonb(parse_json(payload)?))
}

fn encode_jsonb(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Jsonb(v) => {
            buf.push(JSONB_VERSION);
            serde_json::to_writer(&mut *buf, v)
                .map_err(|e| Error::Decode(format!("JSON serialization failed: {}", e)))?;
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::JSONB)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonb_binary_has_version_byte() {
        let reg = TypeRegistry::new();
        let mut buf = Vec::new();
        encode_jsonb(&reg, &PgValue::Jsonb(serde_json::json!({"a": 1})), &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..], br#"{"a":1}"#);
    }

    #[test]
    fn jsonb_rejects_unknown_version() {
        let reg = TypeRegistry::new();
        assert!(decode_jsonb(&reg, FormatCode::Binary, b"\x02{}").is_err());
    }

    #[test]
    fn json_has_no_version_byte() {
        let reg = TypeRegistry::new();
        let decoded = decode_json(&reg, FormatCode::Binary, br#"[1,2]"#).unwrap();
        assert_eq!(decoded, PgValue::Json(serde_json::json!([1, 2])));
    }
}
