//! Codec for arrays of registered element types.
//!
//! Binary layout: i32 ndim, i32 hasnulls, u32 element OID, then per
//! dimension (i32 length, i32 lower bound), then per element an i32 length
//! (-1 for NULL) and the element payload in its binary format. Elements are
//! stored flat in row-major order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::{oid, FormatCode, Oid};
use crate::value::{ArrayDim, PgArray, PgValue};

use super::{TypeCodec, TypeRegistry};

/// Dimension sanity bound, matching the server's MAXDIM.
const MAX_DIM: i32 = 6;

pub(super) fn register_defaults(map: &mut HashMap<Oid, Arc<TypeCodec>>) {
    let array_oids = [
        oid::BOOL_ARRAY,
        oid::BYTEA_ARRAY,
        oid::INT2_ARRAY,
        oid::INT4_ARRAY,
        oid::INT8_ARRAY,
        oid::TEXT_ARRAY,
        oid::VARCHAR_ARRAY,
        oid::FLOAT4_ARRAY,
        oid::FLOAT8_ARRAY,
        oid::POINT_ARRAY,
        oid::DATE_ARRAY,
        oid::TIME_ARRAY,
        oid::TIMESTAMP_ARRAY,
        oid::TIMESTAMPTZ_ARRAY,
        oid::INTERVAL_ARRAY,
        oid::NUMERIC_ARRAY,
        oid::UUID_ARRAY,
        oid::JSON_ARRAY,
        oid::JSONB_ARRAY,
    ];

    for array_oid in array_oids {
        let elem_oid = oid::element_oid_for(array_oid).expect("known array OID");
        map.insert(
            array_oid,
            Arc::new(TypeCodec::new(
                move |reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>| {
                    encode_array(reg, array_oid, value, buf)
                },
                move |reg: &TypeRegistry, format: FormatCode, bytes: &[u8]| match format {
                    FormatCode::Binary => decode_array_binary(reg, bytes),
                    FormatCode::Text => decode_array_text(reg, elem_oid, bytes),
                },
            )),
        );
    }
}

fn decode_array_binary(reg: &TypeRegistry, bytes: &[u8]) -> Result<PgValue> {
    let mut r = Reader::new(bytes);
    let ndim = r.read_i32()?;
    let _hasnulls = r.read_i32()?;
    let elem_oid = r.read_u32()?;

    if !(0..=MAX_DIM).contains(&ndim) {
        return Err(Error::Decode(format!("invalid array dimensions: {}", ndim)));
    }

    let mut dims = Vec::with_capacity(ndim as usize);
    let mut total: usize = if ndim == 0 { 0 } else { 1 };
    for _ in 0..ndim {
        let len = r.read_i32()?;
        let lower_bound = r.read_i32()?;
        if len < 0 {
            return Err(Error::Decode(format!("invalid array length: {}", len)));
        }
        total = total
            .checked_mul(len as usize)
            .ok_or_else(|| Error::Decode("array element count overflow".into()))?;
        dims.push(ArrayDim { len, lower_bound });
    }

    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = r.read_i32()?;
        if len == -1 {
            elements.push(None);
        } else {
            if len < 0 {
                return Err(Error::Decode(format!("invalid element length: {}", len)));
            }
            let payload = r.read_bytes(len as usize)?;
            elements.push(Some(reg.decode(elem_oid, FormatCode::Binary, payload)?));
        }
    }

    Ok(PgValue::Array(PgArray {
        elem_oid,
        dims,
        elements,
    }))
}

fn encode_array(
    reg: &TypeRegistry,
    array_oid: Oid,
    value: &PgValue,
    buf: &mut Vec<u8>,
) -> Result<FormatCode> {
    let a = match value {
        PgValue::Array(a) => a,
        _ => return Err(Error::UnsupportedType(array_oid)),
    };

    let expected: usize = if a.dims.is_empty() {
        0
    } else {
        a.dims.iter().map(|d| d.len.max(0) as usize).product()
    };
    if a.elements.len() != expected {
        return Err(Error::InvalidUsage(format!(
            "array has {} elements but dimensions describe {}",
            a.elements.len(),
            expected
        )));
    }

    let hasnulls = a.elements.iter().any(Option::is_none) as i32;

    buf.extend_from_slice(&(a.dims.len() as i32).to_be_bytes());
    buf.extend_from_slice(&hasnulls.to_be_bytes());
    buf.extend_from_slice(&a.elem_oid.to_be_bytes());
    for dim in &a.dims {
        buf.extend_from_slice(&dim.len.to_be_bytes());
        buf.extend_from_slice(&dim.lower_bound.to_be_bytes());
    }

    for element in &a.elements {
        match element {
            None => buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            Some(value) => {
                let start = buf.len();
                buf.extend_from_slice(&[0, 0, 0, 0]);
                let (elem_oid, elem_format) = reg.encode_value(value, buf)?;
                if elem_oid != a.elem_oid {
                    return Err(Error::UnsupportedType(array_oid));
                }
                if elem_format != FormatCode::Binary {
                    return Err(Error::UnsupportedType(array_oid));
                }
                let len = (buf.len() - start - 4) as i32;
                buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
            }
        }
    }

    Ok(FormatCode::Binary)
}

/// Parse the text array literal syntax: `{1,2,NULL}`, `{"a b","c\"d"}`,
/// nested `{{1,2},{3,4}}`.
fn decode_array_text(reg: &TypeRegistry, elem_oid: Oid, bytes: &[u8]) -> Result<PgValue> {
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;

    let mut parser = TextArrayParser {
        input: s.as_bytes(),
        pos: 0,
        dim_lens: Vec::new(),
        elements: Vec::new(),
    };

    parser.skip_spaces();
    if parser.peek() != Some(b'{') {
        return Err(Error::Decode(format!("invalid array literal: {:?}", s)));
    }
    parser.parse_braced(reg, elem_oid, 0)?;
    parser.skip_spaces();
    if parser.pos != parser.input.len() {
        return Err(Error::Decode(format!("trailing data in array literal: {:?}", s)));
    }

    let dims = if parser.elements.is_empty() {
        Vec::new()
    } else {
        parser
            .dim_lens
            .iter()
            .map(|&len| ArrayDim {
                len,
                lower_bound: 1,
            })
            .collect()
    };

    Ok(PgValue::Array(PgArray {
        elem_oid,
        dims,
        elements: parser.elements,
    }))
}

struct TextArrayParser<'a> {
    input: &'a [u8],
    pos: usize,
    /// Element count per nesting depth; verified rectangular
    dim_lens: Vec<i32>,
    elements: Vec<Option<PgValue>>,
}

impl<'a> TextArrayParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn parse_braced(&mut self, reg: &TypeRegistry, elem_oid: Oid, depth: usize) -> Result<()> {
        let bad = |what: &str| Error::Decode(format!("invalid array literal: {}", what));

        self.pos += 1; // consume '{'
        let mut count: i32 = 0;

        loop {
            self.skip_spaces();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b'{') => {
                    self.parse_braced(reg, elem_oid, depth + 1)?;
                    count += 1;
                }
                Some(b'"') => {
                    let token = self.parse_quoted()?;
                    self.elements
                        .push(Some(reg.decode(elem_oid, FormatCode::Text, &token)?));
                    count += 1;
                }
                Some(_) => {
                    let token = self.parse_bare();
                    if token.is_empty() {
                        return Err(bad("empty element"));
                    }
                    if token == b"NULL" {
                        self.elements.push(None);
                    } else {
                        self.elements
                            .push(Some(reg.decode(elem_oid, FormatCode::Text, token)?));
                    }
                    count += 1;
                }
                None => return Err(bad("unterminated array")),
            }

            self.skip_spaces();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b'}') => {}
                _ => return Err(bad("expected ',' or '}'")),
            }
        }

        // Verify rectangularity across sibling sub-arrays. Inner braces
        // finish before outer ones, so index by depth rather than pushing.
        if depth >= self.dim_lens.len() {
            self.dim_lens.resize(depth + 1, -1);
        }
        if self.dim_lens[depth] == -1 {
            self.dim_lens[depth] = count;
        } else if self.dim_lens[depth] != count {
            return Err(bad("ragged dimensions"));
        }
        Ok(())
    }

    fn parse_quoted(&mut self) -> Result<Vec<u8>> {
        self.pos += 1; // consume '"'
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        None => {
                            return Err(Error::Decode("unterminated escape in array".into()))
                        }
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(Error::Decode("unterminated quoted element".into())),
            }
        }
    }

    fn parse_bare(&mut self) -> &'a [u8] {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b',' || c == b'}' {
                break;
            }
            self.pos += 1;
        }
        // Trim trailing spaces
        let mut end = self.pos;
        while end > start && self.input[end - 1] == b' ' {
            end -= 1;
        }
        &self.input[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_array_simple() {
        let reg = TypeRegistry::new();
        let decoded = decode_array_text(&reg, oid::INT4, b"{1,2,NULL}").unwrap();
        match decoded {
            PgValue::Array(a) => {
                assert_eq!(a.dims, vec![ArrayDim { len: 3, lower_bound: 1 }]);
                assert_eq!(
                    a.elements,
                    vec![Some(PgValue::Int4(1)), Some(PgValue::Int4(2)), None]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn text_array_quoted_and_escaped() {
        let reg = TypeRegistry::new();
        let decoded = decode_array_text(&reg, oid::TEXT, br#"{"a, b","c\"d","NULL"}"#).unwrap();
        match decoded {
            PgValue::Array(a) => {
                assert_eq!(
                    a.elements,
                    vec![
                        Some(PgValue::Text("a, b".into())),
                        Some(PgValue::Text("c\"d".into())),
                        // Quoted NULL is the string, not the null
                        Some(PgValue::Text("NULL".into())),
                    ]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn text_array_nested() {
        let reg = TypeRegistry::new();
        let decoded = decode_array_text(&reg, oid::INT4, b"{{1,2},{3,4}}").unwrap();
        match decoded {
            PgValue::Array(a) => {
                assert_eq!(
                    a.dims,
                    vec![
                        ArrayDim { len: 2, lower_bound: 1 },
                        ArrayDim { len: 2, lower_bound: 1 },
                    ]
                );
                assert_eq!(a.elements.len(), 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn text_array_ragged_rejected() {
        let reg = TypeRegistry::new();
        assert!(decode_array_text(&reg, oid::INT4, b"{{1,2},{3}}").is_err());
    }

    #[test]
    fn text_array_empty() {
        let reg = TypeRegistry::new();
        match decode_array_text(&reg, oid::INT4, b"{}").unwrap() {
            PgValue::Array(a) => {
                assert!(a.dims.is_empty());
                assert!(a.elements.is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn encode_rejects_mixed_element_types() {
        let reg = TypeRegistry::new();
        let mixed = PgValue::Array(PgArray::new(
            oid::INT4,
            vec![Some(PgValue::Int4(1)), Some(PgValue::Text("x".into()))],
        ));
        assert!(reg.encode_value(&mixed, &mut Vec::new()).is_err());
    }

    #[test]
    fn encode_rejects_dimension_mismatch() {
        let reg = TypeRegistry::new();
        let broken = PgValue::Array(PgArray {
            elem_oid: oid::INT4,
            dims: vec![ArrayDim { len: 3, lower_bound: 1 }],
            elements: vec![Some(PgValue::Int4(1))],
        });
        assert!(reg.encode_value(&broken, &mut Vec::new()).is_err());
    }
}
