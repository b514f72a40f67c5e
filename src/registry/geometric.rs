//! Codecs for the geometric types.
//!
//! All binary layouts are sequences of IEEE 754 doubles per the PostgreSQL
//! catalog: point (x, y), line (A, B, C), lseg (x1, y1, x2, y2), box
//! (high.x, high.y, low.x, low.y), circle (x, y, r). path prefixes a
//! closed-flag byte and a point count; polygon prefixes a point count.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::{oid, FormatCode, Oid};
use crate::value::{Circle, Line, LineSegment, PgBox, PgPath, PgValue, Point, Polygon};

use super::{TypeCodec, TypeRegistry};

pub(super) fn register_defaults(map: &mut HashMap<Oid, Arc<TypeCodec>>) {
    map.insert(
        oid::POINT,
        Arc::new(TypeCodec::new(encode_point, decode_point)),
    );
    map.insert(
        oid::LINE,
        Arc::new(TypeCodec::new(encode_line, decode_line)),
    );
    map.insert(
        oid::LSEG,
        Arc::new(TypeCodec::new(encode_lseg, decode_lseg)),
    );
    map.insert(oid::BOX, Arc::new(TypeCodec::new(encode_box, decode_box)));
    map.insert(
        oid::PATH,
        Arc::new(TypeCodec::new(encode_path, decode_path)),
    );
    map.insert(
        oid::POLYGON,
        Arc::new(TypeCodec::new(encode_polygon, decode_polygon)),
    );
    map.insert(
        oid::CIRCLE,
        Arc::new(TypeCodec::new(encode_circle, decode_circle)),
    );
}

fn read_f64(r: &mut Reader<'_>) -> Result<f64> {
    Ok(f64::from_be_bytes(
        r.read_bytes(8)?.try_into().expect("length checked"),
    ))
}

fn read_point(r: &mut Reader<'_>) -> Result<Point> {
    Ok(Point {
        x: read_f64(r)?,
        y: read_f64(r)?,
    })
}

fn write_point(buf: &mut Vec<u8>, p: &Point) {
    buf.extend_from_slice(&p.x.to_be_bytes());
    buf.extend_from_slice(&p.y.to_be_bytes());
}

/// Pull every float out of a geometric text literal, ignoring the
/// decoration: `(1,2)`, `[(1,2),(3,4)]`, `<(1,2),3>`, `{1,2,3}` all reduce
/// to their number sequences.
fn parse_floats(s: &str, expected: Option<usize>, what: &str) -> Result<Vec<f64>> {
    let mut floats = Vec::new();
    for token in s.split(|c: char| "(),[]<>{} ".contains(c)) {
        if token.is_empty() {
            continue;
        }
        let v: f64 = token
            .parse()
            .map_err(|_| Error::Decode(format!("invalid {}: {:?}", what, s)))?;
        floats.push(v);
    }
    if let Some(n) = expected {
        if floats.len() != n {
            return Err(Error::Decode(format!("invalid {}: {:?}", what, s)));
        }
    }
    Ok(floats)
}

fn floats_to_points(floats: &[f64], what: &str) -> Result<Vec<Point>> {
    if floats.len() % 2 != 0 {
        return Err(Error::Decode(format!("odd coordinate count in {}", what)));
    }
    Ok(floats
        .chunks(2)
        .map(|c| Point { x: c[0], y: c[1] })
        .collect())
}

// === point ===

fn decode_point(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            read_point(&mut r)?
        }
        FormatCode::Text => {
            let f = parse_floats(std::str::from_utf8(bytes).unwrap_or(""), Some(2), "point")?;
            Point { x: f[0], y: f[1] }
        }
    };
    Ok(PgValue::Point(value))
}

fn encode_point(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Point(p) => {
            write_point(buf, p);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::POINT)),
    }
}

// === line ===

fn decode_line(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            Line {
                a: read_f64(&mut r)?,
                b: read_f64(&mut r)?,
                c: read_f64(&mut r)?,
            }
        }
        FormatCode::Text => {
            let f = parse_floats(std::str::from_utf8(bytes).unwrap_or(""), Some(3), "line")?;
            Line {
                a: f[0],
                b: f[1],
                c: f[2],
            }
        }
    };
    Ok(PgValue::Line(value))
}

fn encode_line(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Line(l) => {
            buf.extend_from_slice(&l.a.to_be_bytes());
            buf.extend_from_slice(&l.b.to_be_bytes());
            buf.extend_from_slice(&l.c.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::LINE)),
    }
}

// === lseg ===

fn decode_lseg(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            LineSegment {
                start: read_point(&mut r)?,
                end: read_point(&mut r)?,
            }
        }
        FormatCode::Text => {
            let f = parse_floats(std::str::from_utf8(bytes).unwrap_or(""), Some(4), "lseg")?;
            LineSegment {
                start: Point { x: f[0], y: f[1] },
                end: Point { x: f[2], y: f[3] },
            }
        }
    };
    Ok(PgValue::LineSegment(value))
}

fn encode_lseg(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::LineSegment(l) => {
            write_point(buf, &l.start);
            write_point(buf, &l.end);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::LSEG)),
    }
}

// === box ===

fn decode_box(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            PgBox {
                high: read_point(&mut r)?,
                low: read_point(&mut r)?,
            }
        }
        FormatCode::Text => {
            let f = parse_floats(std::str::from_utf8(bytes).unwrap_or(""), Some(4), "box")?;
            PgBox {
                high: Point { x: f[0], y: f[1] },
                low: Point { x: f[2], y: f[3] },
            }
        }
    };
    Ok(PgValue::Box(value))
}

fn encode_box(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Box(b) => {
            write_point(buf, &b.high);
            write_point(buf, &b.low);
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::BOX)),
    }
}

// === path ===

fn decode_path(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            let closed = r.read_u8()? != 0;
            let npts = r.read_i32()?;
            if npts < 0 {
                return Err(Error::Decode("negative path point count".into()));
            }
            let mut points = Vec::with_capacity(npts as usize);
            for _ in 0..npts {
                points.push(read_point(&mut r)?);
            }
            PgPath { closed, points }
        }
        FormatCode::Text => {
            let s = std::str::from_utf8(bytes).unwrap_or("");
            // Open paths use square brackets, closed paths parentheses
            let closed = !s.trim_start().starts_with('[');
            let points = floats_to_points(&parse_floats(s, None, "path")?, "path")?;
            PgPath { closed, points }
        }
    };
    Ok(PgValue::Path(value))
}

fn encode_path(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Path(p) => {
            buf.push(p.closed as u8);
            buf.extend_from_slice(&(p.points.len() as i32).to_be_bytes());
            for point in &p.points {
                write_point(buf, point);
            }
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::PATH)),
    }
}

// === polygon ===

fn decode_polygon(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            let npts = r.read_i32()?;
            if npts < 0 {
                return Err(Error::Decode("negative polygon point count".into()));
            }
            let mut points = Vec::with_capacity(npts as usize);
            for _ in 0..npts {
                points.push(read_point(&mut r)?);
            }
            Polygon { points }
        }
        FormatCode::Text => {
            let s = std::str::from_utf8(bytes).unwrap_or("");
            Polygon {
                points: floats_to_points(&parse_floats(s, None, "polygon")?, "polygon")?,
            }
        }
    };
    Ok(PgValue::Polygon(value))
}

fn encode_polygon(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Polygon(p) => {
            buf.extend_from_slice(&(p.points.len() as i32).to_be_bytes());
            for point in &p.points {
                write_point(buf, point);
            }
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::POLYGON)),
    }
}

// === circle ===

fn decode_circle(_reg: &TypeRegistry, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
    let value = match format {
        FormatCode::Binary => {
            let mut r = Reader::new(bytes);
            Circle {
                center: read_point(&mut r)?,
                radius: read_f64(&mut r)?,
            }
        }
        FormatCode::Text => {
            let f = parse_floats(std::str::from_utf8(bytes).unwrap_or(""), Some(3), "circle")?;
            Circle {
                center: Point { x: f[0], y: f[1] },
                radius: f[2],
            }
        }
    };
    Ok(PgValue::Circle(value))
}

fn encode_circle(_reg: &TypeRegistry, value: &PgValue, buf: &mut Vec<u8>) -> Result<FormatCode> {
    match value {
        PgValue::Circle(c) => {
            write_point(buf, &c.center);
            buf.extend_from_slice(&c.radius.to_be_bytes());
            Ok(FormatCode::Binary)
        }
        _ => Err(Error::UnsupportedType(oid::CIRCLE)),
    }
}
