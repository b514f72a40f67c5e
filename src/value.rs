//! Decoded PostgreSQL values.
//!
//! A column decodes to exactly one [`PgValue`] variant; NULL is represented
//! at the row layer as `Option<PgValue>`, never as a sentinel variant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::protocol::types::{oid, FormatCode, Oid};

/// A 2D point (`point`): (x, y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An infinite line (`line`) in Ax + By + C = 0 form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// A finite line segment (`lseg`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

/// A rectangle (`box`), stored as upper-right and lower-left corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PgBox {
    pub high: Point,
    pub low: Point,
}

/// An open or closed path (`path`).
#[derive(Debug, Clone, PartialEq)]
pub struct PgPath {
    pub closed: bool,
    pub points: Vec<Point>,
}

/// A polygon (`polygon`).
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// A circle (`circle`): center and radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

/// An `interval`: months, days, and microseconds are carried separately
/// because their lengths are not interconvertible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

/// One dimension of an array value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDim {
    /// Number of elements in this dimension
    pub len: i32,
    /// Lower bound (PostgreSQL defaults to 1)
    pub lower_bound: i32,
}

/// A (possibly multi-dimensional) array of a registered element type.
///
/// Elements are stored flat in row-major order; `dims` carries the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PgArray {
    /// Element type OID
    pub elem_oid: Oid,
    /// Dimensions, outermost first
    pub dims: Vec<ArrayDim>,
    /// Flattened elements; `None` is a NULL element
    pub elements: Vec<Option<PgValue>>,
}

impl PgArray {
    /// A one-dimensional array with the default lower bound.
    pub fn new(elem_oid: Oid, elements: Vec<Option<PgValue>>) -> Self {
        let dims = vec![ArrayDim {
            len: elements.len() as i32,
            lower_bound: 1,
        }];
        Self {
            elem_oid,
            dims,
            elements,
        }
    }
}

/// A decoded PostgreSQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    /// text, varchar, char(n), name
    Text(String),
    Bytea(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Jsonb(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Interval),
    Point(Point),
    Line(Line),
    LineSegment(LineSegment),
    Box(PgBox),
    Path(PgPath),
    Polygon(Polygon),
    Circle(Circle),
    Array(PgArray),
    /// A value whose OID has no registered codec: raw payload plus the
    /// format it arrived in.
    Unknown {
        oid: Oid,
        format: FormatCode,
        bytes: Vec<u8>,
    },
}

impl PgValue {
    /// The OID this value encodes as.
    ///
    /// Returns `None` for array element types without a known array OID.
    pub fn oid(&self) -> Option<Oid> {
        Some(match self {
            PgValue::Bool(_) => oid::BOOL,
            PgValue::Int2(_) => oid::INT2,
            PgValue::Int4(_) => oid::INT4,
            PgValue::Int8(_) => oid::INT8,
            PgValue::Float4(_) => oid::FLOAT4,
            PgValue::Float8(_) => oid::FLOAT8,
            PgValue::Numeric(_) => oid::NUMERIC,
            PgValue::Text(_) => oid::TEXT,
            PgValue::Bytea(_) => oid::BYTEA,
            PgValue::Uuid(_) => oid::UUID,
            PgValue::Json(_) => oid::JSON,
            PgValue::Jsonb(_) => oid::JSONB,
            PgValue::Date(_) => oid::DATE,
            PgValue::Time(_) => oid::TIME,
            PgValue::Timestamp(_) => oid::TIMESTAMP,
            PgValue::TimestampTz(_) => oid::TIMESTAMPTZ,
            PgValue::Interval(_) => oid::INTERVAL,
            PgValue::Point(_) => oid::POINT,
            PgValue::Line(_) => oid::LINE,
            PgValue::LineSegment(_) => oid::LSEG,
            PgValue::Box(_) => oid::BOX,
            PgValue::Path(_) => oid::PATH,
            PgValue::Polygon(_) => oid::POLYGON,
            PgValue::Circle(_) => oid::CIRCLE,
            PgValue::Array(a) => return oid::array_oid_for(a.elem_oid),
            PgValue::Unknown { oid, .. } => *oid,
        })
    }

    /// Extract a &str if this is a text-family value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an i64 from any integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PgValue::Int2(v) => Some(*v as i64),
            PgValue::Int4(v) => Some(*v as i64),
            PgValue::Int8(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an f64 from any float variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PgValue::Float4(v) => Some(*v as f64),
            PgValue::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract raw bytes if this is a bytea value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PgValue::Bytea(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for PgValue {
    fn from(s: &str) -> Self {
        PgValue::Text(s.to_string())
    }
}

impl From<String> for PgValue {
    fn from(s: String) -> Self {
        PgValue::Text(s)
    }
}

impl From<i16> for PgValue {
    fn from(v: i16) -> Self {
        PgValue::Int2(v)
    }
}

impl From<i32> for PgValue {
    fn from(v: i32) -> Self {
        PgValue::Int4(v)
    }
}

impl From<i64> for PgValue {
    fn from(v: i64) -> Self {
        PgValue::Int8(v)
    }
}

impl From<f32> for PgValue {
    fn from(v: f32) -> Self {
        PgValue::Float4(v)
    }
}

impl From<f64> for PgValue {
    fn from(v: f64) -> Self {
        PgValue::Float8(v)
    }
}

impl From<bool> for PgValue {
    fn from(v: bool) -> Self {
        PgValue::Bool(v)
    }
}

impl From<Vec<u8>> for PgValue {
    fn from(v: Vec<u8>) -> Self {
        PgValue::Bytea(v)
    }
}

impl From<uuid::Uuid> for PgValue {
    fn from(v: uuid::Uuid) -> Self {
        PgValue::Uuid(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_oids() {
        assert_eq!(PgValue::Int4(1).oid(), Some(oid::INT4));
        assert_eq!(PgValue::from("x").oid(), Some(oid::TEXT));
        assert_eq!(
            PgValue::Array(PgArray::new(oid::INT4, vec![])).oid(),
            Some(oid::INT4_ARRAY)
        );
        assert_eq!(
            PgValue::Unknown {
                oid: 12345,
                format: FormatCode::Binary,
                bytes: vec![]
            }
            .oid(),
            Some(12345)
        );
    }

    #[test]
    fn accessors() {
        assert_eq!(PgValue::Int2(7).as_i64(), Some(7));
        assert_eq!(PgValue::Float4(1.5).as_f64(), Some(1.5));
        assert_eq!(PgValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PgValue::from("hi").as_str(), Some("hi"));
        assert_eq!(PgValue::Int4(1).as_str(), None);
    }
}
