//! COPY protocol messages (server → client direction).

use crate::error::Result;
use crate::protocol::codec::Reader;
use crate::protocol::types::FormatCode;

/// Shared layout of CopyInResponse / CopyOutResponse / CopyBothResponse:
/// overall format byte plus per-column format codes.
fn parse_copy_response(payload: &[u8]) -> Result<(FormatCode, Vec<FormatCode>)> {
    let mut r = Reader::new(payload);
    let overall = FormatCode::from_u16(r.read_u8()? as u16);
    let num_columns = r.read_u16()? as usize;
    let mut column_formats = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        column_formats.push(FormatCode::from_u16(r.read_u16()?));
    }
    Ok((overall, column_formats))
}

/// CopyInResponse message - server is ready to receive COPY data.
#[derive(Debug, Clone)]
pub struct CopyInResponse {
    /// Overall copy format
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyInResponse {
    /// Parse a CopyInResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

/// CopyOutResponse message - server is about to send COPY data.
#[derive(Debug, Clone)]
pub struct CopyOutResponse {
    /// Overall copy format
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyOutResponse {
    /// Parse a CopyOutResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

/// CopyBothResponse message - start of a bidirectional COPY (replication).
#[derive(Debug, Clone)]
pub struct CopyBothResponse {
    /// Overall copy format
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyBothResponse {
    /// Parse a CopyBothResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

/// CopyData message - a raw COPY data chunk.
#[derive(Debug, Clone, Copy)]
pub struct CopyData<'a> {
    /// Raw data bytes
    pub data: &'a [u8],
}

impl<'a> CopyData<'a> {
    /// Parse a CopyData message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(Self { data: payload })
    }
}

/// CopyDone message - COPY stream completed.
#[derive(Debug, Clone, Copy)]
pub struct CopyDone;

impl CopyDone {
    /// Parse a CopyDone message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_copy_both_response() {
        let mut payload = vec![1u8]; // binary
        payload.extend_from_slice(&2_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());

        let resp = CopyBothResponse::parse(&payload).unwrap();
        assert_eq!(resp.format, FormatCode::Binary);
        assert_eq!(
            resp.column_formats,
            vec![FormatCode::Binary, FormatCode::Binary]
        );
    }
}
