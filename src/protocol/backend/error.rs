//! Error and notice response messages.

use std::collections::HashMap;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::Reader;

/// Parse error/notice fields from payload into a ServerError.
///
/// Fields are (identifier byte, NUL-terminated value) pairs ending with a
/// zero byte. `S` (severity) and `M` (message) are required.
fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = HashMap::new();
    let mut r = Reader::new(payload);

    loop {
        let field_type = r.read_u8()?;
        if field_type == 0 {
            break;
        }
        let value = r.read_cstr()?;
        fields.insert(field_type, value.to_string());
    }

    if !fields.contains_key(&b'S') || !fields.contains_key(&b'M') {
        return Err(Error::Protocol(
            "error response missing required severity/message fields".into(),
        ));
    }

    Ok(ServerError::new(fields))
}

/// ErrorResponse message - error from server.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }

    /// Get the underlying ServerError.
    pub fn error(&self) -> &ServerError {
        &self.0
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    /// Get the underlying ServerError.
    pub fn error(&self) -> &ServerError {
        &self.0
    }
}
