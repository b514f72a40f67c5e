//! Error types for pgnet.

use std::collections::HashMap;

use thiserror::Error;

/// Result type for pgnet operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error or notice fields reported by the server.
///
/// Fields are keyed by the single-ASCII-byte identifiers of the wire
/// protocol (`S` severity, `C` SQLSTATE, `M` message, ...). `severity` and
/// `message` are always present; everything else is optional.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    fields: HashMap<u8, String>,
}

impl ServerError {
    /// Build from a parsed field map.
    pub fn new(fields: HashMap<u8, String>) -> Self {
        Self { fields }
    }

    /// Raw field lookup by identifier byte.
    pub fn field(&self, id: u8) -> Option<&str> {
        self.fields.get(&id).map(String::as_str)
    }

    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG.
    pub fn severity(&self) -> &str {
        self.field(b'S').unwrap_or("ERROR")
    }

    /// SQLSTATE error code (5 characters), surfaced verbatim.
    pub fn code(&self) -> Option<&str> {
        self.field(b'C')
    }

    /// Primary error message.
    pub fn message(&self) -> &str {
        self.field(b'M').unwrap_or("")
    }

    /// Detailed error explanation.
    pub fn detail(&self) -> Option<&str> {
        self.field(b'D')
    }

    /// Suggestion for fixing the error.
    pub fn hint(&self) -> Option<&str> {
        self.field(b'H')
    }

    /// Cursor position in the query string (1-based).
    pub fn position(&self) -> Option<u32> {
        self.field(b'P').and_then(|p| p.parse().ok())
    }

    /// Schema name.
    pub fn schema(&self) -> Option<&str> {
        self.field(b's')
    }

    /// Table name.
    pub fn table(&self) -> Option<&str> {
        self.field(b't')
    }

    /// Column name.
    pub fn column(&self) -> Option<&str> {
        self.field(b'c')
    }

    /// Constraint name.
    pub fn constraint(&self) -> Option<&str> {
        self.field(b'n')
    }

    /// Context/stack trace.
    pub fn where_(&self) -> Option<&str> {
        self.field(b'W')
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity(), self.message())?;
        if let Some(code) = self.code() {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for pgnet.
#[derive(Debug, Error)]
pub enum Error {
    /// Error response from the server
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed frame, unexpected message, length mismatch)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed (SCRAM step failure, verifier mismatch,
    /// unsupported mechanism)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport reached EOF or a write failed; the session is gone
    #[error("connection lost")]
    ConnectionLost,

    /// Statement attempted while the transaction is in the failed state
    #[error("current transaction is aborted, roll back before issuing statements")]
    TransactionAborted,

    /// Connect or query deadline exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// Encode requested for an unregistered OID or incompatible value
    #[error("unsupported type OID {0}")]
    UnsupportedType(u32),

    /// Non-blocking lease found the pool at capacity
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Value decoding failed
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid usage (e.g. registering on a frozen registry)
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature or message
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl Error {
    /// Returns true if the error is fatal to the session and the connection
    /// must not be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionLost | Error::Protocol(_) | Error::Auth(_) => true,
            Error::Server(fields) => matches!(fields.severity(), "FATAL" | "PANIC"),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(severity: &str, code: &str) -> Error {
        let mut fields = HashMap::new();
        fields.insert(b'S', severity.to_string());
        fields.insert(b'C', code.to_string());
        fields.insert(b'M', "boom".to_string());
        Error::Server(ServerError::new(fields))
    }

    #[test]
    fn fatal_severity_breaks_connection() {
        assert!(server_error("FATAL", "57P01").is_connection_broken());
        assert!(!server_error("ERROR", "23505").is_connection_broken());
    }

    #[test]
    fn sqlstate_is_surfaced_verbatim() {
        assert_eq!(server_error("ERROR", "23505").sqlstate(), Some("23505"));
        assert_eq!(Error::ConnectionLost.sqlstate(), None);
    }
}
