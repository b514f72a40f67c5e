//! Action types for state machine I/O requests.

use crate::error::ServerError;

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and then calls `step` again.
#[derive(Debug)]
pub enum Action {
    /// Write the pending output, then read a single raw byte (SSL
    /// negotiation response) and hand it back via `set_ssl_response`.
    WriteAndReadByte,
    /// Read the next backend message.
    ReadMessage,
    /// Write the pending output and flush.
    Write,
    /// Write the pending output, flush, then read the next backend message.
    WriteAndReadMessage,
    /// Upgrade the transport to TLS, then call `step` again.
    TlsHandshake,
    /// Dispatch an asynchronous message, then read the next message.
    HandleAsyncMessage(AsyncMessage),
    /// The state machine has finished.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time between frames of the current operation.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ServerError),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}
