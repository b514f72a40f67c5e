//! Replication: a raw CopyBoth byte-chunk channel.
//!
//! A session started with a replication mode can issue replication commands
//! (e.g. `START_REPLICATION`). The server switches the connection into a
//! bidirectional COPY stream; this module exposes that stream as raw
//! chunks. Decoding the replication protocol inside the chunks is the
//! caller's business.

use crate::error::{Error, Result};
use crate::opts::ReplicationMode;
use crate::protocol::backend::{msg_type, CopyBothResponse, ErrorResponse};
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_query};

use super::Conn;

/// A live CopyBoth stream.
///
/// The session is unusable for queries until the stream ends; dropping the
/// stream mid-flight leaves the connection in copy mode, so it is marked
/// broken unless [`finish`](Self::finish) ran to completion.
pub struct ReplicationStream<'a> {
    conn: &'a mut Conn,
    done: bool,
}

impl Conn {
    /// Issue a replication command and enter the CopyBoth stream.
    ///
    /// The session must have been opened with a physical or logical
    /// [`ReplicationMode`].
    pub async fn start_replication(&mut self, command: &str) -> Result<ReplicationStream<'_>> {
        if self.opts.replication == ReplicationMode::None {
            return Err(Error::InvalidUsage(
                "session was not opened in a replication mode".into(),
            ));
        }
        self.check_usable(command)?;

        self.buffers.write_buffer.clear();
        write_query(&mut self.buffers.write_buffer, command);
        self.stream.send(&mut self.buffers).await?;

        loop {
            self.stream.read_message(&mut self.buffers).await?;
            match self.buffers.type_byte {
                msg_type::COPY_BOTH_RESPONSE => {
                    CopyBothResponse::parse(&self.buffers.read_buffer)?;
                    return Ok(ReplicationStream {
                        conn: self,
                        done: false,
                    });
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&self.buffers.read_buffer)?;
                    self.drain_to_ready().await?;
                    return Err(error.into_error());
                }
                msg_type::NOTICE_RESPONSE | msg_type::PARAMETER_STATUS => continue,
                other => {
                    self.is_broken = true;
                    return Err(Error::Protocol(format!(
                        "expected CopyBothResponse, got '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    async fn drain_to_ready(&mut self) -> Result<()> {
        loop {
            self.stream.read_message(&mut self.buffers).await?;
            if self.buffers.type_byte == msg_type::READY_FOR_QUERY {
                return Ok(());
            }
        }
    }
}

impl ReplicationStream<'_> {
    /// Read the next raw chunk. Returns `None` once the server ends the
    /// stream with CopyDone.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        loop {
            self.conn
                .stream
                .read_message(&mut self.conn.buffers)
                .await?;
            match self.conn.buffers.type_byte {
                msg_type::COPY_DATA => {
                    return Ok(Some(self.conn.buffers.read_buffer.clone()));
                }
                msg_type::COPY_DONE => {
                    self.done = true;
                    return Ok(None);
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&self.conn.buffers.read_buffer)?;
                    self.done = true;
                    self.conn.drain_to_ready().await?;
                    return Err(error.into_error());
                }
                msg_type::NOTICE_RESPONSE | msg_type::PARAMETER_STATUS => continue,
                other => {
                    self.done = true;
                    self.conn.is_broken = true;
                    return Err(Error::Protocol(format!(
                        "unexpected message in copy stream: '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    /// Send a raw chunk upstream (e.g. a standby status update).
    pub async fn send_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.done {
            return Err(Error::InvalidUsage("copy stream already finished".into()));
        }
        self.conn.buffers.write_buffer.clear();
        write_copy_data(&mut self.conn.buffers.write_buffer, data);
        self.conn.stream.send(&mut self.conn.buffers).await
    }

    /// End the stream from our side and consume frames up to ReadyForQuery.
    pub async fn finish(mut self) -> Result<()> {
        self.conn.buffers.write_buffer.clear();
        write_copy_done(&mut self.conn.buffers.write_buffer);
        self.conn.stream.send(&mut self.conn.buffers).await?;

        // Drain the remaining server chunks and the closing sequence
        loop {
            self.conn
                .stream
                .read_message(&mut self.conn.buffers)
                .await?;
            match self.conn.buffers.type_byte {
                msg_type::READY_FOR_QUERY => {
                    self.done = true;
                    return Ok(());
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&self.conn.buffers.read_buffer)?;
                    self.done = true;
                    self.conn.drain_to_ready().await?;
                    return Err(error.into_error());
                }
                _ => continue,
            }
        }
    }
}

impl Drop for ReplicationStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            // Still in copy mode: the session cannot be reused
            self.conn.is_broken = true;
        }
    }
}
