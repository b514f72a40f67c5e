//! Async byte-stream transport for a session.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use tokio_native_tls::TlsStream;

use crate::buffer::BufferSet;
use crate::error::{Error, Result};

/// Largest frame body we accept; matches the server-side 1 GB limit.
const MAX_MESSAGE_LEN: usize = 0x4000_0000;

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf).await.map(|_| ()),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.read_exact(buf).await.map(|_| ()),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().flush().await,
        }
    }

    /// Read a single raw byte (SSL negotiation response).
    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await.map_err(map_eof)?;
        Ok(byte[0])
    }

    /// Read one complete backend frame into the buffer set.
    ///
    /// Partial frames never surface: this returns only once the whole body
    /// has arrived.
    pub async fn read_message(&mut self, buffers: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header).await.map_err(map_eof)?;

        let type_byte = header[0];
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if len < 4 {
            return Err(Error::Protocol(format!("invalid message length: {}", len)));
        }
        let body_len = (len - 4) as usize;
        if body_len > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!(
                "message length {} exceeds limit",
                len
            )));
        }

        buffers.read_buffer.resize(body_len, 0);
        self.read_exact(&mut buffers.read_buffer)
            .await
            .map_err(map_eof)?;
        buffers.type_byte = type_byte;

        log::trace!(
            target: "pgnet::frame",
            "frame_received type={} len={}",
            type_byte as char,
            len
        );
        Ok(())
    }

    /// Write and flush the pending output buffer, then clear it.
    pub async fn send(&mut self, buffers: &mut BufferSet) -> Result<()> {
        if buffers.write_buffer.is_empty() {
            return Ok(());
        }
        log::trace!(
            target: "pgnet::frame",
            "frame_sent bytes={}",
            buffers.write_buffer.len()
        );
        self.write_all(&buffers.write_buffer).await.map_err(map_eof)?;
        self.flush().await.map_err(map_eof)?;
        buffers.write_buffer.clear();
        Ok(())
    }

    /// Upgrade a plain TCP stream to TLS.
    #[cfg(feature = "tls")]
    pub async fn upgrade_to_tls(self, host: &str, verify: bool) -> Result<Self> {
        let tcp = match self {
            Stream::Tcp(r) => r.into_inner(),
            Stream::Tls(_) => {
                return Err(Error::InvalidUsage("stream is already TLS".into()));
            }
        };

        let mut builder = native_tls::TlsConnector::builder();
        if !verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
        let tls = connector
            .connect(host, tcp)
            .await
            .map_err(|e| Error::Auth(format!("TLS handshake failed: {}", e)))?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }
}

/// Transport EOF means the session is gone, not a generic I/O failure.
fn map_eof(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionLost
    } else {
        Error::Io(err)
    }
}
