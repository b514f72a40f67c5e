//! Buffer set shared between the connection and its state machines.

/// Read/write buffers for one connection.
///
/// State machines fill `write_buffer` with outgoing frames; the connection
/// fills `read_buffer` with the payload of the last received frame and sets
/// `type_byte` to its tag.
pub struct BufferSet {
    /// Payload of the last message read
    pub read_buffer: Vec<u8>,
    /// Pending outgoing frames
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(1024),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
