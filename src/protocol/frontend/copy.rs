//! COPY protocol messages (client → server direction).

use crate::protocol::codec::MessageBuilder;

/// Write a CopyData message carrying a raw data chunk.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::COPY_DONE);
    msg.finish();
}

/// Write a CopyFail message with an error reason.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_data() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, &[1, 2, 3]);

        assert_eq!(buf[0], b'd');
        assert_eq!(&buf[1..5], &7_i32.to_be_bytes());
        assert_eq!(&buf[5..], &[1, 2, 3]);
    }

    #[test]
    fn test_copy_done() {
        let mut buf = Vec::new();
        write_copy_done(&mut buf);
        assert_eq!(buf, [b'c', 0, 0, 0, 4]);
    }

    #[test]
    fn test_copy_fail() {
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, "canceled");
        assert_eq!(buf[0], b'f');
        assert!(buf.ends_with(&[0]));
    }
}
