//! DVR-IP wire frame codec.
//!
//! Frame layout (integers little-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 2    | magic `0xFF 0x01` |
//! | 2      | 2    | reserved |
//! | 4      | 4    | session id |
//! | 8      | 4    | sequence number |
//! | 12     | 2    | reserved |
//! | 14     | 2    | command id |
//! | 16     | 4    | payload length |
//! | 20     | N    | payload (ASCII JSON) |
//! | 20+N-2 | 2    | terminator `0x0A 0x00` |
//!
//! The terminator is counted inside the declared payload length, which is how
//! the devices frame their own replies; the encoder mirrors that so an
//! encoded frame decodes back to the original payload.

use crate::error::{DvrError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const MAGIC: [u8; 2] = [0xFF, 0x01];
pub const TERMINATOR: [u8; 2] = [0x0A, 0x00];

pub const HEADER_SIZE: usize = 20;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + TERMINATOR.len();

/// The length field is read as u32 but real devices never exceed 16-bit
/// payload sizes; anything larger is treated as a malformed frame instead of
/// attempting the allocation.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

const SESSION_OFFSET: usize = 4;
const SEQ_OFFSET: usize = 8;
const COMMAND_OFFSET: usize = 14;
const LEN_OFFSET: usize = 16;
pub const PAYLOAD_OFFSET: usize = 20;

/// Encode one command into its wire frame.
pub fn encode(session_id: u32, sequence: u32, command_id: u16, payload: &[u8]) -> Bytes {
    let declared_len = payload.len() + TERMINATOR.len();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + declared_len);
    buf.put_slice(&MAGIC);
    buf.put_bytes(0x00, 2);
    buf.put_u32_le(session_id);
    buf.put_u32_le(sequence);
    buf.put_bytes(0x00, 2);
    buf.put_u16_le(command_id);
    buf.put_u32_le(declared_len as u32);
    buf.put_slice(payload);
    buf.put_slice(&TERMINATOR);
    buf.freeze()
}

/// Decode a complete frame, optionally validating it against a pending
/// operation's expectations.
///
/// Returns the payload (trimmed of trailing CR/LF/NUL) and the frame's
/// session id.
pub fn decode(
    frame: &Bytes,
    expected_command: Option<u16>,
    expected_sequence: Option<u32>,
) -> Result<(Bytes, u32)> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(DvrError::ResponseTooShort);
    }
    if frame[..2] != MAGIC {
        return Err(DvrError::MalformedFrame {
            detail: "bad magic",
        });
    }
    if frame[frame.len() - 2..] != TERMINATOR {
        return Err(DvrError::MalformedFrame {
            detail: "bad terminator",
        });
    }

    let session_id = read_u32_le(frame, SESSION_OFFSET);
    let sequence = read_u32_le(frame, SEQ_OFFSET);
    let command_id = read_u16_le(frame, COMMAND_OFFSET);
    let declared_len = read_u32_le(frame, LEN_OFFSET) as usize;

    if let Some(expected) = expected_sequence {
        if sequence != expected {
            return Err(DvrError::UnexpectedSequence {
                expected,
                actual: sequence,
            });
        }
    }
    if let Some(expected) = expected_command {
        if command_id != expected {
            return Err(DvrError::UnexpectedCommand {
                expected,
                actual: command_id,
            });
        }
    }

    if declared_len > MAX_PAYLOAD_LEN {
        return Err(DvrError::MalformedFrame {
            detail: "declared length exceeds maximum frame size",
        });
    }
    if PAYLOAD_OFFSET + declared_len > frame.len() {
        return Err(DvrError::ResponseTooShort);
    }

    let mut payload = frame.slice(PAYLOAD_OFFSET..PAYLOAD_OFFSET + declared_len);
    while let Some(&last) = payload.last() {
        if last == b'\r' || last == b'\n' || last == 0 {
            payload.truncate(payload.len() - 1);
        } else {
            break;
        }
    }

    Ok((payload, session_id))
}

/// Session id peek tolerant of short buffers.
pub fn peek_session_id(bytes: &[u8]) -> Option<u32> {
    (bytes.len() >= SESSION_OFFSET + 4).then(|| read_u32_le(bytes, SESSION_OFFSET))
}

/// Sequence number peek tolerant of short buffers.
pub fn peek_sequence(bytes: &[u8]) -> Option<u32> {
    (bytes.len() >= SEQ_OFFSET + 4).then(|| read_u32_le(bytes, SEQ_OFFSET))
}

/// Command id peek tolerant of short buffers.
pub fn peek_command_id(bytes: &[u8]) -> Option<u16> {
    (bytes.len() >= COMMAND_OFFSET + 2).then(|| read_u16_le(bytes, COMMAND_OFFSET))
}

/// Declared payload length at header offset 16.
pub fn peek_payload_len(bytes: &[u8]) -> Option<u32> {
    (bytes.len() >= LEN_OFFSET + 4).then(|| read_u32_le(bytes, LEN_OFFSET))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("length checked"))
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().expect("length checked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_golden_bytes() {
        let frame = encode(0x64, 2, 1006, b"{}");
        let want = [
            0xFF, 0x01, // magic
            0x00, 0x00, // reserved
            0x64, 0x00, 0x00, 0x00, // session id
            0x02, 0x00, 0x00, 0x00, // sequence
            0x00, 0x00, // reserved
            0xEE, 0x03, // command 1006
            0x04, 0x00, 0x00, 0x00, // payload length, terminator included
            b'{', b'}', 0x0A, 0x00,
        ];
        assert_eq!(frame.as_ref(), &want[..]);
    }

    #[test]
    fn round_trip() {
        let payload = br#"{"Name":"KeepAlive","SessionID":"0x1A2B"}"#;
        let frame = encode(0x1A2B, 7, 1006, payload);
        let (decoded, session) = decode(&frame, Some(1006), Some(7)).unwrap();
        assert_eq!(decoded.as_ref(), &payload[..]);
        assert_eq!(session, 0x1A2B);
    }

    #[test]
    fn peek_helpers() {
        let frame = encode(0x64, 9, 1001, b"{}");
        assert_eq!(peek_session_id(&frame), Some(0x64));
        assert_eq!(peek_sequence(&frame), Some(9));
        assert_eq!(peek_command_id(&frame), Some(1001));
        assert_eq!(peek_payload_len(&frame), Some(4));
        assert_eq!(peek_session_id(&frame[..8]), Some(0x64));
        assert_eq!(peek_session_id(&frame[..6]), None);
        assert_eq!(peek_sequence(&frame[..10]), None);
        assert_eq!(peek_command_id(&frame[..10]), None);
    }

    #[test]
    fn rejects_bad_magic_and_terminator() {
        let frame = encode(1, 1, 1001, b"{}");

        let mut broken = BytesMut::from(frame.as_ref());
        broken[0] = 0xFE;
        assert!(matches!(
            decode(&broken.freeze(), None, None),
            Err(DvrError::MalformedFrame { .. })
        ));

        let mut broken = BytesMut::from(frame.as_ref());
        let end = broken.len() - 1;
        broken[end] = 0xFF;
        assert!(matches!(
            decode(&broken.freeze(), None, None),
            Err(DvrError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let frame = encode(1, 1, 1001, br#"{"Ret":100}"#);
        // Keep the header intact but declare more payload than is present.
        let mut broken = BytesMut::from(frame.as_ref());
        broken[16] = 0xF0;
        broken[17] = 0x00;
        let tail = [0x0A, 0x00];
        broken.extend_from_slice(&tail);
        assert!(matches!(
            decode(&broken.freeze(), None, None),
            Err(DvrError::ResponseTooShort)
        ));
    }

    #[test]
    fn rejects_undersized_buffer() {
        let short = Bytes::from_static(&[0xFF, 0x01, 0x00]);
        assert!(matches!(
            decode(&short, None, None),
            Err(DvrError::ResponseTooShort)
        ));
    }

    #[test]
    fn rejects_oversized_declared_length() {
        let frame = encode(1, 1, 1001, b"{}");
        let mut broken = BytesMut::from(frame.as_ref());
        broken[16..20].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes());
        assert!(matches!(
            decode(&broken.freeze(), None, None),
            Err(DvrError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn sequence_and_command_mismatches() {
        let frame = encode(1, 5, 1007, b"{}");
        assert!(matches!(
            decode(&frame, Some(1007), Some(6)),
            Err(DvrError::UnexpectedSequence {
                expected: 6,
                actual: 5
            })
        ));
        assert!(matches!(
            decode(&frame, Some(1001), Some(5)),
            Err(DvrError::UnexpectedCommand {
                expected: 1001,
                actual: 1007
            })
        ));
    }

    #[test]
    fn trims_trailing_noise() {
        // Devices pad JSON with CR/LF/NUL; all of it is trimmed.
        let frame = encode(1, 1, 1043, b"{\"Ret\":100}\r\n\0");
        let (payload, _) = decode(&frame, None, None).unwrap();
        assert_eq!(payload.as_ref(), br#"{"Ret":100}"#);
    }
}
