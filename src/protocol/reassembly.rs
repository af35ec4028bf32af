//! Byte-stream reassembly for the DVR-IP framing.
//!
//! The wire format is not self-synchronizing beyond its 2-byte magic, so the
//! reassembler runs a small per-byte state machine over whatever chunk sizes
//! the socket delivers. Emission happens only on full frame completion.

use super::codec::{HEADER_SIZE, MAGIC, MAX_PAYLOAD_LEN};
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    ReadStartSequence,
    ReadHeader,
    ReadData,
}

/// Reconstructs discrete DVR-IP frames from an arbitrary-chunked byte stream.
#[derive(Debug)]
pub struct StreamReassembler {
    state: ReaderState,
    buf: BytesMut,
    magic_index: usize,
    remaining: usize,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self {
            state: ReaderState::ReadStartSequence,
            buf: BytesMut::with_capacity(1024),
            magic_index: 0,
            remaining: 0,
        }
    }

    /// Consume one chunk read off the socket and emit every frame it
    /// completes. Partial frames are carried across calls.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();

        for &byte in chunk {
            match self.state {
                ReaderState::ReadStartSequence => {
                    if byte == MAGIC[self.magic_index] {
                        self.buf.put_u8(byte);
                        self.magic_index += 1;
                        if self.magic_index == MAGIC.len() {
                            self.state = ReaderState::ReadHeader;
                        }
                    } else {
                        self.buf.clear();
                        self.magic_index = 0;
                        // The mismatching byte may itself start a new magic
                        // sequence.
                        if byte == MAGIC[0] {
                            self.buf.put_u8(byte);
                            self.magic_index = 1;
                        }
                    }
                }
                ReaderState::ReadHeader => {
                    self.buf.put_u8(byte);
                    if self.buf.len() == HEADER_SIZE {
                        let declared = u32::from_le_bytes(
                            self.buf[16..20].try_into().expect("length checked"),
                        ) as usize;
                        if declared > MAX_PAYLOAD_LEN {
                            tracing::warn!(
                                declared_len = declared,
                                "dropping frame with oversized length field"
                            );
                            self.reset();
                        } else if declared == 0 {
                            frames.push(self.take_frame());
                        } else {
                            self.remaining = declared;
                            self.state = ReaderState::ReadData;
                        }
                    }
                }
                ReaderState::ReadData => {
                    self.buf.put_u8(byte);
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        frames.push(self.take_frame());
                    }
                }
            }
        }

        frames
    }

    fn take_frame(&mut self) -> Bytes {
        let frame = self.buf.split().freeze();
        self.reset();
        frame
    }

    fn reset(&mut self) {
        self.state = ReaderState::ReadStartSequence;
        self.buf.clear();
        self.magic_index = 0;
        self.remaining = 0;
    }
}
