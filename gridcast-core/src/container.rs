//! Append-only stream file container.
//!
//! A stream file is a sequence of records:
//!
//! ```text
//! [len: u32 LE][kind: u8][body: len bytes]
//! body = [valid time: u32 LE][meta len: u16 LE][meta][payload]
//! ```
//!
//! The body is a wire message without its channel/kind prefix, so a
//! record becomes a wire message by prepending `[channel][kind]`.
//! [`ChunkCodec`] frames records for `tokio_util`; an incomplete
//! trailing record stays buffered until the writer finishes it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::GridError;

/// Record header: length + kind.
pub const RECORD_HEADER_SIZE: usize = 5;

/// Largest record body accepted.
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

// ── Chunk ────────────────────────────────────────────────────────

/// One container record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: u8,
    pub body: Bytes,
}

impl Chunk {
    /// Split a serialised wire message into a record.
    pub fn from_wire(message: &[u8]) -> Result<Self, GridError> {
        if message.len() < 2 {
            return Err(GridError::TruncatedHeader {
                len: message.len(),
                needed: 2,
            });
        }
        Ok(Self {
            kind: message[1],
            body: Bytes::copy_from_slice(&message[2..]),
        })
    }

    /// Rebuild the wire message for `channel`.
    pub fn into_wire(self, channel: u8) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.body.len());
        out.put_u8(channel);
        out.put_u8(self.kind);
        out.put_slice(&self.body);
        out.freeze()
    }
}

// ── ChunkCodec ───────────────────────────────────────────────────

/// `tokio_util` codec for container records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkCodec;

impl Decoder for ChunkCodec {
    type Item = Chunk;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(GridError::Framing("record exceeds maximum size"));
        }
        if src.len() < RECORD_HEADER_SIZE + len {
            src.reserve(RECORD_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let kind = src.get_u8();
        let body = src.split_to(len).freeze();
        Ok(Some(Chunk { kind, body }))
    }
}

impl Encoder<Chunk> for ChunkCodec {
    type Error = GridError;

    fn encode(&mut self, item: Chunk, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body.len() > MAX_RECORD_SIZE {
            return Err(GridError::Framing("record exceeds maximum size"));
        }
        dst.reserve(RECORD_HEADER_SIZE + item.body.len());
        dst.put_u32_le(item.body.len() as u32);
        dst.put_u8(item.kind);
        dst.put_slice(&item.body);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
