//! Wire message parser.
//!
//! Every transport frame carries one message:
//!
//! ```text
//! offset  size  field
//! 0       1     channel id
//! 1       1     frame kind (0 = base, 1 = delta, 2 = correction)
//! 2       4     valid time, seconds since epoch (u32 LE)
//! 6       2     metadata length (u16 LE)
//! 8       n     metadata record, UTF-8 JSON (only if n > 0)
//! 8+n     ..    compressed payload
//! ```
//!
//! Parsing is pure: nothing here touches session state.

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Quantization divisor used when the metadata record omits one.
pub const DEFAULT_SCALE: f64 = 100.0;

/// Largest grid accepted from a metadata record (a 256 MiB payload).
pub const MAX_GRID_CELLS: usize = 1 << 26;

// ── FrameKind ────────────────────────────────────────────────────

/// How a message's payload relates to the frames before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Absolute grid, spatial-delta encoded.
    Base = 0x00,
    /// Offset from the previous frame's grid, spatial-delta encoded.
    Delta = 0x01,
    /// Absolute grid replacing an already received frame.
    Correction = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = GridError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Base),
            0x01 => Ok(Self::Delta),
            0x02 => Ok(Self::Correction),
            other => Err(GridError::UnknownFrameKind(other)),
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Delta => write!(f, "delta"),
            Self::Correction => write!(f, "correction"),
        }
    }
}

// ── Extent ───────────────────────────────────────────────────────

/// Geographic bounding box, `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Extent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl From<[f64; 4]> for Extent {
    fn from([min_lon, min_lat, max_lon, max_lat]: [f64; 4]) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }
}

impl From<Extent> for [f64; 4] {
    fn from(e: Extent) -> Self {
        [e.min_lon, e.min_lat, e.max_lon, e.max_lat]
    }
}

// ── StreamMeta ───────────────────────────────────────────────────

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

/// Per-generation grid constants carried by the metadata record.
///
/// Set by the first message of a generation and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMeta {
    pub width: u32,
    pub height: u32,
    pub extent: Extent,
    /// Quantization divisor: `physical = quantized / scale`.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Whether payloads carry a validity bitmask prefix.
    #[serde(default)]
    pub has_alpha: bool,
}

impl StreamMeta {
    /// Number of grid cells.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes occupied by the packed validity mask, or 0 without one.
    pub fn mask_len(&self) -> usize {
        if self.has_alpha {
            self.cell_count().div_ceil(8)
        } else {
            0
        }
    }

    /// Exact size of a decompressed payload for this grid.
    ///
    /// Only meaningful for validated metadata, whose cell count is
    /// bounded by [`MAX_GRID_CELLS`].
    pub fn payload_len(&self) -> usize {
        self.mask_len() + self.cell_count() * 4
    }

    /// Parse and validate a metadata record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GridError> {
        let meta: Self = serde_json::from_slice(bytes)?;
        meta.validate()?;
        Ok(meta)
    }

    /// Serialise to the wire record.
    pub fn to_json(&self) -> Result<Vec<u8>, GridError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), GridError> {
        if self.width == 0 || self.height == 0 {
            return Err(GridError::InvalidGrid("grid has zero width or height"));
        }
        let cells = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or(GridError::InvalidGrid("grid cell count overflows"))?;
        if cells > MAX_GRID_CELLS {
            return Err(GridError::InvalidGrid("grid exceeds the maximum cell count"));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(GridError::InvalidGrid("scale must be finite and non-zero"));
        }
        Ok(())
    }
}

// ── WireMessage ──────────────────────────────────────────────────

/// A parsed message: header fields, optional metadata, compressed payload.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub channel: u8,
    pub kind: FrameKind,
    pub valid_time: u32,
    pub meta: Option<StreamMeta>,
    /// Still compressed.
    pub payload: Bytes,
}

impl WireMessage {
    /// Parse a raw transport buffer.
    ///
    /// Fails without side effects on a short header, an unknown frame
    /// kind, or a malformed metadata record.
    pub fn parse(raw: Bytes) -> Result<Self, GridError> {
        if raw.len() < HEADER_SIZE {
            return Err(GridError::TruncatedHeader {
                len: raw.len(),
                needed: HEADER_SIZE,
            });
        }

        let mut buf = raw;
        let channel = buf.get_u8();
        let kind = FrameKind::try_from(buf.get_u8())?;
        let valid_time = buf.get_u32_le();
        let meta_len = buf.get_u16_le() as usize;

        let meta = if meta_len > 0 {
            if buf.remaining() < meta_len {
                return Err(GridError::TruncatedMetadata {
                    declared: meta_len,
                    available: buf.remaining(),
                });
            }
            let record = buf.split_to(meta_len);
            Some(StreamMeta::from_json(&record)?)
        } else {
            None
        };

        Ok(Self {
            channel,
            kind,
            valid_time,
            meta,
            payload: buf,
        })
    }

    /// Serialise back to the wire layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GridError> {
        let record = match &self.meta {
            Some(meta) => meta.to_json()?,
            None => Vec::new(),
        };
        let meta_len = u16::try_from(record.len())
            .map_err(|_| GridError::InvalidGrid("metadata record exceeds 65535 bytes"))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + record.len() + self.payload.len());
        out.push(self.channel);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.valid_time.to_le_bytes());
        out.extend_from_slice(&meta_len.to_le_bytes());
        out.extend_from_slice(&record);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────
