//! Delta codec: generic decompression followed by mask extraction,
//! spatial-delta reversal and, for delta frames, temporal reconstruction.
//!
//! Decompressed payload layout:
//!
//! ```text
//! [mask: ceil(cells / 8) bytes, only if meta.has_alpha]
//! [cells × i32 LE: spatial deltas of the absolute grid (base)
//!                  or of the temporal offsets (delta)]
//! ```
//!
//! Values stay quantized here; division by the scale happens only at
//! materialization time.

pub mod delta;
pub mod mask;

use std::io::Read;
use std::sync::Arc;

use crate::error::GridError;
use crate::wire::{FrameKind, StreamMeta};

pub use mask::ValidityMask;

/// Default zstd level used by the encoder.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── Decompression seam ───────────────────────────────────────────

/// The lossless byte-stream stage wrapped around every payload.
pub trait Compression: Send + Sync {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, GridError>;

    /// Inflate `compressed`, producing at most `limit + 1` bytes.
    ///
    /// Output longer than `limit` is truncated there; the caller sees one
    /// byte too many and rejects the payload without inflating the rest.
    fn decompress(&self, compressed: &[u8], limit: usize) -> Result<Vec<u8>, GridError>;
}

/// zstd framing.
#[derive(Debug, Clone, Copy)]
pub struct Zstd {
    pub level: i32,
}

impl Default for Zstd {
    fn default() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Compression for Zstd {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, GridError> {
        zstd::encode_all(raw, self.level).map_err(GridError::Compression)
    }

    fn decompress(&self, compressed: &[u8], limit: usize) -> Result<Vec<u8>, GridError> {
        let decoder = zstd::stream::read::Decoder::new(compressed).map_err(GridError::Compression)?;
        let mut out = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(GridError::Compression)?;
        Ok(out)
    }
}

// ── DecodedGrid ──────────────────────────────────────────────────

/// Absolute quantized grid recovered from one message.
#[derive(Debug, Clone)]
pub struct DecodedGrid {
    /// Row-major, `width * height` cells.
    pub quantized: Arc<[i32]>,
    pub mask: Option<ValidityMask>,
}

// ── Decoding ─────────────────────────────────────────────────────

/// Reconstruct the absolute grid carried by `payload`.
///
/// `previous` is the reconstructed grid of frame `index - 1`; it is
/// required for [`FrameKind::Delta`] and ignored otherwise.
pub fn decode_grid(
    compression: &dyn Compression,
    kind: FrameKind,
    payload: &[u8],
    meta: &StreamMeta,
    previous: Option<&[i32]>,
    index: usize,
) -> Result<DecodedGrid, GridError> {
    let cells = meta.cell_count();

    // Reject before paying for decompression.
    let previous = match kind {
        FrameKind::Delta => match previous {
            Some(prev) if prev.len() == cells => Some(prev),
            _ => return Err(GridError::MissingPredecessor { index }),
        },
        FrameKind::Base | FrameKind::Correction => None,
    };

    let expected = meta.payload_len();
    let raw = compression.decompress(payload, expected)?;
    if raw.len() != expected {
        return Err(GridError::PayloadSize {
            expected,
            actual: raw.len(),
        });
    }

    let (mask_bytes, int_bytes) = raw.split_at(meta.mask_len());
    let mask = if meta.has_alpha {
        ValidityMask::from_packed(mask_bytes, cells)
    } else {
        None
    };

    let mut grid = delta::ints_from_le(int_bytes);
    delta::undo_spatial(&mut grid, meta.width as usize);
    if let Some(prev) = previous {
        delta::undo_temporal(&mut grid, prev);
    }

    Ok(DecodedGrid {
        quantized: Arc::from(grid),
        mask,
    })
}

/// Build the decompressed payload for an absolute grid or temporal offsets.
///
/// Inverse of [`decode_grid`] minus compression.
pub fn encode_payload(cells: &[i32], mask: Option<&ValidityMask>, width: usize) -> Vec<u8> {
    let mut spatial = cells.to_vec();
    delta::apply_spatial(&mut spatial, width);

    let mut out = Vec::new();
    if let Some(mask) = mask {
        out.extend_from_slice(mask.as_bytes());
    }
    delta::ints_to_le(&spatial, &mut out);
    out
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Extent;

    fn meta(width: u32, height: u32, has_alpha: bool) -> StreamMeta {
        StreamMeta {
            width,
            height,
            extent: Extent::from([0.0, 0.0, 1.0, 1.0]),
            scale: 100.0,
            has_alpha,
        }
    }

    fn compressed(ints: &[i32], mask: &[u8]) -> Vec<u8> {
        let mut raw = mask.to_vec();
        delta::ints_to_le(ints, &mut raw);
        Zstd::default().compress(&raw).unwrap()
    }

    #[test]
    fn base_frame_recovers_absolute_grid() {
        let payload = compressed(&[100, 50], &[]);
        let grid = decode_grid(&Zstd::default(), FrameKind::Base, &payload, &meta(2, 1, false), None, 0)
            .unwrap();
        assert_eq!(&grid.quantized[..], &[100, 150]);
        assert!(grid.mask.is_none());
    }

    #[test]
    fn delta_frame_adds_previous_grid() {
        // Offsets [10, -20] are spatially encoded as [10, -30].
        let payload = compressed(&[10, -30], &[]);
        let grid = decode_grid(
            &Zstd::default(),
            FrameKind::Delta,
            &payload,
            &meta(2, 1, false),
            Some(&[100, 150]),
            1,
        )
        .unwrap();
        assert_eq!(&grid.quantized[..], &[110, 130]);
    }

    #[test]
    fn delta_without_predecessor_is_rejected() {
        let payload = compressed(&[0, 0], &[]);
        let err = decode_grid(&Zstd::default(), FrameKind::Delta, &payload, &meta(2, 1, false), None, 4)
            .unwrap_err();
        assert!(matches!(err, GridError::MissingPredecessor { index: 4 }));
    }

    #[test]
    fn mask_prefix_is_split_off() {
        let payload = compressed(&[5, 0, 0], &[0b1010_0000]);
        let grid = decode_grid(&Zstd::default(), FrameKind::Base, &payload, &meta(3, 1, true), None, 0)
            .unwrap();
        assert_eq!(&grid.quantized[..], &[5, 5, 5]);
        let mask = grid.mask.unwrap();
        assert!(mask.is_valid(0));
        assert!(!mask.is_valid(1));
        assert!(mask.is_valid(2));
    }

    #[test]
    fn wrong_payload_size_is_rejected() {
        let payload = compressed(&[1, 2, 3], &[]);
        let err = decode_grid(&Zstd::default(), FrameKind::Base, &payload, &meta(2, 1, false), None, 0)
            .unwrap_err();
        assert!(matches!(err, GridError::PayloadSize { expected: 8, actual: 9 }));
    }

    #[test]
    fn inflation_stops_past_expected_size() {
        // 64 MiB of zeros compresses to a few KiB.
        let bomb = Zstd::default().compress(&vec![0u8; 64 << 20]).unwrap();
        assert!(bomb.len() < 64 * 1024);

        let err = decode_grid(&Zstd::default(), FrameKind::Base, &bomb, &meta(2, 1, false), None, 0)
            .unwrap_err();
        assert!(matches!(err, GridError::PayloadSize { expected: 8, actual: 9 }));
    }

    #[test]
    fn zstd_decompress_honours_limit() {
        let packed = Zstd::default().compress(&[7u8; 100]).unwrap();
        assert_eq!(Zstd::default().decompress(&packed, 100).unwrap().len(), 100);
        assert_eq!(Zstd::default().decompress(&packed, 10).unwrap().len(), 11);
    }

    #[test]
    fn garbage_fails_decompression() {
        let err = decode_grid(&Zstd::default(), FrameKind::Base, b"nope", &meta(2, 1, false), None, 0)
            .unwrap_err();
        assert!(matches!(err, GridError::Compression(_)));
    }

    #[test]
    fn encoded_payload_decodes_back() {
        let m = meta(3, 2, true);
        let cells = [4, 9, -2, 0, 0, 7];
        let mask = ValidityMask::from_flags([true, true, false, true, true, true].into_iter());
        let raw = encode_payload(&cells, Some(&mask), 3);
        let payload = Zstd::default().compress(&raw).unwrap();
        let grid = decode_grid(&Zstd::default(), FrameKind::Base, &payload, &m, None, 0).unwrap();
        assert_eq!(&grid.quantized[..], &cells);
        assert_eq!(grid.mask, Some(mask));
    }
}
