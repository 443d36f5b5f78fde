//! Producer-side stream encoder.
//!
//! Quantizes float grids and emits wire messages: a base frame at
//! frame 0 and every `iframe_interval` frames, delta frames in between.
//! Base frames carry the metadata record. Non-finite cells are written
//! as quantized 0 and, when the stream has a mask channel, flagged
//! invalid.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{self, Compression, ValidityMask, Zstd, delta};
use crate::error::GridError;
use crate::wire::{FrameKind, StreamMeta, WireMessage};

/// Frames between two base frames.
pub const DEFAULT_IFRAME_INTERVAL: u64 = 8;

/// Stateful encoder for one channel.
pub struct StreamEncoder {
    meta: StreamMeta,
    channel: u8,
    iframe_interval: u64,
    compression: Arc<dyn Compression>,
    previous: Option<Vec<i32>>,
    previous_valid_time: Option<u32>,
    frame_count: u64,
}

impl StreamEncoder {
    pub fn new(meta: StreamMeta, channel: u8) -> Self {
        Self {
            meta,
            channel,
            iframe_interval: DEFAULT_IFRAME_INTERVAL,
            compression: Arc::new(Zstd::default()),
            previous: None,
            previous_valid_time: None,
            frame_count: 0,
        }
    }

    /// Emit a base frame every `interval` frames (minimum 1).
    pub fn with_iframe_interval(mut self, interval: u64) -> Self {
        self.iframe_interval = interval.max(1);
        self
    }

    pub fn with_compression(mut self, compression: Arc<dyn Compression>) -> Self {
        self.compression = compression;
        self
    }

    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Encode the next frame and serialise it.
    pub fn encode(&mut self, values: &[f32], valid_time: u32) -> Result<Vec<u8>, GridError> {
        self.encode_message(values, valid_time)?.to_bytes()
    }

    /// Encode the next frame.
    pub fn encode_message(
        &mut self,
        values: &[f32],
        valid_time: u32,
    ) -> Result<WireMessage, GridError> {
        let (grid, mask) = self.quantize(values)?;

        let kind = match &self.previous {
            Some(_) if self.frame_count % self.iframe_interval != 0 => FrameKind::Delta,
            _ => FrameKind::Base,
        };
        let cells = match (&self.previous, kind) {
            (Some(prev), FrameKind::Delta) => delta::temporal_offsets(&grid, prev),
            _ => grid.clone(),
        };

        let msg = self.message(kind, &cells, mask.as_ref(), valid_time)?;
        self.previous = Some(grid);
        self.previous_valid_time = Some(valid_time);
        self.frame_count += 1;
        Ok(msg)
    }

    /// Encode a correction replacing the frame sent with `valid_time`.
    pub fn encode_correction(&mut self, values: &[f32], valid_time: u32) -> Result<Vec<u8>, GridError> {
        let (grid, mask) = self.quantize(values)?;
        let msg = self.message(FrameKind::Correction, &grid, mask.as_ref(), valid_time)?;
        // The receiver deltas against the corrected grid from now on.
        if self.previous_valid_time == Some(valid_time) {
            self.previous = Some(grid);
        }
        msg.to_bytes()
    }

    fn message(
        &self,
        kind: FrameKind,
        cells: &[i32],
        mask: Option<&ValidityMask>,
        valid_time: u32,
    ) -> Result<WireMessage, GridError> {
        let raw = codec::encode_payload(cells, mask, self.meta.width as usize);
        let payload = self.compression.compress(&raw)?;
        Ok(WireMessage {
            channel: self.channel,
            kind,
            valid_time,
            meta: (kind == FrameKind::Base).then(|| self.meta.clone()),
            payload: Bytes::from(payload),
        })
    }

    fn quantize(&self, values: &[f32]) -> Result<(Vec<i32>, Option<ValidityMask>), GridError> {
        if values.len() != self.meta.cell_count() {
            return Err(GridError::PayloadSize {
                expected: self.meta.cell_count(),
                actual: values.len(),
            });
        }
        let scale = self.meta.scale;
        let grid = values
            .iter()
            .map(|&v| {
                if v.is_finite() && v != f32::MIN {
                    (v as f64 * scale).round() as i32
                } else {
                    0
                }
            })
            .collect();
        let mask = self.meta.has_alpha.then(|| {
            ValidityMask::from_flags(values.iter().map(|v| v.is_finite() && *v != f32::MIN))
        });
        Ok((grid, mask))
    }
}

// ── Tests ────────────────────────────────────────────────────────
