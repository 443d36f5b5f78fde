//! Materialization: quantized grid + mask → interleaved display buffer,
//! plus the background scheduler that fills those buffers ahead of
//! playback.
//!
//! The display buffer holds one `(value, visibility)` pair per cell:
//! `value = quantized / scale`, `visibility = mask bit` (1.0 without a
//! mask). Buffers are immutable once built and shared by `Arc`; a cache
//! refresh replaces the whole buffer.

use std::sync::Arc;

use crate::store::{Frame, FrameStore};
use crate::wire::StreamMeta;

// ── Materialized ─────────────────────────────────────────────────

/// Display-ready buffer of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub width: u32,
    pub height: u32,
    /// `2 * width * height` floats: value, visibility, value, …
    pub data: Arc<[f32]>,
}

impl Materialized {
    /// Physical value of cell `index`.
    pub fn value(&self, index: usize) -> Option<f32> {
        self.data.get(index * 2).copied()
    }

    /// Visibility flag (0.0 or 1.0) of cell `index`.
    pub fn visibility(&self, index: usize) -> Option<f32> {
        self.data.get(index * 2 + 1).copied()
    }
}

/// Pure transform from a frame's quantized grid to its display buffer.
pub fn materialize(frame: &Frame, meta: &StreamMeta) -> Materialized {
    let scale = meta.scale;
    let mask = frame.mask();
    let mut data = Vec::with_capacity(frame.quantized().len() * 2);
    for (i, &q) in frame.quantized().iter().enumerate() {
        data.push((q as f64 / scale) as f32);
        let visible = mask.is_none_or(|m| m.is_valid(i));
        data.push(if visible { 1.0 } else { 0.0 });
    }
    Materialized {
        width: meta.width,
        height: meta.height,
        data: Arc::from(data),
    }
}

/// Return frame `index`'s buffer, computing and caching it if absent.
pub fn ensure_materialized(
    store: &mut FrameStore,
    index: usize,
    meta: &StreamMeta,
) -> Option<Materialized> {
    let frame = store.get_mut(index)?;
    if let Some(cached) = frame.materialized() {
        return Some(cached.clone());
    }
    let buffer = materialize(frame, meta);
    frame.set_materialized(buffer.clone());
    Some(buffer)
}

// ── Preloader ────────────────────────────────────────────────────

/// How aggressively an armed scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadMode {
    /// Paced steps between inbound messages while the stream is live.
    Background,
    /// Back-to-back steps with only a cooperative yield (stream is quiet).
    Forced,
}

/// `(materialized, total)` frame counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadProgress {
    pub materialized: usize,
    pub total: usize,
}

impl PreloadProgress {
    pub fn is_complete(&self) -> bool {
        self.materialized >= self.total
    }

    /// Fraction done, 1.0 for an empty store.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.materialized as f64 / self.total as f64
        }
    }
}

/// Incremental materialization scheduler.
///
/// Each [`step`](Self::step) materializes exactly one frame so the caller
/// can yield between steps. Frames at or after the display index come
/// first, then history before it.
#[derive(Debug)]
pub struct Preloader {
    enabled: bool,
    armed: Option<PreloadMode>,
}

impl Preloader {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            armed: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current mode, `None` when idle.
    pub fn armed(&self) -> Option<PreloadMode> {
        self.armed
    }

    /// Turn preloading on (re-arming in the background) or off
    /// (cancelling pending work).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.armed = if enabled {
            Some(PreloadMode::Background)
        } else {
            None
        };
    }

    /// Arm in `mode` if enabled. Forced mode is never downgraded.
    pub fn arm(&mut self, mode: PreloadMode) {
        if !self.enabled {
            return;
        }
        self.armed = match (self.armed, mode) {
            (Some(PreloadMode::Forced), _) => Some(PreloadMode::Forced),
            _ => Some(mode),
        };
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    /// The frame the next step would materialize.
    pub fn next_target(store: &FrameStore, display_index: usize) -> Option<usize> {
        let ahead = store
            .iter()
            .skip(display_index)
            .find(|f| !f.is_materialized())
            .map(Frame::index);
        ahead.or_else(|| {
            store
                .iter()
                .take(display_index)
                .find(|f| !f.is_materialized())
                .map(Frame::index)
        })
    }

    /// Materialize one frame. Disarms and returns `None` once caught up.
    pub fn step(
        &mut self,
        store: &mut FrameStore,
        meta: &StreamMeta,
        display_index: usize,
    ) -> Option<usize> {
        if self.armed.is_none() {
            return None;
        }
        match Self::next_target(store, display_index) {
            Some(index) => {
                ensure_materialized(store, index, meta);
                Some(index)
            }
            None => {
                self.armed = None;
                None
            }
        }
    }

    pub fn progress(store: &FrameStore) -> PreloadProgress {
        PreloadProgress {
            materialized: store.materialized_count(),
            total: store.len(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
