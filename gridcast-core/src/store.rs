//! Frame store: the ordered, append-only frames of the live generation.
//!
//! Index `i` always holds the `i`-th frame received in the generation;
//! there are no gaps. A frame's quantized grid and mask never change after
//! append except through [`FrameStore::correct`], which swaps them
//! wholesale and drops the cached materialization.

use std::sync::Arc;

use crate::codec::{DecodedGrid, ValidityMask};
use crate::error::GridError;
use crate::materialize::Materialized;

// ── Frame ────────────────────────────────────────────────────────

/// One time-step of the field.
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    valid_time: u32,
    quantized: Arc<[i32]>,
    mask: Option<ValidityMask>,
    materialized: Option<Materialized>,
}

impl Frame {
    pub fn new(index: usize, valid_time: u32, grid: DecodedGrid) -> Self {
        Self {
            index,
            valid_time,
            quantized: grid.quantized,
            mask: grid.mask,
            materialized: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Seconds since epoch of the physical moment represented.
    pub fn valid_time(&self) -> u32 {
        self.valid_time
    }

    /// Absolute quantized grid, row-major.
    pub fn quantized(&self) -> &Arc<[i32]> {
        &self.quantized
    }

    pub fn mask(&self) -> Option<&ValidityMask> {
        self.mask.as_ref()
    }

    /// Cached display buffer, if computed.
    pub fn materialized(&self) -> Option<&Materialized> {
        self.materialized.as_ref()
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized.is_some()
    }

    pub(crate) fn set_materialized(&mut self, buffer: Materialized) {
        self.materialized = Some(buffer);
    }
}

// ── FrameStore ───────────────────────────────────────────────────

/// Exclusive owner of the live generation's frames.
#[derive(Debug, Default)]
pub struct FrameStore {
    frames: Vec<Frame>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the next index.
    ///
    /// Rejects a frame whose index is not exactly [`len`](Self::len).
    pub fn append(&mut self, frame: Frame) -> Result<usize, GridError> {
        let expected = self.frames.len();
        if frame.index != expected {
            return Err(GridError::OutOfOrder {
                expected,
                got: frame.index,
            });
        }
        self.frames.push(frame);
        Ok(expected)
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Index of the newest frame, if any.
    pub fn last_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }

    /// Position of the frame carrying `valid_time`.
    pub fn find_valid_time(&self, valid_time: u32) -> Option<usize> {
        self.frames.iter().position(|f| f.valid_time == valid_time)
    }

    /// Drop the cached display buffer of frame `index`.
    ///
    /// Returns `false` if the frame does not exist.
    pub fn invalidate_materialization(&mut self, index: usize) -> bool {
        match self.frames.get_mut(index) {
            Some(frame) => {
                frame.materialized = None;
                true
            }
            None => false,
        }
    }

    /// Replace the grid of an existing frame (last write wins) and
    /// invalidate its cache.
    pub fn correct(&mut self, index: usize, grid: DecodedGrid) -> Result<(), GridError> {
        let len = self.frames.len();
        let frame = self.frames.get_mut(index).ok_or(GridError::OutOfOrder {
            expected: len,
            got: index,
        })?;
        frame.quantized = grid.quantized;
        frame.mask = grid.mask;
        frame.materialized = None;
        Ok(())
    }

    /// Drop every frame. Called once per generation, before its first append.
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Number of frames with a cached display buffer.
    pub fn materialized_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_materialized()).count()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(cells: &[i32]) -> DecodedGrid {
        DecodedGrid {
            quantized: Arc::from(cells),
            mask: None,
        }
    }

    fn frame(index: usize, valid_time: u32) -> Frame {
        Frame::new(index, valid_time, grid(&[index as i32, 0]))
    }

    #[test]
    fn appends_in_order() {
        let mut store = FrameStore::new();
        assert_eq!(store.append(frame(0, 100)).unwrap(), 0);
        assert_eq!(store.append(frame(1, 200)).unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_index(), Some(1));
        assert_eq!(store.get(1).unwrap().valid_time(), 200);
        assert!(store.get(2).is_none());
    }

    #[test]
    fn rejects_gap_and_duplicate() {
        let mut store = FrameStore::new();
        store.append(frame(0, 100)).unwrap();
        let err = store.append(frame(2, 300)).unwrap_err();
        assert!(matches!(err, GridError::OutOfOrder { expected: 1, got: 2 }));
        let err = store.append(frame(0, 100)).unwrap_err();
        assert!(matches!(err, GridError::OutOfOrder { expected: 1, got: 0 }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reset_drops_everything() {
        let mut store = FrameStore::new();
        store.append(frame(0, 100)).unwrap();
        store.reset();
        assert!(store.is_empty());
        assert!(store.get(0).is_none());
        assert_eq!(store.last_index(), None);
        store.append(frame(0, 500)).unwrap();
    }

    #[test]
    fn correction_replaces_grid() {
        let mut store = FrameStore::new();
        store.append(frame(0, 100)).unwrap();
        store.correct(0, grid(&[9, 9])).unwrap();
        assert_eq!(&store.get(0).unwrap().quantized()[..], &[9, 9]);
        assert!(store.correct(3, grid(&[1, 1])).is_err());
    }

    #[test]
    fn finds_by_valid_time() {
        let mut store = FrameStore::new();
        store.append(frame(0, 100)).unwrap();
        store.append(frame(1, 200)).unwrap();
        assert_eq!(store.find_valid_time(200), Some(1));
        assert_eq!(store.find_valid_time(300), None);
        assert!(!store.invalidate_materialization(5));
    }
}
