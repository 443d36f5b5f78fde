//! Spatial and temporal differencing of quantized grids.
//!
//! Spatial: within each row the first cell is absolute and every other
//! cell is the difference from its left neighbour. Rows are independent.
//!
//! Temporal: a delta frame's grid is a per-cell offset from the previous
//! frame's reconstructed grid.
//!
//! All arithmetic wraps so that encode and decode are exact inverses
//! for every `i32` input.

/// Replace each row with its running sum, in place.
///
/// `width` must divide `cells.len()`.
pub fn undo_spatial(cells: &mut [i32], width: usize) {
    debug_assert!(width > 0 && cells.len() % width == 0);
    for row in cells.chunks_exact_mut(width) {
        let mut acc = 0i32;
        for cell in row {
            acc = acc.wrapping_add(*cell);
            *cell = acc;
        }
    }
}

/// Replace each row with left-neighbour differences, in place.
pub fn apply_spatial(cells: &mut [i32], width: usize) {
    debug_assert!(width > 0 && cells.len() % width == 0);
    for row in cells.chunks_exact_mut(width) {
        let mut prev = 0i32;
        for cell in row {
            let cur = *cell;
            *cell = cur.wrapping_sub(prev);
            prev = cur;
        }
    }
}

/// Add `previous` into `offsets` cell by cell.
pub fn undo_temporal(offsets: &mut [i32], previous: &[i32]) {
    debug_assert_eq!(offsets.len(), previous.len());
    for (cell, prev) in offsets.iter_mut().zip(previous) {
        *cell = cell.wrapping_add(*prev);
    }
}

/// Per-cell difference `current - previous`.
pub fn temporal_offsets(current: &[i32], previous: &[i32]) -> Vec<i32> {
    debug_assert_eq!(current.len(), previous.len());
    current
        .iter()
        .zip(previous)
        .map(|(cur, prev)| cur.wrapping_sub(*prev))
        .collect()
}

/// Decode a little-endian `i32` sequence.
pub fn ints_from_le(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Append `cells` as little-endian `i32`s.
pub fn ints_to_le(cells: &[i32], out: &mut Vec<u8>) {
    out.reserve(cells.len() * 4);
    for cell in cells {
        out.extend_from_slice(&cell.to_le_bytes());
    }
}

// ── Tests ────────────────────────────────────────────────────────
