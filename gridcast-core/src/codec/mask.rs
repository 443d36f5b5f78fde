//! Packed validity mask: one bit per cell, most significant bit first.
//!
//! Bit 7 of byte `k` is cell `8k`, bit 0 is cell `8k + 7`. A set bit
//! marks a valid cell; a clear bit marks no-data.

use std::sync::Arc;

/// Immutable packed validity mask for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    bits: Arc<[u8]>,
    cells: usize,
}

impl ValidityMask {
    /// Wrap packed bytes covering `cells` cells.
    ///
    /// Returns `None` if `bits` is shorter than `ceil(cells / 8)`.
    pub fn from_packed(bits: &[u8], cells: usize) -> Option<Self> {
        let needed = cells.div_ceil(8);
        if bits.len() < needed {
            return None;
        }
        Some(Self {
            bits: Arc::from(&bits[..needed]),
            cells,
        })
    }

    /// Pack one flag per cell.
    pub fn from_flags(flags: impl ExactSizeIterator<Item = bool>) -> Self {
        let cells = flags.len();
        let mut bits = vec![0u8; cells.div_ceil(8)];
        for (i, valid) in flags.enumerate() {
            if valid {
                bits[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            bits: Arc::from(bits),
            cells,
        }
    }

    /// Whether cell `index` holds data. Out-of-range cells are invalid.
    pub fn is_valid(&self, index: usize) -> bool {
        if index >= self.cells {
            return false;
        }
        self.bits[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Number of cells covered.
    pub fn len(&self) -> usize {
        self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells == 0
    }

    /// Packed bytes, `ceil(len / 8)` long.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_is_first_cell() {
        let mask = ValidityMask::from_packed(&[0b1000_0001, 0b0100_0000], 10).unwrap();
        assert!(mask.is_valid(0));
        assert!(!mask.is_valid(1));
        assert!(mask.is_valid(7));
        assert!(!mask.is_valid(8));
        assert!(mask.is_valid(9));
        assert!(!mask.is_valid(10));
    }

    #[test]
    fn packs_flags() {
        let mask = ValidityMask::from_flags([true, false, true].into_iter());
        assert_eq!(mask.as_bytes(), &[0b1010_0000]);
        assert_eq!(mask.len(), 3);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(ValidityMask::from_packed(&[0xFF], 9).is_none());
    }
}
