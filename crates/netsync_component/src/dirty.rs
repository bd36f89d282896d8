//! 64-bit dirty masks.
//!
//! One bit per synchronized field (or per component, or per sync object).
//! The width is part of the wire format: masks are written as a single
//! varint, so widening [`MAX_DIRTY_BITS`] means every peer must change
//! together.

use serde::{Deserialize, Serialize};

/// Number of individually tracked slots in one mask.
pub const MAX_DIRTY_BITS: usize = 64;

/// A set of dirty slots, one bit per slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirtyBits(pub u64);

impl DirtyBits {
    /// No slot dirty.
    pub const NONE: DirtyBits = DirtyBits(0);

    /// Every slot dirty. Used for initial (full) serialization.
    pub const ALL: DirtyBits = DirtyBits(u64::MAX);

    /// A mask with the lowest `count` bits set.
    #[must_use]
    pub const fn first(count: usize) -> Self {
        if count >= MAX_DIRTY_BITS {
            Self::ALL
        } else {
            Self((1u64 << count) - 1)
        }
    }

    /// Raw mask value.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if bit `index` is set. Indexes past the mask are never set.
    #[must_use]
    pub const fn contains(self, index: usize) -> bool {
        index < MAX_DIRTY_BITS && self.0 & (1u64 << index) != 0
    }

    /// Set bit `index`. Indexes past the mask are ignored.
    pub fn insert(&mut self, index: usize) {
        debug_assert!(index < MAX_DIRTY_BITS, "dirty bit {index} out of range");
        if index < MAX_DIRTY_BITS {
            self.0 |= 1u64 << index;
        }
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterate the indexes of set bits in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let index = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            Some(index)
        })
    }

    /// Number of set bits.
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}
