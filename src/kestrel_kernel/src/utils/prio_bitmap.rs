//! Provides `PrioBitmap`, a bit array structure supporting constant-time
//! bit scan operations.
use core::fmt;

type Word = usize;
const WORD_LEN: usize = Word::BITS as usize;

/// The maximum bit count supported by [`PrioBitmap`].
pub const PRIO_BITMAP_MAX_LEN: usize = WORD_LEN * WORD_LEN;

/// A two-level bit array structure supporting constant-time bit scan
/// operations. Stores up to [`PRIO_BITMAP_MAX_LEN`] entries.
///
/// All methods panic when the given bit position is out of range.
#[derive(Clone, Copy)]
pub struct PrioBitmap {
    // Invariant: `first` has bit `i` set iff `second[i] != 0`
    first: Word,
    second: [Word; WORD_LEN],
}

impl PrioBitmap {
    pub const INIT: Self = Self {
        first: 0,
        second: [0; WORD_LEN],
    };

    /// Get the bit at the specified position.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        self.second[i / WORD_LEN] & (1 << (i % WORD_LEN)) != 0
    }

    /// Clear the bit at the specified position.
    #[inline]
    pub fn clear(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group &= !(1 << (i % WORD_LEN));
        if *group == 0 {
            self.first &= !(1 << (i / WORD_LEN));
        }
    }

    /// Set the bit at the specified position.
    #[inline]
    pub fn set(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group |= 1 << (i % WORD_LEN);
        self.first |= 1 << (i / WORD_LEN);
    }

    /// Get the position of the first set bit.
    #[inline]
    pub fn find_set(&self) -> Option<usize> {
        if self.first == 0 {
            return None;
        }
        let group_i = self.first.trailing_zeros() as usize;
        let group = self.second[group_i];
        let subgroup_i = group.trailing_zeros() as usize;
        debug_assert_ne!(subgroup_i, WORD_LEN);
        Some(subgroup_i + group_i * WORD_LEN)
    }

    /// Iterate over the positions of the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.second
            .iter()
            .enumerate()
            .filter(|&(_, &group)| group != 0)
            .flat_map(|(group_i, &group)| {
                (0..WORD_LEN)
                    .filter(move |&bit| group & (1 << bit) != 0)
                    .map(move |bit| bit + group_i * WORD_LEN)
            })
    }
}

impl Default for PrioBitmap {
    fn default() -> Self {
        Self::INIT
    }
}

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
