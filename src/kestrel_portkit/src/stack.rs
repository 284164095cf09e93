//! Stack regions addressed by byte addresses.
use core::fmt;

use crate::{frame::FrameError, STACK_ALIGN, WORD_SIZE};

/// A contiguous, word-aligned memory region used as a stack.
///
/// All accessors take absolute byte addresses, the same values that end up in
/// the stack pointer register. The region grows downward from [`Self::top`].
pub struct StackRegion<'a> {
    words: &'a mut [usize],
}

impl<'a> StackRegion<'a> {
    #[inline]
    pub fn new(words: &'a mut [usize]) -> Self {
        Self { words }
    }

    /// The lowest address of the region.
    #[inline]
    pub fn base(&self) -> usize {
        self.words.as_ptr() as usize
    }

    /// One past the highest address of the region.
    #[inline]
    pub fn top(&self) -> usize {
        self.base() + self.words.len() * WORD_SIZE
    }

    /// [`Self::top`] rounded down to [`STACK_ALIGN`]. This is the initial
    /// stack pointer of a thread using this region.
    #[inline]
    pub fn aligned_top(&self) -> usize {
        self.top() & !(STACK_ALIGN - 1)
    }

    #[inline]
    pub fn len_bytes(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    /// Return `true` if `[addr, addr + len)` is entirely within the region.
    #[inline]
    pub fn contains_range(&self, addr: usize, len: usize) -> bool {
        addr >= self.base() && addr.checked_add(len).map_or(false, |end| end <= self.top())
    }

    /// Convert `addr` to a word index, validating `len` bytes starting there.
    fn index(&self, addr: usize, len: usize) -> Result<usize, FrameError> {
        if addr % WORD_SIZE != 0 {
            Err(FrameError::Misaligned)
        } else if !self.contains_range(addr, len) {
            Err(FrameError::OutOfRegion)
        } else {
            Ok((addr - self.base()) / WORD_SIZE)
        }
    }

    /// Borrow `len` words starting at `addr`.
    pub fn words(&self, addr: usize, len: usize) -> Result<&[usize], FrameError> {
        let i = self.index(addr, len * WORD_SIZE)?;
        Ok(&self.words[i..i + len])
    }

    /// Mutably borrow `len` words starting at `addr`.
    pub fn words_mut(&mut self, addr: usize, len: usize) -> Result<&mut [usize], FrameError> {
        let i = self.index(addr, len * WORD_SIZE)?;
        Ok(&mut self.words[i..i + len])
    }

    pub fn read(&self, addr: usize) -> Result<usize, FrameError> {
        Ok(self.words(addr, 1)?[0])
    }

    pub fn write(&mut self, addr: usize, value: usize) -> Result<(), FrameError> {
        self.words_mut(addr, 1)?[0] = value;
        Ok(())
    }
}

impl fmt::Debug for StackRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StackRegion({:#x}..{:#x})", self.base(), self.top())
    }
}
