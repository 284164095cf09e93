//! The register frame codec.
//!
//! A *frame* is the snapshot of a thread's registers stored on its stack while
//! it's not running. Its layout is described by a [`FrameLayout`], an ordered
//! list of [`RegisterSlot`]s chosen by the port at build time.
//!
//! Saving and restoring are all-or-nothing: every precondition (alignment,
//! room in the stack region, the frame tag) is checked before the first
//! register or memory word is modified.
use core::fmt;

use crate::{regs::RegisterFile, stack::StackRegion, FLOAT_WORDS, STACK_ALIGN, WORD_SIZE};

/// Identifies one architectural register that can be stored in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSlot {
    /// A general-purpose register `x{n}`.
    Int(u8),
    /// A floating-point register `f{n}`.
    Float(u8),
    /// The saved program counter.
    Pc,
    /// The processor status word.
    Status,
    /// The floating-point control and status register.
    FloatStatus,
}

const INT_ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

const FLOAT_ABI_NAMES: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

impl RegisterSlot {
    /// The ABI name of the register.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int(i) => INT_ABI_NAMES[i as usize],
            Self::Float(i) => FLOAT_ABI_NAMES[i as usize],
            Self::Pc => "pc",
            Self::Status => "status",
            Self::FloatStatus => "fcsr",
        }
    }

    /// The number of stack words occupied by the slot.
    pub const fn words(self) -> usize {
        match self {
            Self::Float(_) => FLOAT_WORDS,
            _ => 1,
        }
    }
}

impl fmt::Display for RegisterSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The frame variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Saved on trap entry. Holds every register the interrupted code might
    /// be using.
    Interrupted,
    /// Saved by a call-like context switch. Scratch registers are not
    /// preserved across such a switch, so only callee-saved registers are
    /// stored.
    Cooperative,
}

/// Errors returned by the frame codec and [`StackRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame doesn't fit in the stack region below the stack pointer.
    StackOverflow,
    /// The stack pointer doesn't satisfy the required alignment.
    Misaligned,
    /// The address range doesn't belong to the stack region.
    OutOfRegion,
    /// The frame at the given address was saved with a different layout.
    KindMismatch,
    /// The layout doesn't contain the requested register slot.
    NoSuchSlot,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::StackOverflow => "stack overflow",
            Self::Misaligned => "misaligned stack pointer",
            Self::OutOfRegion => "address out of stack region",
            Self::KindMismatch => "frame kind mismatch",
            Self::NoSuchSlot => "register slot not in frame layout",
        })
    }
}

#[doc = svgbobdoc::transform!(
/// The layout of one frame variant.
///
/// ```svgbob
///             higher addresses
///   sp_before -->+-----------------+
///                | padding         | (keeps "sp" 16-byte aligned)
///                +-----------------+
///                | fp_slots[..]    | (only if "include_fp")
///                +-----------------+
///                | int_slots[..]   |
///                +-----------------+
///    sp_after -->| tag             |
///                +-----------------+
///             lower addresses
/// ```
)]
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub kind: FrameKind,
    /// Integer (and control) slots, stored in this order from the lowest
    /// address upward.
    pub int_slots: &'static [RegisterSlot],
    /// Floating-point slots, stored after `int_slots`.
    pub fp_slots: &'static [RegisterSlot],
    /// Whether `fp_slots` are part of the frame. This is fixed per build
    /// configuration.
    pub include_fp: bool,
}

const TAG_INTERRUPTED: usize = 0x6b69_0000;
const TAG_COOPERATIVE: usize = 0x6b63_0000;
const TAG_FP: usize = 1;

impl FrameLayout {
    /// The header word identifying frames saved with this layout.
    pub const fn tag(&self) -> usize {
        let base = match self.kind {
            FrameKind::Interrupted => TAG_INTERRUPTED,
            FrameKind::Cooperative => TAG_COOPERATIVE,
        };
        if self.include_fp {
            base | TAG_FP
        } else {
            base
        }
    }

    /// The number of words used by register slots.
    pub const fn payload_words(&self) -> usize {
        let mut words = 0;
        let mut i = 0;
        while i < self.int_slots.len() {
            words += self.int_slots[i].words();
            i += 1;
        }
        if self.include_fp {
            let mut i = 0;
            while i < self.fp_slots.len() {
                words += self.fp_slots[i].words();
                i += 1;
            }
        }
        words
    }

    /// The total size of a frame in words, including the tag and the padding.
    pub const fn frame_words(&self) -> usize {
        let align_words = STACK_ALIGN / WORD_SIZE;
        let words = 1 + self.payload_words();
        (words + align_words - 1) / align_words * align_words
    }

    /// The total size of a frame in bytes.
    pub const fn frame_size(&self) -> usize {
        self.frame_words() * WORD_SIZE
    }

    /// Iterate over the slots stored in the frame, in storage order.
    pub fn slots(&self) -> impl Iterator<Item = RegisterSlot> + '_ {
        let fp_slots: &[RegisterSlot] = if self.include_fp { self.fp_slots } else { &[] };
        self.int_slots.iter().chain(fp_slots).copied()
    }

    /// Get the word offset of `slot` from the beginning of the frame.
    fn slot_offset(&self, slot: RegisterSlot) -> Option<usize> {
        let mut offset = 1;
        for s in self.slots() {
            if s == slot {
                return Some(offset);
            }
            offset += s.words();
        }
        None
    }

    /// Push a frame holding the contents of `regs` below `sp`. Returns the new
    /// stack pointer, which points to the frame's tag.
    ///
    /// `region` is left unmodified if this method returns `Err(_)`.
    pub fn save(
        &self,
        regs: &RegisterFile,
        region: &mut StackRegion<'_>,
        sp: usize,
    ) -> Result<usize, FrameError> {
        if sp % STACK_ALIGN != 0 {
            return Err(FrameError::Misaligned);
        }
        if sp > region.top() || sp < region.base() {
            return Err(FrameError::OutOfRegion);
        }
        let new_sp = sp
            .checked_sub(self.frame_size())
            .filter(|&new_sp| new_sp >= region.base())
            .ok_or(FrameError::StackOverflow)?;

        let words = region.words_mut(new_sp, self.frame_words())?;
        let (header, mut payload) = words.split_at_mut(1);
        header[0] = self.tag();

        for slot in self.slots() {
            let (cell, rest) = core::mem::take(&mut payload).split_at_mut(slot.words());
            encode(regs.slot(slot), cell);
            payload = rest;
        }

        // Padding
        payload.fill(0);

        log::trace!(
            "saved {:?} frame at {new_sp:#x} ({} words)",
            self.kind,
            self.frame_words()
        );

        Ok(new_sp)
    }

    /// Pop the frame at `sp` into `regs`. Returns the stack pointer value
    /// before the frame was pushed. The stack pointer register in `regs` is
    /// not modified.
    ///
    /// `regs` is left unmodified if this method returns `Err(_)`.
    pub fn restore(
        &self,
        region: &StackRegion<'_>,
        sp: usize,
        regs: &mut RegisterFile,
    ) -> Result<usize, FrameError> {
        if sp % STACK_ALIGN != 0 {
            return Err(FrameError::Misaligned);
        }
        // The tag determines how many words the frame occupies
        if region.read(sp)? != self.tag() {
            return Err(FrameError::KindMismatch);
        }
        let words = region.words(sp, self.frame_words())?;
        let mut payload = &words[1..];

        for slot in self.slots() {
            let (cell, rest) = payload.split_at(slot.words());
            regs.set_slot(slot, decode(cell));
            payload = rest;
        }

        log::trace!("restored {:?} frame from {sp:#x}", self.kind);

        Ok(sp + self.frame_size())
    }

    /// Read one register slot of the frame at `sp` without restoring it.
    pub fn read_slot(
        &self,
        region: &StackRegion<'_>,
        sp: usize,
        slot: RegisterSlot,
    ) -> Result<u64, FrameError> {
        let offset = self.slot_offset(slot).ok_or(FrameError::NoSuchSlot)?;
        if region.read(sp)? != self.tag() {
            return Err(FrameError::KindMismatch);
        }
        Ok(decode(region.words(sp + offset * WORD_SIZE, slot.words())?))
    }

    /// Overwrite one register slot of the frame at `sp`.
    pub fn write_slot(
        &self,
        region: &mut StackRegion<'_>,
        sp: usize,
        slot: RegisterSlot,
        value: u64,
    ) -> Result<(), FrameError> {
        let offset = self.slot_offset(slot).ok_or(FrameError::NoSuchSlot)?;
        if region.read(sp)? != self.tag() {
            return Err(FrameError::KindMismatch);
        }
        encode(
            value,
            region.words_mut(sp + offset * WORD_SIZE, slot.words())?,
        );
        Ok(())
    }
}

/// Split `value` into little-endian words.
#[inline]
fn encode(value: u64, cell: &mut [usize]) {
    for (i, word) in cell.iter_mut().enumerate() {
        *word = value.checked_shr((i * usize::BITS as usize) as u32).unwrap_or(0) as usize;
    }
}

/// The inverse of [`encode`].
#[inline]
fn decode(cell: &[usize]) -> u64 {
    cell.iter().enumerate().fold(0, |acc, (i, &word)| {
        acc | (word as u64)
            .checked_shl((i * usize::BITS as usize) as u32)
            .unwrap_or(0)
    })
}

/// The pair of frame layouts used by a port.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor {
    pub interrupted: FrameLayout,
    pub cooperative: FrameLayout,
}

impl FrameDescriptor {
    #[inline]
    pub const fn layout(&self, kind: FrameKind) -> &FrameLayout {
        match kind {
            FrameKind::Interrupted => &self.interrupted,
            FrameKind::Cooperative => &self.cooperative,
        }
    }

    /// Determine which of the two layouts the frame at `sp` was saved with.
    pub fn peek_kind(&self, region: &StackRegion<'_>, sp: usize) -> Result<FrameKind, FrameError> {
        let tag = region.read(sp)?;
        if tag == self.interrupted.tag() {
            Ok(FrameKind::Interrupted)
        } else if tag == self.cooperative.tag() {
            Ok(FrameKind::Cooperative)
        } else {
            Err(FrameError::KindMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use quickcheck_macros::quickcheck;

    const FULL_INT: [RegisterSlot; 10] = [
        RegisterSlot::Int(1),
        RegisterSlot::Int(5),
        RegisterSlot::Int(6),
        RegisterSlot::Int(10),
        RegisterSlot::Int(11),
        RegisterSlot::Int(17),
        RegisterSlot::Int(28),
        RegisterSlot::Int(31),
        RegisterSlot::Pc,
        RegisterSlot::Status,
    ];
    const REDUCED_INT: [RegisterSlot; 5] = [
        RegisterSlot::Int(1),
        RegisterSlot::Int(8),
        RegisterSlot::Int(9),
        RegisterSlot::Int(10),
        RegisterSlot::Pc,
    ];
    const FP: [RegisterSlot; 3] = [
        RegisterSlot::Float(0),
        RegisterSlot::Float(8),
        RegisterSlot::FloatStatus,
    ];

    fn descriptor(include_fp: bool) -> FrameDescriptor {
        FrameDescriptor {
            interrupted: FrameLayout {
                kind: FrameKind::Interrupted,
                int_slots: &FULL_INT,
                fp_slots: &FP,
                include_fp,
            },
            cooperative: FrameLayout {
                kind: FrameKind::Cooperative,
                int_slots: &REDUCED_INT,
                fp_slots: &FP,
                include_fp,
            },
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Build a register file from random words.
    fn regs_from(words: &[u64]) -> RegisterFile {
        let mut regs = RegisterFile::ZERO;
        let mut words = words.iter().copied().chain(1..);
        for i in 1..32 {
            regs.x[i] = words.next().unwrap() as usize;
        }
        for f in regs.f.iter_mut() {
            *f = words.next().unwrap();
        }
        regs.pc = words.next().unwrap() as usize;
        regs.status = words.next().unwrap() as usize;
        regs.fcsr = words.next().unwrap() as usize;
        regs
    }

    fn round_trip(layout: &FrameLayout, words: &[u64]) {
        let mut storage = vec![0usize; 256];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let original = regs_from(words);

        let frame_sp = layout.save(&original, &mut region, sp).unwrap();
        assert_eq!(sp - frame_sp, layout.frame_size());
        assert_eq!(frame_sp % STACK_ALIGN, 0);

        let mut restored = RegisterFile::ZERO;
        assert_eq!(layout.restore(&region, frame_sp, &mut restored), Ok(sp));

        for slot in layout.slots() {
            assert_eq!(
                restored.slot(slot),
                original.slot(slot),
                "slot {slot} differs"
            );
        }

        // Restoring again yields the same values (the frame is not consumed)
        let mut restored2 = RegisterFile::ZERO;
        layout.restore(&region, frame_sp, &mut restored2).unwrap();
        assert_eq!(restored, restored2);
    }

    #[quickcheck]
    fn quickcheck_round_trip_interrupted(words: Vec<u64>, include_fp: bool) {
        init_logger();
        round_trip(&descriptor(include_fp).interrupted, &words);
    }

    #[quickcheck]
    fn quickcheck_round_trip_cooperative(words: Vec<u64>, include_fp: bool) {
        init_logger();
        round_trip(&descriptor(include_fp).cooperative, &words);
    }

    #[test]
    fn frame_size_is_aligned() {
        for (include_fp, kind) in [false, true]
            .into_iter()
            .cartesian_product([FrameKind::Interrupted, FrameKind::Cooperative])
        {
            let desc = descriptor(include_fp);
            let layout = desc.layout(kind);
            assert_eq!(layout.frame_size() % STACK_ALIGN, 0);
            assert!(layout.frame_words() > layout.payload_words());
        }
    }

    #[test]
    fn fp_slots_only_when_included() {
        let with = descriptor(true).interrupted;
        let without = descriptor(false).interrupted;
        assert!(with.slots().any(|s| s == RegisterSlot::FloatStatus));
        assert!(!without.slots().any(|s| s == RegisterSlot::FloatStatus));
        assert!(with.payload_words() > without.payload_words());
        assert_ne!(with.tag(), without.tag());
    }

    #[test]
    fn kinds_are_not_interchangeable() {
        let desc = descriptor(false);
        let mut storage = vec![0usize; 128];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let regs = regs_from(&[1, 2, 3]);

        let frame_sp = desc.cooperative.save(&regs, &mut region, sp).unwrap();
        assert_eq!(desc.peek_kind(&region, frame_sp), Ok(FrameKind::Cooperative));

        let mut out = RegisterFile::ZERO;
        assert_eq!(
            desc.interrupted.restore(&region, frame_sp, &mut out),
            Err(FrameError::KindMismatch)
        );
        assert_eq!(out, RegisterFile::ZERO);
    }

    #[test]
    fn small_frame_at_top_restored_with_large_layout() {
        let desc = descriptor(false);
        assert!(desc.interrupted.frame_words() > desc.cooperative.frame_words());
        // Exactly one Cooperative frame fits
        let mut storage = vec![0usize; desc.cooperative.frame_words() + STACK_ALIGN / WORD_SIZE];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let regs = regs_from(&[4, 5, 6]);

        let frame_sp = desc.cooperative.save(&regs, &mut region, sp).unwrap();
        assert!(frame_sp + desc.interrupted.frame_size() > region.top());

        let mut out = RegisterFile::ZERO;
        assert_eq!(
            desc.interrupted.restore(&region, frame_sp, &mut out),
            Err(FrameError::KindMismatch)
        );
        assert_eq!(out, RegisterFile::ZERO);

        assert_eq!(desc.cooperative.restore(&region, frame_sp, &mut out), Ok(sp));
    }

    #[test]
    fn overflow_leaves_region_untouched() {
        let desc = descriptor(true);
        // Too small for a full frame
        let mut storage = vec![0x55usize; 8];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let regs = regs_from(&[9, 9, 9]);

        assert_eq!(
            desc.interrupted.save(&regs, &mut region, sp),
            Err(FrameError::StackOverflow)
        );
        drop(region);
        assert!(storage.iter().all(|&w| w == 0x55));
    }

    #[test]
    fn misaligned_sp() {
        let desc = descriptor(false);
        let mut storage = vec![0usize; 128];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top() - WORD_SIZE;
        assert_eq!(
            desc.cooperative.save(&RegisterFile::ZERO, &mut region, sp),
            Err(FrameError::Misaligned)
        );
    }

    #[test]
    fn slot_patching() {
        let desc = descriptor(true);
        let layout = &desc.interrupted;
        let mut storage = vec![0usize; 256];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let mut regs = RegisterFile::ZERO;
        regs.pc = 0x8000_0100;
        regs.f[8] = 0x0123_4567_89ab_cdef;

        let frame_sp = layout.save(&regs, &mut region, sp).unwrap();
        assert_eq!(
            layout.read_slot(&region, frame_sp, RegisterSlot::Pc),
            Ok(0x8000_0100)
        );
        assert_eq!(
            layout.read_slot(&region, frame_sp, RegisterSlot::Float(8)),
            Ok(0x0123_4567_89ab_cdef)
        );

        layout
            .write_slot(&mut region, frame_sp, RegisterSlot::Pc, 0x8000_0104)
            .unwrap();
        let mut out = RegisterFile::ZERO;
        layout.restore(&region, frame_sp, &mut out).unwrap();
        assert_eq!(out.pc, 0x8000_0104);
        assert_eq!(out.f[8], 0x0123_4567_89ab_cdef);

        assert_eq!(
            layout.read_slot(&region, frame_sp, RegisterSlot::Int(8)),
            Err(FrameError::NoSuchSlot)
        );
    }
}
