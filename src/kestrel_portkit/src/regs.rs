//! The register file of a hart as seen by the context switching code.
use core::fmt;

use crate::frame::RegisterSlot;

/// The index of the return address register in [`RegisterFile::x`].
pub const RA: usize = 1;
/// The index of the stack pointer in [`RegisterFile::x`].
pub const SP: usize = 2;
/// The index of the first argument/return value register.
pub const A0: usize = 10;
/// The index of the register holding a system service number.
pub const A7: usize = 17;

/// A snapshot of the architectural registers relevant to context switching.
///
/// This is the unit the frame codec transfers between a hart and a stack.
/// `x[0]` is hard-wired to zero on real hardware and is never saved.
///
/// The layout is `#[repr(C)]` so that assembler code can spill the live
/// registers into it directly.
#[derive(Clone, PartialEq, Eq)]
#[repr(C)]
pub struct RegisterFile {
    /// General-purpose registers `x0`–`x31`.
    pub x: [usize; 32],
    /// The program counter (the value of `xepc` while in a trap handler).
    pub pc: usize,
    /// The processor status word (`xstatus`).
    pub status: usize,
    /// The floating-point control and status register.
    pub fcsr: usize,
    /// Floating-point registers `f0`–`f31`, stored as 64-bit values.
    pub f: [u64; 32],
}

impl RegisterFile {
    pub const ZERO: Self = Self {
        x: [0; 32],
        pc: 0,
        status: 0,
        fcsr: 0,
        f: [0; 32],
    };

    #[inline]
    pub fn sp(&self) -> usize {
        self.x[SP]
    }

    #[inline]
    pub fn set_sp(&mut self, sp: usize) {
        self.x[SP] = sp;
    }

    /// Read the value held by `slot`. Integer slots are zero-extended.
    pub fn slot(&self, slot: RegisterSlot) -> u64 {
        match slot {
            RegisterSlot::Int(i) => self.x[i as usize] as u64,
            RegisterSlot::Float(i) => self.f[i as usize],
            RegisterSlot::Pc => self.pc as u64,
            RegisterSlot::Status => self.status as u64,
            RegisterSlot::FloatStatus => self.fcsr as u64,
        }
    }

    /// Assign `value` to `slot`. Integer slots are truncated to the word size.
    pub fn set_slot(&mut self, slot: RegisterSlot, value: u64) {
        match slot {
            // `x0` is read-only
            RegisterSlot::Int(0) => {}
            RegisterSlot::Int(i) => self.x[i as usize] = value as usize,
            RegisterSlot::Float(i) => self.f[i as usize] = value,
            RegisterSlot::Pc => self.pc = value as usize,
            RegisterSlot::Status => self.status = value as usize,
            RegisterSlot::FloatStatus => self.fcsr = value as usize,
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut d = f.debug_struct("RegisterFile");
        d.field("pc", &format_args!("{:#x}", self.pc))
            .field("status", &format_args!("{:#x}", self.status))
            .field("sp", &format_args!("{:#x}", self.sp()));
        // Only print non-zero registers to keep the output readable
        for (i, &value) in self.x.iter().enumerate().skip(1) {
            if value != 0 && i != SP {
                d.field(RegisterSlot::Int(i as u8).name(), &format_args!("{value:#x}"));
            }
        }
        for (i, &value) in self.f.iter().enumerate() {
            if value != 0 {
                d.field(RegisterSlot::Float(i as u8).name(), &format_args!("{value:#x}"));
            }
        }
        if self.fcsr != 0 {
            d.field("fcsr", &format_args!("{:#x}", self.fcsr));
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn x0_is_hardwired() {
        let mut regs = RegisterFile::ZERO;
        regs.set_slot(RegisterSlot::Int(0), 42);
        assert_eq!(regs.slot(RegisterSlot::Int(0)), 0);
    }

    #[quickcheck]
    fn quickcheck_slot_accessors(i: u8, value: usize, fvalue: u64) {
        let i = i % 31 + 1;
        let mut regs = RegisterFile::ZERO;
        regs.set_slot(RegisterSlot::Int(i), value as u64);
        regs.set_slot(RegisterSlot::Float(i), fvalue);
        assert_eq!(regs.x[i as usize], value);
        assert_eq!(regs.slot(RegisterSlot::Float(i)), fvalue);
    }
}
