//! Control and status register bit definitions and trap cause decoding
//!
//! The "x" prefix stands for the privilege level the kernel runs in (`m` for
//! M-mode, `s` for S-mode). Bit positions that depend on the privilege level
//! are obtained through the `const fn`s taking a `privilege_level` parameter.
use bitflags::bitflags;

bitflags! {
    /// `mstatus` / `sstatus`
    pub struct XStatus: usize {
        const SIE = 1 << 1;
        const MIE = 1 << 3;
        const SPIE = 1 << 5;
        const MPIE = 1 << 7;
        const SPP = 1 << 8;
        const MPP = 0b11 << 11;
        const FS = 0b11 << 13;
    }
}

impl XStatus {
    /// `xstatus.XIE`
    #[inline]
    pub const fn xie(privilege_level: u8) -> Self {
        Self::from_bits_truncate(1 << privilege_level)
    }

    /// `xstatus.XPIE`
    #[inline]
    pub const fn xpie(privilege_level: u8) -> Self {
        Self::from_bits_truncate(1 << (4 + privilege_level))
    }

    /// `xstatus.XPP` set to `privilege_level`, i.e., an exception return
    /// stays in the same privilege level.
    #[inline]
    pub const fn xpp(privilege_level: u8) -> Self {
        if privilege_level == 3 {
            Self::MPP
        } else {
            Self::SPP
        }
    }
}

bitflags! {
    /// `mie` / `sie` / `mip` / `sip`
    pub struct XInterrupts: usize {
        const SSI = 1 << 1;
        const MSI = 1 << 3;
        const STI = 1 << 5;
        const MTI = 1 << 7;
        const SEI = 1 << 9;
        const MEI = 1 << 11;
    }
}

impl XInterrupts {
    /// The software interrupt bit of the privilege level.
    #[inline]
    pub const fn xsi(privilege_level: u8) -> Self {
        Self::from_bits_truncate(1 << privilege_level)
    }

    /// The timer interrupt bit of the privilege level.
    #[inline]
    pub const fn xti(privilege_level: u8) -> Self {
        Self::from_bits_truncate(1 << (4 + privilege_level))
    }

    /// The external interrupt bit of the privilege level.
    #[inline]
    pub const fn xei(privilege_level: u8) -> Self {
        Self::from_bits_truncate(1 << (8 + privilege_level))
    }
}

/// The bit of `xcause` indicating an asynchronous interrupt.
pub const XCAUSE_INTERRUPT: usize = 1 << (usize::BITS - 1);

pub const EXCEPTION_INSTRUCTION_MISALIGNED: usize = 0;
pub const EXCEPTION_ILLEGAL_INSTRUCTION: usize = 2;
pub const EXCEPTION_BREAKPOINT: usize = 3;
pub const EXCEPTION_LOAD_ACCESS_FAULT: usize = 5;
pub const EXCEPTION_STORE_ACCESS_FAULT: usize = 7;
pub const EXCEPTION_ECALL_U: usize = 8;
pub const EXCEPTION_ECALL_S: usize = 9;
pub const EXCEPTION_ECALL_M: usize = 11;

/// A decoded trap cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapCause {
    /// The software interrupt of the kernel's privilege level.
    SoftwareInterrupt,
    /// The timer interrupt of the kernel's privilege level.
    TimerInterrupt,
    /// Any other interrupt, identified by its interrupt code.
    ExternalInterrupt(usize),
    /// An environment call from any privilege level.
    EnvironmentCall(usize),
    /// Any other exception, identified by its exception code. This is fatal.
    Exception(usize),
}

impl TrapCause {
    /// Decode the value of `xcause`.
    pub const fn decode(xcause: usize, privilege_level: u8) -> Self {
        let code = xcause & !XCAUSE_INTERRUPT;
        let p = privilege_level as usize;
        if xcause & XCAUSE_INTERRUPT != 0 {
            if code == p {
                Self::SoftwareInterrupt
            } else if code == 4 + p {
                Self::TimerInterrupt
            } else {
                Self::ExternalInterrupt(code)
            }
        } else {
            match code {
                EXCEPTION_ECALL_U | EXCEPTION_ECALL_S | EXCEPTION_ECALL_M => {
                    Self::EnvironmentCall(code)
                }
                _ => Self::Exception(code),
            }
        }
    }

    /// Return `true` if [`Self::decode`] can produce `self`. Interrupt codes
    /// that belong to the software or timer interrupt of the privilege level
    /// aren't valid [`Self::ExternalInterrupt`] codes, for example.
    pub const fn is_canonical(self, privilege_level: u8) -> bool {
        let p = privilege_level as usize;
        match self {
            Self::SoftwareInterrupt | Self::TimerInterrupt => true,
            Self::ExternalInterrupt(code) => {
                code & XCAUSE_INTERRUPT == 0 && code != p && code != 4 + p
            }
            Self::EnvironmentCall(code) => matches!(
                code,
                EXCEPTION_ECALL_U | EXCEPTION_ECALL_S | EXCEPTION_ECALL_M
            ),
            Self::Exception(code) => {
                code & XCAUSE_INTERRUPT == 0
                    && !matches!(
                        code,
                        EXCEPTION_ECALL_U | EXCEPTION_ECALL_S | EXCEPTION_ECALL_M
                    )
            }
        }
    }

    /// The inverse of [`Self::decode`]. `self` must be canonical (see
    /// [`Self::is_canonical`]).
    pub const fn to_xcause(self, privilege_level: u8) -> usize {
        debug_assert!(
            self.is_canonical(privilege_level),
            "trap cause can't be encoded in this privilege level"
        );
        let p = privilege_level as usize;
        match self {
            Self::SoftwareInterrupt => XCAUSE_INTERRUPT | p,
            Self::TimerInterrupt => XCAUSE_INTERRUPT | (4 + p),
            Self::ExternalInterrupt(code) => XCAUSE_INTERRUPT | code,
            Self::EnvironmentCall(code) | Self::Exception(code) => code,
        }
    }

    #[inline]
    pub const fn is_interrupt(self) -> bool {
        matches!(
            self,
            Self::SoftwareInterrupt | Self::TimerInterrupt | Self::ExternalInterrupt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn privilege_dependent_bits() {
        assert_eq!(XStatus::xie(3), XStatus::MIE);
        assert_eq!(XStatus::xie(1), XStatus::SIE);
        assert_eq!(XStatus::xpie(3), XStatus::MPIE);
        assert_eq!(XStatus::xpie(1), XStatus::SPIE);
        assert_eq!(XInterrupts::xsi(3), XInterrupts::MSI);
        assert_eq!(XInterrupts::xti(1), XInterrupts::STI);
        assert_eq!(XInterrupts::xei(3), XInterrupts::MEI);
    }

    #[test]
    fn decode_machine_mode() {
        let int = XCAUSE_INTERRUPT;
        assert_eq!(TrapCause::decode(int | 3, 3), TrapCause::SoftwareInterrupt);
        assert_eq!(TrapCause::decode(int | 7, 3), TrapCause::TimerInterrupt);
        assert_eq!(
            TrapCause::decode(int | 11, 3),
            TrapCause::ExternalInterrupt(11)
        );
        // The supervisor software interrupt is just another interrupt in
        // M-mode
        assert_eq!(
            TrapCause::decode(int | 1, 3),
            TrapCause::ExternalInterrupt(1)
        );
        assert_eq!(TrapCause::decode(11, 3), TrapCause::EnvironmentCall(11));
        assert_eq!(TrapCause::decode(8, 3), TrapCause::EnvironmentCall(8));
        assert_eq!(TrapCause::decode(2, 3), TrapCause::Exception(2));
    }

    #[test]
    fn decode_supervisor_mode() {
        let int = XCAUSE_INTERRUPT;
        assert_eq!(TrapCause::decode(int | 1, 1), TrapCause::SoftwareInterrupt);
        assert_eq!(TrapCause::decode(int | 5, 1), TrapCause::TimerInterrupt);
        assert_eq!(TrapCause::decode(9, 1), TrapCause::EnvironmentCall(9));
    }

    #[test]
    fn reserved_external_codes() {
        assert!(!TrapCause::ExternalInterrupt(3).is_canonical(3));
        assert!(!TrapCause::ExternalInterrupt(7).is_canonical(3));
        assert!(TrapCause::ExternalInterrupt(3).is_canonical(1));
        assert!(!TrapCause::ExternalInterrupt(5).is_canonical(1));
        assert!(TrapCause::ExternalInterrupt(11).is_canonical(3));
        assert!(!TrapCause::EnvironmentCall(2).is_canonical(3));
        assert!(!TrapCause::Exception(EXCEPTION_ECALL_M).is_canonical(3));
    }

    #[test]
    #[should_panic(expected = "can't be encoded")]
    #[cfg(debug_assertions)]
    fn encode_machine_software_interrupt_as_external() {
        TrapCause::ExternalInterrupt(3).to_xcause(3);
    }

    #[quickcheck]
    fn quickcheck_encode_inverse(kind: u8, code: usize, supervisor: bool) {
        let p = if supervisor { 1 } else { 3 };
        // Small codes hit the reserved ones often enough
        let code = code % 32;
        let cause = match kind % 5 {
            0 => TrapCause::SoftwareInterrupt,
            1 => TrapCause::TimerInterrupt,
            2 => TrapCause::ExternalInterrupt(code),
            3 => TrapCause::EnvironmentCall(code),
            _ => TrapCause::Exception(code),
        };
        if cause.is_canonical(p) {
            assert_eq!(TrapCause::decode(cause.to_xcause(p), p), cause);
        }
    }

    #[quickcheck]
    fn quickcheck_decode_inverse(xcause: usize, supervisor: bool) {
        let p = if supervisor { 1 } else { 3 };
        let cause = TrapCause::decode(xcause, p);
        assert!(cause.is_canonical(p));
        assert_eq!(cause.to_xcause(p), xcause);
        assert_eq!(cause.is_interrupt(), xcause & XCAUSE_INTERRUPT != 0);
    }
}
