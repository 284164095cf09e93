//! The RISC-V port for the Kestrel RTOS
//!
//! This crate connects [`kestrel_kernel`]'s scheduler to a RISC-V hart. Its
//! centerpiece is [`TrapShim`], which saves the context interrupted by a
//! trap, forwards the trap to its handler, and on the way back lets the
//! scheduler decide which context to resume.
//!
//! ```text
//!  task level ──trap──▶ entry ──▶ dispatch ──▶ exit ──xRET──▶ task level
//!                                    │
//!            software / timer / external interrupt, ecall, exception
//! ```
//!
//! The hart itself is abstracted by [`Hart`]. [`sim::SimHart`] implements it
//! on the host for testing; `machine::MachineHart` (only available when
//! compiling for a RISC-V target) binds it to the real CSRs.
//!
//! # Cargo features
//!
//!  - **`fp`** saves the floating-point registers (`f0`–`f31` as 64-bit
//!    values, and `fcsr`) as part of every frame.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use kestrel_kernel::Port;

mod cfg;
pub mod csr;
pub mod frame;
pub mod sim;
pub mod syscall;
pub mod trap;

#[cfg(all(
    target_os = "none",
    any(target_arch = "riscv32", target_arch = "riscv64")
))]
pub mod machine;

pub use self::{
    cfg::*,
    csr::TrapCause,
    syscall::Syscall,
    trap::{last_fatal_trap, FatalTrap, SavedFrame, TrapContext, TrapHooks, TrapShim, TrapStats},
};

/// A hart as seen by [`TrapShim`].
///
/// In addition to [`Port`], which gives the kernel access to the register
/// file and the interrupt mask, this trait exposes the trap-related CSRs.
/// While a trap is being handled, [`Port::registers`] holds the state of the
/// interrupted context, with `pc` holding `xepc` and `status` holding
/// `xstatus`.
pub trait Hart: Port {
    /// Read `xcause`.
    fn xcause(&self) -> usize;

    /// Read `xtval`.
    fn xtval(&self) -> usize;

    /// Clear the pending software interrupt of the kernel's privilege level.
    fn clear_software_interrupt(&mut self);

    /// Redirect the exception return to the idle loop.
    fn enter_idle(&mut self);

    /// Perform an exception return (`xRET`) to the context described by the
    /// live register file. This re-enables interrupts if `xstatus.XPIE` is
    /// set.
    fn exception_return(&mut self);
}
