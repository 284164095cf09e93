//! Kestrel PortKit
//!
//! Architecture-neutral building blocks for writing a Kestrel port: the saved
//! register file, word-addressed stack regions, and the register frame codec
//! that saves and restores a task's context on its own stack.
//!
//! A port describes its register frames as [`FrameDescriptor`] values (ordered
//! lists of [`RegisterSlot`]s); the codec logic in [`frame`] is generic over
//! these descriptors.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

pub mod frame;
pub mod regs;
pub mod stack;

pub use self::{
    frame::{FrameDescriptor, FrameError, FrameKind, FrameLayout, RegisterSlot},
    regs::RegisterFile,
    stack::StackRegion,
};

/// The size of a general-purpose register (and a stack word) in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// The stack pointer alignment required by the calling convention.
pub const STACK_ALIGN: usize = 16;

/// The number of stack words occupied by a floating-point register.
/// Floating-point registers are saved as 64-bit values.
pub const FLOAT_WORDS: usize = 8 / WORD_SIZE;
