//! The Kestrel kernel
//!
//! This crate implements the task scheduler of the Kestrel RTOS: a table of
//! task control blocks, a priority-based ready queue, and the context switch
//! primitive that moves the processor from one task to another.
//!
//! The kernel is architecture-neutral. A port implements [`Port`] to give the
//! kernel access to the processor's register file and interrupt mask, and
//! drives the scheduler from its trap handler.
//!
//! # Scheduling
//!
//! Every task has a priority in `0..PRIOS`, where **lower values are more
//! urgent**. The Ready task with the most urgent priority runs. Among Ready
//! tasks of the same priority, the one that became Ready first runs first,
//! and the current task hands the processor over to an equally urgent Ready
//! task at every scheduling point.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use kestrel_portkit::{FrameDescriptor, RegisterFile};

pub mod error;
pub mod klock;
mod state;
pub mod task;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use self::{
    error::*,
    klock::{assume_cpu_lock, lock_cpu, CpuLockGuard, CpuLockTokenRefMut},
    state::State,
    task::{readyqueue::ScheduleDecision, TaskAttr, TaskCb, TaskId, TaskSt},
};

/// Implemented by a port. Provides the kernel with the processor state it
/// needs to switch tasks.
pub trait Port {
    /// The frame layouts used to save task contexts.
    const FRAME: FrameDescriptor;

    /// The live register file. While a trap is being handled, this is the
    /// register state of the interrupted context.
    fn registers(&self) -> &RegisterFile;

    fn registers_mut(&mut self) -> &mut RegisterFile;

    /// Mask interrupts.
    fn enter_cpu_lock(&mut self);

    /// Mask interrupts if they aren't masked already. Returns `true` if this
    /// method masked them.
    fn try_enter_cpu_lock(&mut self) -> bool {
        if self.is_cpu_lock_active() {
            false
        } else {
            self.enter_cpu_lock();
            true
        }
    }

    /// Unmask interrupts.
    fn leave_cpu_lock(&mut self);

    fn is_cpu_lock_active(&self) -> bool;

    /// The address a task jumps to when it returns from its entry point.
    fn task_exit_address(&self) -> usize;
}
