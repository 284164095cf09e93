//! Kernel state locking mechanism
//!
//! The scheduler state is only modified while interrupts are masked
//! (*CPU Lock*). This is expressed in the type system: every mutating
//! operation of [`State`] takes a [`CpuLockTokenRefMut`], which can only be
//! borrowed from a live [`CpuLockGuard`].
//!
//! [`State`]: crate::State
use core::{fmt, marker::PhantomData, ops};

use crate::{error::BadContextError, Port};

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub fn lock_cpu<P: Port>(port: &mut P) -> Result<CpuLockGuard<'_, P>, BadContextError> {
    if port.try_enter_cpu_lock() {
        // We just entered a CPU Lock state
        Ok(assume_cpu_lock(port))
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Assume a CPU Lock state and get `CpuLockGuard`.
///
/// This is used by contexts where the hardware has already masked interrupts,
/// such as a trap handler. The caller must not let the returned guard drop
/// if the hardware is supposed to unmask interrupts on its own (e.g., by an
/// exception return); use [`core::mem::forget`] instead.
pub fn assume_cpu_lock<P: Port>(port: &mut P) -> CpuLockGuard<'_, P> {
    debug_assert!(port.is_cpu_lock_active());

    CpuLockGuard { port }
}

/// RAII guard for a CPU Lock state.
///
/// The guard holds the only mutable borrow of the port while it's alive and
/// dereferences to it. [`CpuLockTokenRefMut`] can be borrowed from this type.
pub struct CpuLockGuard<'a, P: Port> {
    port: &'a mut P,
}

impl<'a, P: Port> CpuLockGuard<'a, P> {
    /// Construct a [`CpuLockTokenRefMut`] by borrowing `self`.
    #[inline]
    pub fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_> {
        CpuLockTokenRefMut {
            _phantom: PhantomData,
        }
    }
}

impl<P: Port> Drop for CpuLockGuard<'_, P> {
    fn drop(&mut self) {
        self.port.leave_cpu_lock();
    }
}

impl<P: Port> ops::Deref for CpuLockGuard<'_, P> {
    type Target = P;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.port
    }
}

impl<P: Port> ops::DerefMut for CpuLockGuard<'_, P> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.port
    }
}

impl<P: Port> fmt::Debug for CpuLockGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CpuLockGuard")
    }
}

/// Borrowed version of [`CpuLockGuard`]. This is equivalent to
/// `&'a mut CpuLockGuard` but does not consume memory and doesn't mention the
/// port type.
///
/// When you pass `&'a mut _` to a function, the compiler automatically
/// reborrows it as `&'b mut _` so that the original `&'a mut _` remains
/// accessible after the function call. This does not happen with
/// `CpuLockTokenRefMut`. You have to call [`borrow_mut`] manually.
///
/// [`borrow_mut`]: CpuLockTokenRefMut::borrow_mut
pub struct CpuLockTokenRefMut<'a> {
    _phantom: PhantomData<&'a mut ()>,
}

impl CpuLockTokenRefMut<'_> {
    /// Reborrow `self`.
    #[inline]
    pub fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_> {
        CpuLockTokenRefMut {
            _phantom: PhantomData,
        }
    }
}

impl fmt::Debug for CpuLockTokenRefMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CpuLockTokenRefMut")
    }
}
