use crate::csr::XStatus;

/// The configuration of the port.
pub trait ThreadingOptions {
    /// The privilege level in which the kernel and tasks run. `3` selects
    /// M-mode (`mstatus`, `mret`, ...); `1` selects S-mode.
    ///
    /// Defaults to `3` when unspecified.
    const PRIVILEGE_LEVEL: u8 = 3;

    /// The `xstatus` value loaded when a task resumes from a Cooperative
    /// frame, which doesn't include `xstatus`. The default value makes the
    /// exception return stay in the current privilege level and enable
    /// interrupts. With the `fp` feature, it also turns on the floating-point
    /// unit (`xstatus.FS = Initial`).
    const INITIAL_STATUS: usize = initial_status(Self::PRIVILEGE_LEVEL);

    /// The address a task jumps to when it returns from its entry point.
    fn task_exit_address() -> usize;
}

/// Calculate the default value of [`ThreadingOptions::INITIAL_STATUS`].
pub const fn initial_status(privilege_level: u8) -> usize {
    let fs_initial = if cfg!(feature = "fp") { 1 << 13 } else { 0 };
    XStatus::xpie(privilege_level).bits() | XStatus::xpp(privilege_level).bits() | fs_initial
}
