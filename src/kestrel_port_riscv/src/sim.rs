//! A simulated hart for running the port on a host
use core::{fmt, marker::PhantomData};
use kestrel_kernel::Port;
use kestrel_portkit::{FrameDescriptor, RegisterFile};

use crate::{
    csr::{TrapCause, XInterrupts, XStatus},
    Hart, ThreadingOptions,
};

/// The address [`SimOptions`] uses as the task exit trampoline.
pub const SIM_TASK_EXIT_ADDRESS: usize = 0xdead_0000;

/// [`ThreadingOptions`] for a [`SimHart`] running the kernel in M-mode.
pub struct SimOptions;

impl ThreadingOptions for SimOptions {
    fn task_exit_address() -> usize {
        SIM_TASK_EXIT_ADDRESS
    }
}

/// A hart whose registers and CSRs are plain memory.
///
/// A newly created `SimHart` is parked in the idle loop with interrupts
/// enabled. A test drives it by calling [`Self::raise`] (the hardware part
/// of taking a trap) followed by [`crate::TrapShim::handle_trap`] (the
/// software part).
pub struct SimHart<Opts = SimOptions> {
    pub regs: RegisterFile,
    pub xcause: usize,
    pub xtval: usize,
    pub xip: XInterrupts,
    idle: bool,
    _opts: PhantomData<fn() -> Opts>,
}

impl<Opts: ThreadingOptions> SimHart<Opts> {
    pub fn new() -> Self {
        let mut regs = RegisterFile::ZERO;
        regs.status = XStatus::xie(Opts::PRIVILEGE_LEVEL).bits();
        Self {
            regs,
            xcause: 0,
            xtval: 0,
            xip: XInterrupts::empty(),
            idle: true,
            _opts: PhantomData,
        }
    }

    /// Take a trap with `xtval = 0`. See [`Self::raise_with_tval`].
    pub fn raise(&mut self, cause: TrapCause) {
        self.raise_with_tval(cause, 0);
    }

    /// Do what the hardware does when taking a trap: `pc` becomes `xepc`
    /// (which is where [`RegisterFile::pc`] already is), `xstatus.XIE` is
    /// moved to `xstatus.XPIE`, and interrupts are masked.
    ///
    /// The trap is taken regardless of `xstatus.XIE` and `xie`, so a test can
    /// nest traps at will.
    pub fn raise_with_tval(&mut self, cause: TrapCause, tval: usize) {
        let p = Opts::PRIVILEGE_LEVEL;
        let xie = XStatus::xie(p).bits();
        let xpie = XStatus::xpie(p).bits();

        let status = self.regs.status;
        let mut new_status = (status & !(xie | xpie)) | XStatus::xpp(p).bits();
        if status & xie != 0 {
            new_status |= xpie;
        }
        self.regs.status = new_status;

        self.xcause = cause.to_xcause(p);
        self.xtval = tval;
        match cause {
            TrapCause::SoftwareInterrupt => self.xip.insert(XInterrupts::xsi(p)),
            TrapCause::TimerInterrupt => self.xip.insert(XInterrupts::xti(p)),
            TrapCause::ExternalInterrupt(code) if code < usize::BITS as usize => {
                self.xip.insert(XInterrupts::from_bits_truncate(1 << code))
            }
            _ => {}
        }

        log::trace!("raise {cause:?} at pc = {:#x}", self.regs.pc);
        self.idle = false;
    }

    /// Return `true` if the hart is executing the idle loop.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Return `true` if `xstatus.XIE` is set.
    #[inline]
    pub fn interrupts_enabled(&self) -> bool {
        self.regs.status & XStatus::xie(Opts::PRIVILEGE_LEVEL).bits() != 0
    }
}

impl<Opts: ThreadingOptions> Default for SimHart<Opts> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Opts> fmt::Debug for SimHart<Opts> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SimHart")
            .field("regs", &self.regs)
            .field("xcause", &format_args!("{:#x}", self.xcause))
            .field("xtval", &format_args!("{:#x}", self.xtval))
            .field("xip", &self.xip)
            .field("idle", &self.idle)
            .finish()
    }
}

impl<Opts: ThreadingOptions> Port for SimHart<Opts> {
    const FRAME: FrameDescriptor = crate::frame::FRAME;

    #[inline]
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    #[inline]
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    fn enter_cpu_lock(&mut self) {
        self.regs.status &= !XStatus::xie(Opts::PRIVILEGE_LEVEL).bits();
    }

    fn leave_cpu_lock(&mut self) {
        self.regs.status |= XStatus::xie(Opts::PRIVILEGE_LEVEL).bits();
    }

    fn is_cpu_lock_active(&self) -> bool {
        !self.interrupts_enabled()
    }

    fn task_exit_address(&self) -> usize {
        Opts::task_exit_address()
    }
}

impl<Opts: ThreadingOptions> Hart for SimHart<Opts> {
    #[inline]
    fn xcause(&self) -> usize {
        self.xcause
    }

    #[inline]
    fn xtval(&self) -> usize {
        self.xtval
    }

    fn clear_software_interrupt(&mut self) {
        self.xip.remove(XInterrupts::xsi(Opts::PRIVILEGE_LEVEL));
    }

    fn enter_idle(&mut self) {
        self.regs.pc = 0;
        self.idle = true;
    }

    fn exception_return(&mut self) {
        let p = Opts::PRIVILEGE_LEVEL;
        let xie = XStatus::xie(p).bits();
        let xpie = XStatus::xpie(p).bits();

        let status = self.regs.status;
        let mut new_status = (status & !xie) | xpie;
        if status & xpie != 0 {
            new_status |= xie;
        }
        self.regs.status = new_status;
    }
}
