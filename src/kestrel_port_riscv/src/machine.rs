//! The binding to a real hart running in M-mode
//!
//! The trap vector `kestrel_trap_vector` spills the registers of the
//! interrupted context into a static [`RegisterFile`], calls
//! `kestrel_handle_trap` on a dedicated handler stack, reloads the
//! (possibly different) context from the register file, and executes `mret`.
//!
//! The application defines `kestrel_handle_trap` to run the shim:
//!
//! ```rust,ignore
//! #[no_mangle]
//! extern "C" fn kestrel_handle_trap() {
//!     // Safety: Only the trap vector calls this function
//!     let mut hart = unsafe { MachineHart::<Options>::new() };
//!     let (state, shim, hooks) = unsafe { &mut *SYSTEM.get() };
//!     shim.handle_trap(state, &mut hart, hooks);
//! }
//! ```
use core::{
    arch::{asm, global_asm},
    marker::PhantomData,
    mem::offset_of,
    ptr::{addr_of, addr_of_mut},
};
use kestrel_kernel::{Port, ResultCode, TaskId};
use kestrel_portkit::{FrameDescriptor, RegisterFile, WORD_SIZE};
use riscv::register::{mcause, mie, mscratch, mstatus, mtval, mtvec};

use crate::{Hart, Syscall, ThreadingOptions};

/// The options specific to [`MachineHart`].
pub trait MachineOptions: ThreadingOptions {
    /// The address of this hart's `msip` register in the CLINT.
    const MSIP_PTR: usize;
}

/// The register file of the context interrupted by the current trap.
/// `mscratch` holds its address while a task or the idle loop is running.
static mut TRAP_REGS: RegisterFile = RegisterFile::ZERO;

const HANDLER_STACK_WORDS: usize = 1024;

#[repr(C, align(16))]
struct HandlerStack([usize; HANDLER_STACK_WORDS]);

/// The native stack `kestrel_handle_trap` runs on. The shim's interrupt
/// stack, which holds saved frames, is a separate region.
static mut HANDLER_STACK: HandlerStack = HandlerStack([0; HANDLER_STACK_WORDS]);

// The trap vector hard-codes these offsets
const _: () = {
    assert!(offset_of!(RegisterFile, x) == 0);
    assert!(offset_of!(RegisterFile, pc) == 32 * WORD_SIZE);
    assert!(offset_of!(RegisterFile, status) == 33 * WORD_SIZE);
    assert!(offset_of!(RegisterFile, fcsr) == 34 * WORD_SIZE);
    assert!(offset_of!(RegisterFile, f) == (35 * WORD_SIZE + 7) / 8 * 8);
};

#[cfg(target_arch = "riscv32")]
macro_rules! xlen_defs {
    () => {
        "
        .equ WORD, 4
        .macro SX reg, addr
            sw \\reg, \\addr
        .endm
        .macro LX reg, addr
            lw \\reg, \\addr
        .endm
        "
    };
}

#[cfg(target_arch = "riscv64")]
macro_rules! xlen_defs {
    () => {
        "
        .equ WORD, 8
        .macro SX reg, addr
            sd \\reg, \\addr
        .endm
        .macro LX reg, addr
            ld \\reg, \\addr
        .endm
        "
    };
}

#[cfg(feature = "fp")]
macro_rules! fp_save {
    () => {
        "
        .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
            fsd f\\n, (OFF_F + \\n * 8)(t6)
        .endr
        csrr t5, fcsr
        SX t5, OFF_FCSR(t6)
        "
    };
}

#[cfg(feature = "fp")]
macro_rules! fp_load {
    () => {
        "
        LX t5, OFF_FCSR(t6)
        csrw fcsr, t5
        .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
            fld f\\n, (OFF_F + \\n * 8)(t6)
        .endr
        "
    };
}

#[cfg(not(feature = "fp"))]
macro_rules! fp_save {
    () => {
        ""
    };
}

#[cfg(not(feature = "fp"))]
macro_rules! fp_load {
    () => {
        ""
    };
}

global_asm!(
    concat!(
        xlen_defs!(),
        "
        .equ OFF_PC, (32 * WORD)
        .equ OFF_STATUS, (33 * WORD)
        .equ OFF_FCSR, (34 * WORD)
        .equ OFF_F, ((35 * WORD + 7) / 8 * 8)

        .section .text.kestrel_trap_vector, \"ax\"
        .global kestrel_trap_vector
        .p2align 2
    kestrel_trap_vector:
        # t6 = &TRAP_REGS, mscratch = background t6
        csrrw t6, mscratch, t6

        .irp n, 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30
            SX x\\n, (\\n * WORD)(t6)
        .endr
        csrr t5, mscratch
        SX t5, (31 * WORD)(t6)
        csrw mscratch, t6

        csrr t5, mepc
        SX t5, OFF_PC(t6)
        csrr t5, mstatus
        SX t5, OFF_STATUS(t6)
        ",
        fp_save!(),
        "
        la sp, {handler_stack}
        li t0, {handler_stack_size}
        add sp, sp, t0
        call kestrel_handle_trap

        # Reload the context chosen by the shim
        csrr t6, mscratch
        LX t5, OFF_PC(t6)
        csrw mepc, t5
        LX t5, OFF_STATUS(t6)
        csrw mstatus, t5
        ",
        fp_load!(),
        "
        .irp n, 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30
            LX x\\n, (\\n * WORD)(t6)
        .endr
        LX x31, (31 * WORD)(t6)
        mret

        .section .text.kestrel_idle_loop, \"ax\"
        .global kestrel_idle_loop
        .p2align 2
    kestrel_idle_loop:
        wfi
        j kestrel_idle_loop
        "
    ),
    handler_stack = sym HANDLER_STACK,
    handler_stack_size = const HANDLER_STACK_WORDS * WORD_SIZE,
);

extern "C" {
    fn kestrel_trap_vector();
    fn kestrel_idle_loop();
}

/// The hart executing the current trap handler.
pub struct MachineHart<Opts> {
    _opts: PhantomData<fn() -> Opts>,
}

impl<Opts: MachineOptions> MachineHart<Opts> {
    /// Get a handle to the hart.
    ///
    /// # Safety
    ///
    /// Only `kestrel_handle_trap` may call this, and at most one instance may
    /// exist at a time. The instance accesses the spilled register file
    /// without synchronization.
    #[inline]
    pub unsafe fn new() -> Self {
        Self {
            _opts: PhantomData,
        }
    }

    /// Install the trap vector, request the first dispatch, and enter the
    /// idle loop with interrupts enabled. The first task starts running when
    /// the software interrupt is taken.
    ///
    /// # Safety
    ///
    /// The hart must be in M-mode with interrupts masked. The tasks must have
    /// been created and activated, and `kestrel_handle_trap` must be ready to
    /// run the shim.
    pub unsafe fn start() -> ! {
        debug_assert_eq!(Opts::PRIVILEGE_LEVEL, 3);
        log::debug!("starting the scheduler");

        unsafe {
            mscratch::write(addr_of_mut!(TRAP_REGS) as usize);
            let vector = kestrel_trap_vector as unsafe extern "C" fn();
            mtvec::write(vector as usize, mtvec::TrapMode::Direct);
            #[cfg(feature = "fp")]
            mstatus::set_fs(mstatus::FS::Initial);
            mie::set_msoft();
            mie::set_mtimer();
            mie::set_mext();
            (Opts::MSIP_PTR as *mut u32).write_volatile(1);

            // `sp == 0` marks the idle loop
            asm!(
                "mv sp, zero",
                "csrsi mstatus, 8",
                "j {idle_loop}",
                idle_loop = sym kestrel_idle_loop,
                options(noreturn),
            );
        }
    }
}

impl<Opts: MachineOptions> Port for MachineHart<Opts> {
    const FRAME: FrameDescriptor = crate::frame::FRAME;

    #[inline]
    fn registers(&self) -> &RegisterFile {
        // Safety: See `MachineHart::new`
        unsafe { &*addr_of!(TRAP_REGS) }
    }

    #[inline]
    fn registers_mut(&mut self) -> &mut RegisterFile {
        // Safety: See `MachineHart::new`
        unsafe { &mut *addr_of_mut!(TRAP_REGS) }
    }

    #[inline]
    fn enter_cpu_lock(&mut self) {
        unsafe { mstatus::clear_mie() };
    }

    #[inline]
    fn leave_cpu_lock(&mut self) {
        unsafe { mstatus::set_mie() };
    }

    #[inline]
    fn is_cpu_lock_active(&self) -> bool {
        !mstatus::read().mie()
    }

    fn task_exit_address(&self) -> usize {
        Opts::task_exit_address()
    }
}

impl<Opts: MachineOptions> Hart for MachineHart<Opts> {
    #[inline]
    fn xcause(&self) -> usize {
        mcause::read().bits()
    }

    #[inline]
    fn xtval(&self) -> usize {
        mtval::read()
    }

    fn clear_software_interrupt(&mut self) {
        // Safety: `MSIP_PTR` points to the `msip` register of this hart
        unsafe { (Opts::MSIP_PTR as *mut u32).write_volatile(0) };
    }

    fn enter_idle(&mut self) {
        self.registers_mut().pc = kestrel_idle_loop as unsafe extern "C" fn() as usize;
    }

    /// The trap vector executes `mret` after `kestrel_handle_trap` returns,
    /// so there's nothing to do here.
    #[inline]
    fn exception_return(&mut self) {}
}

/// Invoke a system service.
#[inline]
pub fn syscall(number: Syscall, arg: usize) -> ResultCode {
    let mut a0 = arg;
    // Safety: The trap handler preserves every register but `a0`
    unsafe {
        asm!(
            "ecall",
            inlateout("a0") a0,
            in("a7") number as usize,
        )
    };
    ResultCode::from_raw(a0 as i8).unwrap_or(ResultCode::NotSupported)
}

/// Let the scheduler reconsider the current task.
pub fn yield_cpu() -> ResultCode {
    syscall(Syscall::Yield, 0)
}

/// Block the current task until [`wake`] is called for it.
pub fn block() -> ResultCode {
    syscall(Syscall::Block, 0)
}

/// Transition a Blocked or Suspended task into the Ready state.
pub fn wake(id: TaskId) -> ResultCode {
    syscall(Syscall::Wake, id.get())
}

/// Suspend the current task.
pub fn suspend_self() -> ResultCode {
    syscall(Syscall::SuspendSelf, 0)
}

/// The task exit trampoline. A task that returns from its entry point gets
/// suspended.
extern "C" fn task_exit() -> ! {
    loop {
        suspend_self();
    }
}

/// The address of the task exit trampoline, for implementing
/// [`ThreadingOptions::task_exit_address`].
pub fn task_exit_address() -> usize {
    task_exit as extern "C" fn() -> ! as usize
}
