//! The interrupt entry/exit shim
//!
//! [`TrapShim::handle_trap`] is called by the trap vector after the hart has
//! taken a trap. It proceeds in three phases, each of which is also exposed
//! as a method so that the nesting behavior can be observed in between:
//!
//!  - [`TrapShim::entry`] saves the interrupted context and moves onto the
//!    interrupt stack.
//!  - [`TrapShim::dispatch`] handles the trap according to its cause.
//!  - [`TrapShim::exit`] leaves the interrupt stack and, for the outermost
//!    trap, lets the scheduler choose the context to resume.
use core::{
    marker::PhantomData,
    mem,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use kestrel_kernel::{
    assume_cpu_lock, CpuLockGuard, CpuLockTokenRefMut, ScheduleDecision, State, TaskId, TaskSt,
};
use kestrel_portkit::{
    regs::{A0, A7},
    FrameError, FrameKind, RegisterSlot, StackRegion, STACK_ALIGN,
};

use crate::{csr::TrapCause, syscall, Hart, ThreadingOptions};

/// The diagnostic information of an unrecoverable trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalTrap {
    /// The raw value of `xcause`.
    pub cause: usize,
    /// `xepc`
    pub epc: usize,
    /// `xtval`
    pub tval: usize,
    /// `xstatus`
    pub status: usize,
    /// Set if a context couldn't be saved or restored.
    pub frame_error: Option<FrameError>,
}

impl FatalTrap {
    fn capture<H: Hart>(hart: &H, frame_error: Option<FrameError>) -> Self {
        let regs = hart.registers();
        Self {
            cause: hart.xcause(),
            epc: regs.pc,
            tval: hart.xtval(),
            status: regs.status,
            frame_error,
        }
    }
}

static FATAL_TRAP_RECORDED: AtomicBool = AtomicBool::new(false);
static FATAL_TRAP_WORDS: [AtomicUsize; 4] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

/// Store `diag` for [`last_fatal_trap`].
fn record_fatal_trap(diag: &FatalTrap) {
    let words = [diag.cause, diag.epc, diag.tval, diag.status];
    for (cell, word) in FATAL_TRAP_WORDS.iter().zip(words) {
        cell.store(word, Ordering::Relaxed);
    }
    FATAL_TRAP_RECORDED.store(true, Ordering::Release);
}

/// Get the diagnostic recorded by the default implementation of
/// [`TrapHooks::fatal`]. [`FatalTrap::frame_error`] is not preserved.
pub fn last_fatal_trap() -> Option<FatalTrap> {
    if !FATAL_TRAP_RECORDED.load(Ordering::Acquire) {
        return None;
    }
    let [cause, epc, tval, status] =
        [0, 1, 2, 3].map(|i| FATAL_TRAP_WORDS[i].load(Ordering::Relaxed));
    Some(FatalTrap {
        cause,
        epc,
        tval,
        status,
        frame_error: None,
    })
}

/// The collaborators of [`TrapShim`], implemented by the embedding system.
pub trait TrapHooks {
    /// Handle an interrupt other than the software and timer interrupts.
    ///
    /// The handler may change task states through `state`. It must not
    /// perform a context switch by itself; the shim will do it on exit if
    /// needed.
    fn external_interrupt<const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: CpuLockTokenRefMut<'_>,
        code: usize,
    ) {
        let _ = (state, lock);
        log::warn!("unhandled interrupt {code}");
    }

    /// Called on every timer interrupt after the tick counter is advanced.
    /// This is where the timer should be re-armed.
    fn timer_tick<const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: CpuLockTokenRefMut<'_>,
        tick: u64,
    ) {
        let _ = (state, lock, tick);
    }

    /// Called each time the scheduler finds no runnable task and the hart
    /// enters the idle loop.
    fn idle(&mut self) {}

    /// Called on an unrecoverable trap.
    ///
    /// The default implementation records `diag` (see [`last_fatal_trap`])
    /// and spins forever.
    fn fatal(&mut self, diag: FatalTrap) -> ! {
        record_fatal_trap(&diag);
        loop {
            core::hint::spin_loop();
        }
    }
}

/// Where [`TrapShim::entry`] saved the interrupted context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedFrame {
    /// The trap was taken from the idle loop. Nothing was saved.
    Idle,
    /// An Interrupted frame at the given address in the task's stack.
    Task(TaskId, usize),
    /// An Interrupted frame at the given address in the interrupt stack. The
    /// interrupted context was another trap handler.
    Nested(usize),
}

/// The trap being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    pub cause: TrapCause,
    pub frame: SavedFrame,
}

/// The counters maintained by [`TrapShim`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrapStats {
    /// The number of times the interrupt stack was installed.
    pub stack_switches_in: usize,
    /// The number of times the interrupt stack was left.
    pub stack_switches_out: usize,
    /// The maximum nesting level observed.
    pub max_nesting: usize,
    pub software_interrupts: usize,
    pub timer_interrupts: usize,
    pub external_interrupts: usize,
    pub environment_calls: usize,
    pub exceptions: usize,
}

#[doc = svgbobdoc::transform!(
/// The trap handler state of a hart.
///
/// The top of the interrupt stack holds the stack pointer of the background
/// context (the task or the idle loop interrupted by the outermost trap).
/// Nested traps push Interrupted frames below it.
///
/// ```svgbob
///          interrupt stack
///     top -->+-----------------+
///            | background_sp   |
///            | (padding)       |
///            +-----------------+ <-- sp while handling the outermost trap
///            | frame (nest 1)  |
///            +-----------------+ <-- sp while handling a nested trap
///            | frame (nest 2)  |
///            +-----------------+
///            :                 :
/// ```
)]
pub struct TrapShim<'s, Opts> {
    stack: StackRegion<'s>,
    /// The interrupt nesting level. `0` when the hart is executing a task or
    /// the idle loop.
    nesting: usize,
    stats: TrapStats,
    _opts: PhantomData<fn() -> Opts>,
}

impl<'s, Opts: ThreadingOptions> TrapShim<'s, Opts> {
    /// Construct a `TrapShim` using `stack` as the interrupt stack.
    pub fn new(stack: StackRegion<'s>) -> Self {
        Self {
            stack,
            nesting: 0,
            stats: TrapStats::default(),
            _opts: PhantomData,
        }
    }

    #[inline]
    pub fn nesting(&self) -> usize {
        self.nesting
    }

    #[inline]
    pub fn stats(&self) -> &TrapStats {
        &self.stats
    }

    #[inline]
    pub fn interrupt_stack(&self) -> &StackRegion<'s> {
        &self.stack
    }

    /// The address of the word holding the background stack pointer. This is
    /// also the stack pointer while the outermost trap is being handled.
    #[inline]
    pub fn background_sp_slot(&self) -> usize {
        self.stack.aligned_top() - STACK_ALIGN
    }

    /// Handle a trap taken by `hart`. Hardware has masked interrupts.
    ///
    /// On return, `hart` has performed an exception return to the context
    /// chosen by the scheduler.
    pub fn handle_trap<H: Hart, Hooks: TrapHooks, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        hart: &mut H,
        hooks: &mut Hooks,
    ) {
        let mut lock = assume_cpu_lock(hart);

        let result = self.entry(state, &mut lock).and_then(|cx| {
            self.dispatch(state, &mut lock, hooks, cx)?;
            self.exit(state, &mut lock, hooks)
        });

        if let Err(diag) = result {
            log::error!("fatal trap: {diag:x?}");
            // The hart stays masked
            mem::forget(lock);
            hooks.fatal(diag);
        }

        // `xRET` unmasks interrupts, not the guard
        lock.exception_return();
        mem::forget(lock);
    }

    /// Save the interrupted context and install the interrupt stack if this
    /// is the outermost trap.
    pub fn entry<H: Hart, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: &mut CpuLockGuard<'_, H>,
    ) -> Result<TrapContext, FatalTrap> {
        let cause = TrapCause::decode(lock.xcause(), Opts::PRIVILEGE_LEVEL);
        let sp = lock.registers().sp();

        let frame = if self.nesting > 0 {
            let frame_sp = H::FRAME
                .interrupted
                .save(lock.registers(), &mut self.stack, sp)
                .map_err(|e| FatalTrap::capture(&**lock, Some(e)))?;
            lock.registers_mut().set_sp(frame_sp);
            SavedFrame::Nested(frame_sp)
        } else if sp == 0 {
            debug_assert!(state
                .running_task()
                .map_or(true, |id| state.task_state(id) != Ok(TaskSt::Running)));
            SavedFrame::Idle
        } else {
            let id = state
                .running_task()
                .ok_or_else(|| FatalTrap::capture(&**lock, None))?;
            let frame_sp = state
                .save_context(lock, id, FrameKind::Interrupted)
                .map_err(|e| FatalTrap::capture(&**lock, e.frame_error()))?;
            SavedFrame::Task(id, frame_sp)
        };

        if self.nesting == 0 {
            let background_sp = match frame {
                SavedFrame::Task(_, frame_sp) => frame_sp,
                _ => 0,
            };
            let slot = self.background_sp_slot();
            self.stack
                .write(slot, background_sp)
                .map_err(|e| FatalTrap::capture(&**lock, Some(e)))?;
            lock.registers_mut().set_sp(slot);
            self.stats.stack_switches_in += 1;
        }

        self.nesting += 1;
        self.stats.max_nesting = self.stats.max_nesting.max(self.nesting);

        log::trace!("trap entry: {cause:?}, nesting = {}, {frame:x?}", self.nesting);

        Ok(TrapContext { cause, frame })
    }

    /// Handle the trap according to its cause.
    pub fn dispatch<H: Hart, Hooks: TrapHooks, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: &mut CpuLockGuard<'_, H>,
        hooks: &mut Hooks,
        cx: TrapContext,
    ) -> Result<(), FatalTrap> {
        match cx.cause {
            TrapCause::SoftwareInterrupt => {
                self.stats.software_interrupts += 1;
                lock.clear_software_interrupt();
                state.request_dispatch(lock.borrow_mut());
            }
            TrapCause::TimerInterrupt => {
                self.stats.timer_interrupts += 1;
                let tick = state.advance_tick(lock.borrow_mut());
                hooks.timer_tick(state, lock.borrow_mut(), tick);
                state.request_dispatch(lock.borrow_mut());
            }
            TrapCause::ExternalInterrupt(code) => {
                self.stats.external_interrupts += 1;
                hooks.external_interrupt(state, lock.borrow_mut(), code);
            }
            TrapCause::EnvironmentCall(_) => {
                self.stats.environment_calls += 1;
                self.environment_call(state, lock, cx.frame)
                    .map_err(|e| FatalTrap::capture(&**lock, Some(e)))?;
                state.request_dispatch(lock.borrow_mut());
            }
            TrapCause::Exception(_) => {
                self.stats.exceptions += 1;
                return Err(FatalTrap::capture(&**lock, None));
            }
        }
        Ok(())
    }

    /// Execute the system service requested by `ecall` and resume after the
    /// `ecall` instruction with the result code in `a0`.
    fn environment_call<H: Hart, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: &mut CpuLockGuard<'_, H>,
        frame: SavedFrame,
    ) -> Result<(), FrameError> {
        let layout = H::FRAME.interrupted;
        let (number, arg, pc) =
            self.with_saved_frame(state, lock.borrow_mut(), frame, |region, sp| {
                Ok((
                    layout.read_slot(region, sp, RegisterSlot::Int(A7 as u8))? as usize,
                    layout.read_slot(region, sp, RegisterSlot::Int(A0 as u8))? as usize,
                    layout.read_slot(region, sp, RegisterSlot::Pc)? as usize,
                ))
            })?;

        let caller = match frame {
            SavedFrame::Task(id, _) => Some(id),
            _ => None,
        };
        let result = syscall::execute(state, lock.borrow_mut(), caller, number, arg);

        self.with_saved_frame(state, lock.borrow_mut(), frame, |region, sp| {
            layout.write_slot(region, sp, RegisterSlot::Pc, pc.wrapping_add(4) as u64)?;
            layout.write_slot(
                region,
                sp,
                RegisterSlot::Int(A0 as u8),
                result.to_register() as u64,
            )
        })
    }

    /// Call `f` with the region and the address of the frame saved by
    /// [`Self::entry`].
    fn with_saved_frame<R, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: CpuLockTokenRefMut<'_>,
        frame: SavedFrame,
        f: impl FnOnce(&mut StackRegion<'_>, usize) -> Result<R, FrameError>,
    ) -> Result<R, FrameError> {
        match frame {
            SavedFrame::Task(id, sp) => match state.task_mut(lock, id) {
                Some(task_cb) => f(task_cb.stack_mut(), sp),
                None => Err(FrameError::OutOfRegion),
            },
            SavedFrame::Nested(sp) => f(&mut self.stack, sp),
            SavedFrame::Idle => Err(FrameError::OutOfRegion),
        }
    }

    /// Restore the context interrupted by the current trap, or the context
    /// chosen by the scheduler if this is the outermost trap.
    pub fn exit<H: Hart, Hooks: TrapHooks, const TASKS: usize, const PRIOS: usize>(
        &mut self,
        state: &mut State<'_, TASKS, PRIOS>,
        lock: &mut CpuLockGuard<'_, H>,
        hooks: &mut Hooks,
    ) -> Result<(), FatalTrap> {
        debug_assert!(self.nesting > 0, "trap exit without a matching entry");
        self.nesting = self.nesting.saturating_sub(1);

        if self.nesting > 0 {
            // Return to the outer handler
            let sp = lock.registers().sp();
            let sp = H::FRAME
                .interrupted
                .restore(&self.stack, sp, lock.registers_mut())
                .map_err(|e| FatalTrap::capture(&**lock, Some(e)))?;
            lock.registers_mut().set_sp(sp);
            log::trace!("trap exit: nesting = {}", self.nesting);
            return Ok(());
        }

        // Leave the interrupt stack
        let slot = lock.registers().sp();
        debug_assert_eq!(slot, self.background_sp_slot());
        let background_sp = self
            .stack
            .read(slot)
            .map_err(|e| FatalTrap::capture(&**lock, Some(e)))?;
        lock.registers_mut().set_sp(background_sp);
        self.stats.stack_switches_out += 1;

        let dispatch_pending = state.take_dispatch_pending(lock.borrow_mut());
        let background = state
            .running_task()
            .filter(|&id| state.task_state(id) == Ok(TaskSt::Running));

        let decision = if dispatch_pending || background.is_none() {
            state.decide()
        } else {
            ScheduleDecision::Keep
        };

        match decision {
            ScheduleDecision::Keep => {
                let Some(id) = background else {
                    unreachable!("kept a task that isn't running")
                };
                let kind = state
                    .restore_context(lock, id)
                    .map_err(|e| FatalTrap::capture(&**lock, e.frame_error()))?;
                debug_assert_eq!(kind, FrameKind::Interrupted);
                log::trace!("trap exit: resuming {id:?}");
            }
            ScheduleDecision::SwitchTo(to) => {
                let kind = state
                    .switch_from_saved(lock, to)
                    .map_err(|_| FatalTrap::capture(&**lock, None))?;
                match kind {
                    Some(FrameKind::Interrupted) => {}
                    Some(FrameKind::Cooperative) => {
                        // Cooperative frames don't include `xstatus`
                        lock.registers_mut().status = Opts::INITIAL_STATUS;
                    }
                    None => {
                        lock.registers_mut().set_sp(0);
                        lock.registers_mut().status = Opts::INITIAL_STATUS;
                        lock.enter_idle();
                        hooks.idle();
                    }
                }
                log::trace!("trap exit: switched to {to:?}");
            }
        }

        Ok(())
    }
}
