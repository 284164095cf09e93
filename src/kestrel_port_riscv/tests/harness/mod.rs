//! A simulated system: a [`SimHart`] running the kernel through [`TrapShim`]
#![allow(dead_code)]
use kestrel_kernel::{lock_cpu, CpuLockTokenRefMut, ResultCode, State, TaskAttr, TaskId};
use kestrel_port_riscv::{
    csr::EXCEPTION_ECALL_M,
    sim::{SimHart, SimOptions},
    FatalTrap, Syscall, TrapCause, TrapHooks, TrapShim,
};
use kestrel_portkit::{
    regs::{A0, A7},
    StackRegion,
};

pub const TASKS: usize = 4;
pub const PRIOS: usize = 4;

const TASK_STACK_WORDS: usize = 512;
const INTERRUPT_STACK_WORDS: usize = 2048;

/// The hooks used by [`System`]. Records what the shim tells it.
#[derive(Debug, Default)]
pub struct Recorder {
    pub idle_calls: usize,
    pub ticks: Vec<u64>,
    pub external: Vec<usize>,
    /// The task to wake up on the next external interrupt
    pub wake_on_external: Option<TaskId>,
}

impl TrapHooks for Recorder {
    fn external_interrupt<const T: usize, const P: usize>(
        &mut self,
        state: &mut State<'_, T, P>,
        mut lock: CpuLockTokenRefMut<'_>,
        code: usize,
    ) {
        self.external.push(code);
        if let Some(id) = self.wake_on_external.take() {
            state.mark_ready(lock.borrow_mut(), id).unwrap();
        }
    }

    fn timer_tick<const T: usize, const P: usize>(
        &mut self,
        _state: &mut State<'_, T, P>,
        _lock: CpuLockTokenRefMut<'_>,
        tick: u64,
    ) {
        self.ticks.push(tick);
    }

    fn idle(&mut self) {
        self.idle_calls += 1;
    }

    fn fatal(&mut self, diag: FatalTrap) -> ! {
        panic!("fatal trap: {diag:x?}");
    }
}

pub fn task_body(_: usize) {}

pub struct System {
    pub hart: SimHart,
    pub shim: TrapShim<'static, SimOptions>,
    pub state: State<'static, TASKS, PRIOS>,
    pub hooks: Recorder,
}

fn leak_stack(words: usize) -> StackRegion<'static> {
    StackRegion::new(Box::leak(vec![0usize; words].into_boxed_slice()))
}

impl System {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            hart: SimHart::new(),
            shim: TrapShim::new(leak_stack(INTERRUPT_STACK_WORDS)),
            state: State::new(),
            hooks: Recorder::default(),
        }
    }

    /// Create and activate a task. `param` is passed in `a0` when the task
    /// starts.
    pub fn spawn(&mut self, name: &'static str, priority: usize, param: usize) -> TaskId {
        let mut lock = lock_cpu(&mut self.hart).unwrap();
        let attr = TaskAttr {
            name,
            entry_point: task_body,
            entry_param: param,
            priority,
        };
        let id = self
            .state
            .create_task(&mut lock, attr, leak_stack(TASK_STACK_WORDS))
            .unwrap();
        self.state.activate(lock.borrow_mut(), id).unwrap();
        id
    }

    /// Take a trap and handle it.
    pub fn trap(&mut self, cause: TrapCause) {
        self.hart.raise(cause);
        self.shim.handle_trap(&mut self.state, &mut self.hart, &mut self.hooks);
    }

    /// Start the scheduler the way the bare-metal port does, by pending a
    /// software interrupt in the idle loop.
    pub fn start(&mut self) {
        assert!(self.hart.is_idle());
        self.trap(TrapCause::SoftwareInterrupt);
    }

    /// Execute `ecall` from the current context at `pc`.
    pub fn ecall(&mut self, pc: usize, syscall: Syscall, arg: usize) {
        self.hart.regs.pc = pc;
        self.hart.regs.x[A7] = syscall as usize;
        self.hart.regs.x[A0] = arg;
        self.trap(TrapCause::EnvironmentCall(EXCEPTION_ECALL_M));
    }

    pub fn running(&self) -> Option<TaskId> {
        self.state.running_task()
    }

    /// The value of `a0` as a result code.
    pub fn a0_result(&self) -> Option<ResultCode> {
        ResultCode::from_raw(self.hart.regs.x[A0] as i8)
    }
}
