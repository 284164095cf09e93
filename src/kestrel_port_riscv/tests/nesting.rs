//! Nested traps, stepped through the shim's phases one at a time
mod harness;

use std::mem;

use harness::System;
use kestrel_kernel::assume_cpu_lock;
use kestrel_port_riscv::{Hart, TrapCause};
use kestrel_portkit::regs::{A0, SP};
use quickcheck_macros::quickcheck;

impl System {
    /// Take a trap and run its entry and dispatch phases, leaving the
    /// handler "running".
    fn enter(&mut self, cause: TrapCause) {
        self.hart.raise(cause);
        let mut lock = assume_cpu_lock(&mut self.hart);
        let cx = self.shim.entry(&mut self.state, &mut lock).unwrap();
        self.shim
            .dispatch(&mut self.state, &mut lock, &mut self.hooks, cx)
            .unwrap();
        mem::forget(lock);
    }

    /// Return from the innermost handler.
    fn leave(&mut self) {
        let mut lock = assume_cpu_lock(&mut self.hart);
        self.shim
            .exit(&mut self.state, &mut lock, &mut self.hooks)
            .unwrap();
        lock.exception_return();
        mem::forget(lock);
    }
}

#[quickcheck]
fn nesting_balance(bursts: Vec<u8>) {
    let mut sys = System::new();
    let a = sys.spawn("a", 1, 0);
    sys.start();
    assert_eq!(sys.running(), Some(a));

    let task_regs = sys.hart.regs.clone();
    let switches_before = sys.shim.stats().stack_switches_in;
    let mut max_depth = 0;

    for &burst in bursts.iter().take(16) {
        let depth = usize::from(burst % 6) + 1;
        max_depth = max_depth.max(depth);
        log::debug!("burst of depth {depth}");

        for level in 1..=depth {
            sys.enter(TrapCause::ExternalInterrupt(16 + level));
            assert_eq!(sys.shim.nesting(), level);
            if level == 1 {
                assert_eq!(sys.hart.regs.x[SP], sys.shim.background_sp_slot());
            } else {
                assert!(sys.hart.regs.x[SP] < sys.shim.background_sp_slot());
            }
            // The handler's own work
            sys.hart.regs.x[A0] = level;
        }

        for level in (1..=depth).rev() {
            assert_eq!(sys.hart.regs.x[A0], level);
            sys.leave();
            assert_eq!(sys.shim.nesting(), level - 1);
            if level > 1 {
                // Still in the outer handler, which runs with interrupts masked
                assert!(!sys.hart.interrupts_enabled());
            }
        }

        assert_eq!(sys.running(), Some(a));
        assert_eq!(sys.hart.regs.x, task_regs.x);
        assert_eq!(sys.hart.regs.pc, task_regs.pc);
        assert!(sys.hart.interrupts_enabled());
    }

    let stats = sys.shim.stats();
    let bursts = bursts.len().min(16);
    assert_eq!(stats.stack_switches_in - switches_before, bursts);
    assert_eq!(stats.stack_switches_in, stats.stack_switches_out);
    assert_eq!(stats.max_nesting, max_depth.max(1));
}

#[test]
fn nested_tick_defers_switch_to_outermost_exit() {
    let mut sys = System::new();
    let a = sys.spawn("a", 1, 0);
    let b = sys.spawn("b", 1, 0);
    sys.start();
    assert_eq!(sys.running(), Some(a));

    sys.enter(TrapCause::ExternalInterrupt(20));
    sys.enter(TrapCause::TimerInterrupt);
    assert_eq!(sys.shim.nesting(), 2);
    assert!(sys.state.dispatch_pending());

    sys.leave();
    assert_eq!(sys.running(), Some(a));
    assert!(sys.state.dispatch_pending());

    sys.leave();
    assert_eq!(sys.running(), Some(b));
    assert!(!sys.state.dispatch_pending());

    let stats = sys.shim.stats();
    assert_eq!(stats.max_nesting, 2);
    assert_eq!(stats.timer_interrupts, 1);
    assert_eq!(stats.external_interrupts, 1);
    assert_eq!(sys.hooks.ticks, [1]);
}

#[test]
fn nested_trap_over_idle_loop() {
    let mut sys = System::new();
    sys.start();
    assert_eq!(sys.hooks.idle_calls, 1);

    sys.enter(TrapCause::ExternalInterrupt(17));
    assert_eq!(
        sys.shim.interrupt_stack().read(sys.shim.background_sp_slot()),
        Ok(0)
    );
    sys.enter(TrapCause::ExternalInterrupt(18));
    sys.leave();
    assert_eq!(sys.hooks.idle_calls, 1);
    sys.leave();

    assert!(sys.hart.is_idle());
    assert_eq!(sys.hart.regs.x[SP], 0);
    assert_eq!(sys.hooks.idle_calls, 2);
    assert_eq!(sys.hooks.external, [17, 18]);
}
