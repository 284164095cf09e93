//! Test fixtures
use kestrel_portkit::{FrameDescriptor, FrameKind, FrameLayout, RegisterFile, RegisterSlot};

use crate::{
    task::{TaskAttr, TaskCb, TaskSt},
    Port,
};

pub const TEST_EXIT_ADDRESS: usize = 0xdead_0000;

const INTERRUPTED_SLOTS: [RegisterSlot; 6] = [
    RegisterSlot::Int(1),
    RegisterSlot::Int(5),
    RegisterSlot::Int(8),
    RegisterSlot::Int(10),
    RegisterSlot::Pc,
    RegisterSlot::Status,
];

const COOPERATIVE_SLOTS: [RegisterSlot; 4] = [
    RegisterSlot::Int(1),
    RegisterSlot::Int(8),
    RegisterSlot::Int(10),
    RegisterSlot::Pc,
];

/// A port backed by a plain register file.
pub struct TestPort {
    pub regs: RegisterFile,
    pub cpu_lock: bool,
}

impl TestPort {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::ZERO,
            cpu_lock: false,
        }
    }
}

impl Port for TestPort {
    const FRAME: FrameDescriptor = FrameDescriptor {
        interrupted: FrameLayout {
            kind: FrameKind::Interrupted,
            int_slots: &INTERRUPTED_SLOTS,
            fp_slots: &[],
            include_fp: false,
        },
        cooperative: FrameLayout {
            kind: FrameKind::Cooperative,
            int_slots: &COOPERATIVE_SLOTS,
            fp_slots: &[],
            include_fp: false,
        },
    };

    fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    fn enter_cpu_lock(&mut self) {
        self.cpu_lock = true;
    }

    fn leave_cpu_lock(&mut self) {
        self.cpu_lock = false;
    }

    fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock
    }

    fn task_exit_address(&self) -> usize {
        TEST_EXIT_ADDRESS
    }
}

pub fn task_entry(_: usize) {}

pub fn attr(name: &'static str, priority: usize, entry_param: usize) -> TaskAttr {
    TaskAttr {
        name,
        entry_point: task_entry,
        entry_param,
        priority,
    }
}

/// Construct a Dormant task control block directly, bypassing
/// `State::create_task`.
pub fn make_task(stack: kestrel_portkit::StackRegion<'_>, priority: usize) -> TaskCb<'_> {
    TaskCb {
        attr: attr("test", priority, 0),
        saved_sp: stack.top(),
        stack,
        frame_kind: FrameKind::Cooperative,
        priority,
        st: TaskSt::Dormant,
        ready_link: None,
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
