//! System services invoked by `ecall`
//!
//! The service number is passed in `a7` and the argument in `a0`. The
//! [`ResultCode`] of the service is written back to `a0`.
use kestrel_kernel::{BadContextError, CpuLockTokenRefMut, ResultCode, State, TaskId};

/// A system service number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Syscall {
    /// Let the scheduler reconsider the current task.
    Yield = 0,
    /// Transition the calling task into the Blocked state.
    Block = 1,
    /// Transition the Blocked or Suspended task `a0` into the Ready state.
    Wake = 2,
    /// Transition the calling task into the Suspended state.
    SuspendSelf = 3,
}

impl Syscall {
    pub const fn from_raw(number: usize) -> Option<Self> {
        match number {
            0 => Some(Self::Yield),
            1 => Some(Self::Block),
            2 => Some(Self::Wake),
            3 => Some(Self::SuspendSelf),
            _ => None,
        }
    }
}

/// Execute the system service `number`. `caller` is the task that issued
/// `ecall`, or `None` if it was issued by an interrupt handler.
///
/// The caller of this function is responsible for requesting a dispatch.
pub fn execute<const TASKS: usize, const PRIOS: usize>(
    state: &mut State<'_, TASKS, PRIOS>,
    mut lock: CpuLockTokenRefMut<'_>,
    caller: Option<TaskId>,
    number: usize,
    arg: usize,
) -> ResultCode {
    let syscall = match Syscall::from_raw(number) {
        Some(syscall) => syscall,
        None => {
            log::warn!("unknown system service {number} requested by {caller:?}");
            return ResultCode::NotSupported;
        }
    };
    log::trace!("{caller:?}: {syscall:?}({arg:#x})");

    let result = match (syscall, caller) {
        (Syscall::Yield, _) => ResultCode::Success,
        (Syscall::Block, Some(caller)) => state.mark_blocked(lock.borrow_mut(), caller).into(),
        (Syscall::Wake, _) => match TaskId::new(arg) {
            Some(id) => state.mark_ready(lock.borrow_mut(), id).into(),
            None => ResultCode::BadId,
        },
        (Syscall::SuspendSelf, Some(caller)) => state.suspend(lock.borrow_mut(), caller).into(),
        (Syscall::Block | Syscall::SuspendSelf, None) => BadContextError::BadContext.into(),
    };

    if result.is_err() {
        log::warn!("{caller:?}: {syscall:?}({arg:#x}) failed: {result:?}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimHart, SimOptions};
    use kestrel_kernel::{lock_cpu, TaskAttr, TaskSt};
    use kestrel_portkit::StackRegion;

    fn entry(_: usize) {}

    #[test]
    fn services() {
        let mut hart = SimHart::<SimOptions>::new();
        let mut stacks = [[0usize; 128]; 2];
        let mut state = State::<2, 4>::new();
        let mut lock = lock_cpu(&mut hart).unwrap();
        let ids: Vec<TaskId> = stacks
            .iter_mut()
            .map(|stack| {
                let attr = TaskAttr {
                    name: "t",
                    entry_point: entry,
                    entry_param: 0,
                    priority: 1,
                };
                let id = state
                    .create_task(&mut lock, attr, StackRegion::new(stack))
                    .unwrap();
                state.activate(lock.borrow_mut(), id).unwrap();
                id
            })
            .collect();

        assert_eq!(
            execute(&mut state, lock.borrow_mut(), Some(ids[0]), 0, 0),
            ResultCode::Success
        );
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), Some(ids[0]), 1, 0),
            ResultCode::Success
        );
        assert_eq!(state.task_state(ids[0]), Ok(TaskSt::Blocked));
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), None, 2, ids[0].get()),
            ResultCode::Success
        );
        assert_eq!(state.task_state(ids[0]), Ok(TaskSt::Ready));

        // Waking a Ready task is a state error
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), None, 2, ids[1].get()),
            ResultCode::BadObjectState
        );
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), None, 2, 0),
            ResultCode::BadId
        );
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), None, 2, 42),
            ResultCode::BadId
        );
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), None, 1, 0),
            ResultCode::BadContext
        );
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), Some(ids[1]), 3, 0),
            ResultCode::Success
        );
        assert_eq!(state.task_state(ids[1]), Ok(TaskSt::Suspended));
        assert_eq!(
            execute(&mut state, lock.borrow_mut(), Some(ids[1]), 99, 0),
            ResultCode::NotSupported
        );
    }
}
