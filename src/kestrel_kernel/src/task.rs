//! Tasks
use core::{fmt, num::NonZeroUsize};
use kestrel_portkit::{
    regs::{A0, RA},
    FrameError, FrameKind, RegisterFile, StackRegion,
};

use crate::{
    error::{ActivateTaskError, BadIdError, CreateTaskError},
    klock::{CpuLockGuard, CpuLockTokenRefMut},
    Port, State,
};

pub mod readyqueue;

/// Identifies a task created by [`State::create_task`].
///
/// The value is a one-based index into the task table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(NonZeroUsize);

impl TaskId {
    /// Construct a `TaskId` from a raw value. Returns `None` if `raw == 0`.
    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(x) => Some(Self(x)),
            None => None,
        }
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    #[inline]
    pub(crate) fn from_index(i: usize) -> Self {
        match Self::new(i + 1) {
            Some(id) => id,
            None => unreachable!(),
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0.get() - 1
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// The static properties of a task.
#[derive(Clone, Copy)]
pub struct TaskAttr {
    /// The name of the task, used in log messages.
    pub name: &'static str,

    /// The entry point of the task.
    pub entry_point: fn(usize),

    /// The parameter supplied for `entry_point`.
    pub entry_param: usize,

    /// The initial priority of the task. Lower values are more urgent.
    pub priority: usize,
}

impl fmt::Debug for TaskAttr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskAttr")
            .field("name", &self.name)
            .field("entry_point", &(self.entry_point as usize as *const ()))
            .field("entry_param", &self.entry_param)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSt {
    /// The task has been created but not activated yet.
    Dormant,

    Ready,

    /// The task is in the Running state.
    Running,

    /// The task is waiting for an event (e.g., a wake-up from another task).
    Blocked,

    /// The task was explicitly suspended and stays so until resumed.
    Suspended,
}

/// *Task control block* - the state data of a task.
pub struct TaskCb<'s> {
    /// The static properties of the task.
    pub attr: TaskAttr,

    /// The stack region owned by the task for its whole lifetime.
    pub(crate) stack: StackRegion<'s>,

    /// The address of the frame saved by the last context switch. Only
    /// meaningful while the task is not Running.
    pub(crate) saved_sp: usize,

    /// The layout of the frame at `saved_sp`.
    pub(crate) frame_kind: FrameKind,

    /// The current priority. Determines the task's position within the ready
    /// queue; use [`BitmapQueue::reorder`] to change it while the task is
    /// Ready.
    ///
    /// [`BitmapQueue::reorder`]: readyqueue::BitmapQueue::reorder
    pub(crate) priority: usize,

    pub(crate) st: TaskSt,

    /// Links the task into the ready queue. `Some(_)` iff the task is Ready.
    pub(crate) ready_link: Option<readyqueue::Link>,
}

impl<'s> TaskCb<'s> {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.attr.name
    }

    #[inline]
    pub fn st(&self) -> TaskSt {
        self.st
    }

    #[inline]
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// The address of the saved frame.
    #[inline]
    pub fn saved_stack_pointer(&self) -> usize {
        self.saved_sp
    }

    /// The layout of the saved frame.
    #[inline]
    pub fn frame_kind(&self) -> FrameKind {
        self.frame_kind
    }

    #[inline]
    pub fn stack(&self) -> &StackRegion<'s> {
        &self.stack
    }

    /// Get a mutable reference to the stack region. This can be used to patch
    /// the saved frame (e.g., to deliver a return value).
    #[inline]
    pub fn stack_mut(&mut self) -> &mut StackRegion<'s> {
        &mut self.stack
    }
}

impl fmt::Debug for TaskCb<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("attr", &self.attr)
            .field("stack", &self.stack)
            .field("saved_sp", &format_args!("{:#x}", self.saved_sp))
            .field("frame_kind", &self.frame_kind)
            .field("priority", &self.priority)
            .field("st", &self.st)
            .field("ready_link", &self.ready_link)
            .finish()
    }
}

impl<'s, const TASKS: usize, const PRIOS: usize> State<'s, TASKS, PRIOS> {
    /// Register a new task and prime its stack with an initial Cooperative
    /// frame, so that the first switch to the task starts executing
    /// `attr.entry_point(attr.entry_param)`. Returning from the entry point
    /// jumps to [`Port::task_exit_address`].
    ///
    /// The new task is in the Dormant state. Use [`Self::activate`] to make it
    /// Ready.
    pub fn create_task<P: Port>(
        &mut self,
        lock: &mut CpuLockGuard<'_, P>,
        attr: TaskAttr,
        mut stack: StackRegion<'s>,
    ) -> Result<TaskId, CreateTaskError> {
        if attr.priority >= PRIOS {
            return Err(CreateTaskError::BadParam);
        }
        if self.tasks.is_full() {
            return Err(CreateTaskError::QueueOverflow);
        }

        let mut regs = RegisterFile::ZERO;
        regs.pc = attr.entry_point as usize;
        regs.x[A0] = attr.entry_param;
        regs.x[RA] = lock.task_exit_address();

        let sp = stack.aligned_top();
        let saved_sp = P::FRAME
            .cooperative
            .save(&regs, &mut stack, sp)
            .map_err(|e| match e {
                FrameError::StackOverflow => CreateTaskError::NoMemory,
                _ => CreateTaskError::BadParam,
            })?;

        let id = TaskId::from_index(self.tasks.len());
        log::debug!(
            "created {id:?} '{}' (priority {}, stack {:?})",
            attr.name,
            attr.priority,
            stack
        );

        self.tasks.push(TaskCb {
            attr,
            stack,
            saved_sp,
            frame_kind: FrameKind::Cooperative,
            priority: attr.priority,
            st: TaskSt::Dormant,
            ready_link: None,
        });

        Ok(id)
    }

    /// Transition a Dormant task into the Ready state.
    pub fn activate(
        &mut self,
        lock: CpuLockTokenRefMut<'_>,
        id: TaskId,
    ) -> Result<(), ActivateTaskError> {
        let task_cb = self.task_cb_mut(id)?;
        if task_cb.st != TaskSt::Dormant {
            return Err(ActivateTaskError::QueueOverflow);
        }
        task_cb.priority = task_cb.attr.priority;

        log::debug!("activating {id:?} '{}'", task_cb.attr.name);

        self.make_ready(lock, id);
        self.check_preemption();

        Ok(())
    }

    /// Get the task control block of the specified task.
    #[inline]
    pub fn task(&self, id: TaskId) -> Option<&TaskCb<'s>> {
        self.tasks.get(id.index())
    }

    /// Get the task control block of the specified task for modifying its
    /// saved frame.
    #[inline]
    pub fn task_mut(
        &mut self,
        _lock: CpuLockTokenRefMut<'_>,
        id: TaskId,
    ) -> Option<&mut TaskCb<'s>> {
        self.tasks.get_mut(id.index())
    }

    /// Get the current state of the specified task.
    #[inline]
    pub fn task_state(&self, id: TaskId) -> Result<TaskSt, BadIdError> {
        Ok(self.task_cb(id)?.st)
    }

    /// Get the current priority of the specified task.
    #[inline]
    pub fn priority(&self, id: TaskId) -> Result<usize, BadIdError> {
        Ok(self.task_cb(id)?.priority)
    }

    /// Iterate over all created tasks.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &TaskCb<'s>)> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .map(|(i, task_cb)| (TaskId::from_index(i), task_cb))
    }

    #[inline]
    pub(crate) fn task_cb(&self, id: TaskId) -> Result<&TaskCb<'s>, BadIdError> {
        self.tasks.get(id.index()).ok_or(BadIdError::BadId)
    }

    #[inline]
    pub(crate) fn task_cb_mut(&mut self, id: TaskId) -> Result<&mut TaskCb<'s>, BadIdError> {
        self.tasks.get_mut(id.index()).ok_or(BadIdError::BadId)
    }

    /// Transition the task into the Ready state and insert it at the back of
    /// the ready queue. This function doesn't do any proper cleanup for a
    /// previous state.
    pub(crate) fn make_ready(&mut self, _lock: CpuLockTokenRefMut<'_>, id: TaskId) {
        self.tasks[id.index()].st = TaskSt::Ready;
        self.ready_queue.push_back(&mut self.tasks, id);
    }
}
