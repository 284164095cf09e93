//! The scheduler state and the operations that change which task runs
use arrayvec::ArrayVec;
use core::fmt;
use kestrel_portkit::{FrameError, FrameKind};

use crate::{
    error::{
        ContextError, MarkBlockedError, MarkReadyError, SetPriorityError, SuspendError,
        SwitchError,
    },
    klock::{CpuLockGuard, CpuLockTokenRefMut},
    task::{
        readyqueue::{BitmapQueue, ScheduleDecision},
        TaskCb, TaskId, TaskSt,
    },
    utils::PRIO_BITMAP_MAX_LEN,
    Port,
};

/// The global state of the scheduler.
///
///  - `TASKS` is the capacity of the task table.
///  - `PRIOS` is the number of task priority levels. Priority `0` is the most
///    urgent.
///
/// Operations that modify the set of Ready tasks or the current task take a
/// [`CpuLockTokenRefMut`] (or a [`CpuLockGuard`] if they also need the port),
/// so they can only be called with interrupts masked.
pub struct State<'s, const TASKS: usize, const PRIOS: usize> {
    pub(crate) tasks: ArrayVec<TaskCb<'s>, TASKS>,

    pub(crate) ready_queue: BitmapQueue<PRIOS>,

    /// The task that owns the processor (or, if it's not in the Running
    /// state, the one that owned it before the pending dispatch). `None`
    /// while the processor is idle.
    ///
    /// Invariant: only this task can be in the Running state.
    pub(crate) running_task: Option<TaskId>,

    /// Set when the next scheduling point should consult the ready queue.
    dispatch_pending: bool,

    tick_count: u64,
}

impl<'s, const TASKS: usize, const PRIOS: usize> State<'s, TASKS, PRIOS> {
    pub const fn new() -> Self {
        assert!(
            PRIOS > 0 && PRIOS <= PRIO_BITMAP_MAX_LEN,
            "unsupported number of priority levels"
        );

        Self {
            tasks: ArrayVec::new_const(),
            ready_queue: BitmapQueue::new(),
            running_task: None,
            dispatch_pending: false,
            tick_count: 0,
        }
    }

    /// Get the current task. Returns `None` if the processor is idle.
    #[inline]
    pub fn running_task(&self) -> Option<TaskId> {
        self.running_task
    }

    #[inline]
    pub fn ready_queue(&self) -> &BitmapQueue<PRIOS> {
        &self.ready_queue
    }

    /// Iterate over the Ready tasks in scheduling order.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready_queue.iter(&self.tasks)
    }

    #[inline]
    pub fn dispatch_pending(&self) -> bool {
        self.dispatch_pending
    }

    /// Request the next scheduling point to reconsider the current task.
    #[inline]
    pub fn request_dispatch(&mut self, _lock: CpuLockTokenRefMut<'_>) {
        self.dispatch_pending = true;
    }

    /// Clear and return the dispatch request flag.
    #[inline]
    pub fn take_dispatch_pending(&mut self, _lock: CpuLockTokenRefMut<'_>) -> bool {
        core::mem::replace(&mut self.dispatch_pending, false)
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Advance the tick counter. Returns the new value.
    pub fn advance_tick(&mut self, _lock: CpuLockTokenRefMut<'_>) -> u64 {
        self.tick_count = self.tick_count.wrapping_add(1);
        self.tick_count
    }

    /// The priority of the current task, or `usize::MAX` if there's no
    /// current task or it's not runnable anymore.
    fn running_task_priority(&self) -> usize {
        match self.running_task {
            Some(id) if self.tasks[id.index()].st == TaskSt::Running => {
                self.tasks[id.index()].priority
            }
            _ => usize::MAX,
        }
    }

    /// Make a scheduling decision without changing anything.
    #[inline]
    pub fn decide(&self) -> ScheduleDecision<TaskId> {
        self.ready_queue.decide(self.running_task_priority())
    }

    /// Choose the task that should run next: the first task of the most
    /// urgent non-empty priority level, or the current task if it's strictly
    /// more urgent than all of them. Returns `None` if there's no runnable
    /// task, in which case the processor should idle.
    pub fn select_next(&self) -> Option<TaskId> {
        match self.decide() {
            ScheduleDecision::Keep => self.running_task,
            ScheduleDecision::SwitchTo(next) => next,
        }
    }

    /// Set the dispatch request flag if there's a Ready task more urgent than
    /// the current one.
    pub(crate) fn check_preemption(&mut self) {
        let has_preempting_task = self
            .ready_queue
            .highest_priority()
            .map_or(false, |pri| pri < self.running_task_priority());
        if has_preempting_task {
            self.dispatch_pending = true;
        }
    }

    /// Transition a Blocked or Suspended task into the Ready state.
    pub fn mark_ready(
        &mut self,
        mut lock: CpuLockTokenRefMut<'_>,
        id: TaskId,
    ) -> Result<(), MarkReadyError> {
        let task_cb = self.task_cb(id)?;
        match task_cb.st {
            TaskSt::Blocked | TaskSt::Suspended => {}
            _ => return Err(MarkReadyError::BadObjectState),
        }
        log::debug!("{id:?} '{}': {:?} -> Ready", task_cb.name(), task_cb.st);

        self.make_ready(lock.borrow_mut(), id);
        self.check_preemption();
        Ok(())
    }

    /// Transition a Running or Ready task into the Blocked state.
    ///
    /// Blocking the current task requests a dispatch; the task keeps
    /// executing until the next scheduling point.
    pub fn mark_blocked(
        &mut self,
        _lock: CpuLockTokenRefMut<'_>,
        id: TaskId,
    ) -> Result<(), MarkBlockedError> {
        let st = self.task_cb(id)?.st;
        match st {
            TaskSt::Running => {
                debug_assert_eq!(self.running_task, Some(id));
                self.dispatch_pending = true;
            }
            TaskSt::Ready => self.ready_queue.remove(&mut self.tasks, id),
            _ => return Err(MarkBlockedError::BadObjectState),
        }
        log::debug!("{id:?} '{}': {st:?} -> Blocked", self.tasks[id.index()].name());

        self.tasks[id.index()].st = TaskSt::Blocked;
        Ok(())
    }

    /// Transition a task into the Suspended state.
    pub fn suspend(&mut self, _lock: CpuLockTokenRefMut<'_>, id: TaskId) -> Result<(), SuspendError> {
        let st = self.task_cb(id)?.st;
        match st {
            TaskSt::Running => {
                debug_assert_eq!(self.running_task, Some(id));
                self.dispatch_pending = true;
            }
            TaskSt::Ready => self.ready_queue.remove(&mut self.tasks, id),
            TaskSt::Blocked => {}
            TaskSt::Dormant | TaskSt::Suspended => return Err(SuspendError::BadObjectState),
        }
        log::debug!("{id:?} '{}': {st:?} -> Suspended", self.tasks[id.index()].name());

        self.tasks[id.index()].st = TaskSt::Suspended;
        Ok(())
    }

    /// Transition a Suspended task into the Ready state.
    pub fn resume(&mut self, mut lock: CpuLockTokenRefMut<'_>, id: TaskId) -> Result<(), SuspendError> {
        if self.task_cb(id)?.st != TaskSt::Suspended {
            return Err(SuspendError::BadObjectState);
        }
        log::debug!("{id:?} '{}': Suspended -> Ready", self.tasks[id.index()].name());

        self.make_ready(lock.borrow_mut(), id);
        self.check_preemption();
        Ok(())
    }

    /// Change the priority of a task. A Ready task is moved to the back of
    /// the queue for the new priority.
    pub fn set_priority(
        &mut self,
        _lock: CpuLockTokenRefMut<'_>,
        id: TaskId,
        priority: usize,
    ) -> Result<(), SetPriorityError> {
        let st = self.task_cb(id)?.st;
        if priority >= PRIOS {
            return Err(SetPriorityError::BadParam);
        }

        match st {
            TaskSt::Dormant => return Err(SetPriorityError::BadObjectState),
            TaskSt::Ready => self.ready_queue.reorder(&mut self.tasks, id, priority),
            TaskSt::Running | TaskSt::Blocked | TaskSt::Suspended => {
                self.tasks[id.index()].priority = priority;
            }
        }
        log::debug!("{id:?} '{}': priority = {priority}", self.tasks[id.index()].name());

        self.check_preemption();
        Ok(())
    }

    /// Save the live registers of the port as a frame of the specified kind
    /// on the stack of task `id`, using the live stack pointer. Records the
    /// frame's location in the task control block.
    ///
    /// The trap entry path uses this to save the interrupted task.
    pub fn save_context<P: Port>(
        &mut self,
        lock: &mut CpuLockGuard<'_, P>,
        id: TaskId,
        kind: FrameKind,
    ) -> Result<usize, ContextError> {
        let task_cb = self.task_cb_mut(id)?;
        let regs = lock.registers();
        let saved_sp = P::FRAME
            .layout(kind)
            .save(regs, &mut task_cb.stack, regs.sp())?;
        task_cb.saved_sp = saved_sp;
        task_cb.frame_kind = kind;
        Ok(saved_sp)
    }

    /// Load the saved frame of task `id` into the live registers of the port
    /// and set the stack pointer to the value it had before the frame was
    /// pushed. Returns the kind of the restored frame.
    ///
    /// The live registers are left unmodified on failure.
    pub fn restore_context<P: Port>(
        &self,
        lock: &mut CpuLockGuard<'_, P>,
        id: TaskId,
    ) -> Result<FrameKind, ContextError> {
        let task_cb = self.task_cb(id)?;
        let kind = task_cb.frame_kind;
        if P::FRAME.peek_kind(&task_cb.stack, task_cb.saved_sp)? != kind {
            return Err(FrameError::KindMismatch.into());
        }

        let regs = lock.registers_mut();
        let sp = P::FRAME
            .layout(kind)
            .restore(&task_cb.stack, task_cb.saved_sp, regs)?;
        regs.set_sp(sp);
        Ok(kind)
    }

    /// Switch from the current task `from` to the Ready task `to`.
    ///
    /// The live registers are saved as a Cooperative frame on `from`'s stack.
    /// `from` is put back to the ready queue (at the back) if it's still
    /// Running; a Blocked or Suspended `from` stays so. `to` is removed from
    /// the ready queue, becomes Running and the current task, and its frame
    /// is loaded into the live registers.
    ///
    /// No other task is modified. Nothing is modified if this method returns
    /// `Err(_)`.
    pub fn switch<P: Port>(
        &mut self,
        lock: &mut CpuLockGuard<'_, P>,
        from: TaskId,
        to: TaskId,
    ) -> Result<(), SwitchError> {
        self.task_cb(from)?;
        if self.running_task != Some(from) {
            return Err(SwitchError::BadContext);
        }
        self.check_switch_target(to)?;

        let task_cb = &mut self.tasks[from.index()];
        let regs = lock.registers();
        let saved_sp = P::FRAME
            .cooperative
            .save(regs, &mut task_cb.stack, regs.sp())
            .map_err(|e| match e {
                FrameError::StackOverflow => SwitchError::NoMemory,
                _ => SwitchError::BadObjectState,
            })?;

        // Don't commit the saved frame until `to`'s frame is loaded
        let (old_sp, old_kind) = (task_cb.saved_sp, task_cb.frame_kind);
        task_cb.saved_sp = saved_sp;
        task_cb.frame_kind = FrameKind::Cooperative;

        let result = self.switch_from_saved(lock, Some(to));
        if result.is_err() {
            let task_cb = &mut self.tasks[from.index()];
            task_cb.saved_sp = old_sp;
            task_cb.frame_kind = old_kind;
        }
        result.map(|_| ())
    }

    /// Complete a context switch whose outgoing frame was already saved (by
    /// [`Self::save_context`] in the trap entry path). Switches to `to`, or
    /// makes the processor idle if `to` is `None`.
    ///
    /// Returns the kind of the frame loaded into the live registers.
    pub fn switch_from_saved<P: Port>(
        &mut self,
        lock: &mut CpuLockGuard<'_, P>,
        to: Option<TaskId>,
    ) -> Result<Option<FrameKind>, SwitchError> {
        let from = self.running_task;

        let kind = if let Some(to) = to {
            self.check_switch_target(to)?;
            Some(
                self.restore_context(lock, to)
                    .map_err(|_| SwitchError::BadObjectState)?,
            )
        } else {
            None
        };

        // `from` loses the control of the processor
        if let Some(from) = from.filter(|&from| Some(from) != to) {
            match self.tasks[from.index()].st {
                TaskSt::Running => self.make_ready(lock.borrow_mut(), from),
                TaskSt::Ready | TaskSt::Blocked | TaskSt::Suspended => {}
                TaskSt::Dormant => unreachable!(),
            }
        }

        if let Some(to) = to {
            self.ready_queue.remove(&mut self.tasks, to);
            self.tasks[to.index()].st = TaskSt::Running;
        }
        self.running_task = to;

        match (from, to) {
            (_, Some(to)) => log::debug!(
                "switch {from:?} -> {to:?} '{}'",
                self.tasks[to.index()].name()
            ),
            (Some(_), None) => log::debug!("switch {from:?} -> idle"),
            (None, None) => {}
        }

        Ok(kind)
    }

    fn check_switch_target(&self, to: TaskId) -> Result<(), SwitchError> {
        if self.task_cb(to)?.st != TaskSt::Ready {
            return Err(SwitchError::BadObjectState);
        }
        Ok(())
    }
}

impl<const TASKS: usize, const PRIOS: usize> Default for State<'_, TASKS, PRIOS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const TASKS: usize, const PRIOS: usize> fmt::Debug for State<'_, TASKS, PRIOS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State")
            .field("tasks", &self.tasks)
            .field("ready_queue", &self.ready_queue)
            .field("running_task", &self.running_task)
            .field("dispatch_pending", &self.dispatch_pending)
            .field("tick_count", &self.tick_count)
            .finish()
    }
}
