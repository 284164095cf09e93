//! Task ready queue implementation (internal use only).
//!
//! **This module is exempt from the API stability guarantee.**
use core::fmt;

use crate::{
    task::{TaskCb, TaskId},
    utils::PrioBitmap,
};

/// The result type of [`BitmapQueue::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision<T> {
    /// The kernel should not perform context switch and should continue to
    /// schedule the current task.
    Keep,
    /// The kernel should perform context switch to the specified task.
    /// `SwitchTo(None)` means the processor should idle.
    SwitchTo(Option<T>),
}

/// The link of a Ready task to its neighbors in a circular doubly-linked list.
/// Stored in [`TaskCb::ready_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub(crate) prev: TaskId,
    pub(crate) next: TaskId,
}

#[doc = svgbobdoc::transform!(
/// The ready queue implementation that uses a set of queues segregated by the
/// priorities of contained tasks.
///
/// Tasks are linked intrusively through [`TaskCb::ready_link`], so every
/// method that follows links takes the task table as a parameter.
///
/// ```svgbob
///   bitmap   queues
///   +---+   +-------+
///   | 0 |   | None  |
///   +---+   +-------+     +--------+     +--------+
///   | 1 |   | Some -+---->| task 3 |<--->| task 1 |<--+
///   +---+   +-------+     +--------+     +--------+   |
///   | 0 |   | None  |         ^                       |
///   +---+   +-------+         +-----------------------+
///   | 1 |   | Some -+---->+--------+
///   +---+   +-------+     | task 2 |<--+ (links to itself)
///                         +--------+---+
/// ```
///
/// The front of a queue is the task that became Ready first. A task is pushed
/// to the back, which is the `prev` of the front.
)]
pub struct BitmapQueue<const LEN: usize> {
    /// The first task of each segregated queue, in which each queue stores
    /// the list of Ready tasks at the corresponding priority.
    ///
    /// Invariant: `queues[i].is_some() == bitmap.get(i)`
    queues: [Option<TaskId>; LEN],

    /// The task ready bitmap, in which each bit indicates whether the
    /// segregated queue corresponding to that bit contains a task or not.
    bitmap: PrioBitmap,
}

impl<const LEN: usize> BitmapQueue<LEN> {
    pub const fn new() -> Self {
        Self {
            queues: [None; LEN],
            bitmap: PrioBitmap::INIT,
        }
    }

    /// Get the most urgent priority having a Ready task.
    #[inline]
    pub fn highest_priority(&self) -> Option<usize> {
        self.bitmap.find_set()
    }

    /// Get the task at the front of the queue without removing it.
    #[inline]
    pub fn front(&self) -> Option<TaskId> {
        self.highest_priority().and_then(|pri| self.queues[pri])
    }

    /// Return `true` if the queue contains no tasks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.highest_priority().is_none()
    }

    /// Choose the next task to schedule based on `prev_task_priority`, the
    /// priority of the current task. If there's no such current task (or it's
    /// not runnable anymore), `prev_task_priority` should be `usize::MAX`, in
    /// which case this method will return `SwitchTo(_)`.
    ///
    /// The current task is kept only if it's strictly more urgent than every
    /// task in the queue. A Ready task with an equal priority takes over.
    ///
    /// | Has current task? | Is it runnable? | `prev_task_priority` | Has next task? |        Returns      |
    /// | ----------------- | --------------- | -------------------- | -------------- | ------------------- |
    /// |        no         |       n/a       |   `== usize::MAX`    |       no       |  `SwitchTo(None)`   |
    /// |        no         |       n/a       |   `== usize::MAX`    |       yes      | `SwitchTo(Some(_))` |
    /// |        yes        |       no        |   `== usize::MAX`    |       no       |  `SwitchTo(None)`   |
    /// |        yes        |       no        |   `== usize::MAX`    |       yes      | `SwitchTo(Some(_))` |
    /// |        yes        |       yes       |   `!= usize::MAX`    |       no       |       `Keep`        |
    /// |        yes        |       yes       |   `!= usize::MAX`    |   less urgent  |       `Keep`        |
    /// |        yes        |       yes       |   `!= usize::MAX`    | at least as urgent | `SwitchTo(Some(_))` |
    ///
    /// This method doesn't modify the queue.
    pub fn decide(&self, prev_task_priority: usize) -> ScheduleDecision<TaskId> {
        // `usize::MAX` never collides with an actual task priority because
        // of the range restriction imposed by `State::create_task`
        let next_task_priority = self.highest_priority().unwrap_or(usize::MAX);

        if prev_task_priority < next_task_priority {
            ScheduleDecision::Keep
        } else if next_task_priority < LEN {
            ScheduleDecision::SwitchTo(self.queues[next_task_priority])
        } else {
            ScheduleDecision::SwitchTo(None)
        }
    }

    /// Insert the specified task to the back of the queue for its priority.
    ///
    /// The task must not be in the queue already.
    pub fn push_back(&mut self, tasks: &mut [TaskCb<'_>], id: TaskId) {
        debug_assert!(tasks[id.index()].ready_link.is_none());
        let pri = tasks[id.index()].priority;

        match self.queues[pri] {
            None => {
                tasks[id.index()].ready_link = Some(Link { prev: id, next: id });
                self.queues[pri] = Some(id);
            }
            Some(first) => {
                let last = link(tasks, first).prev;
                tasks[id.index()].ready_link = Some(Link {
                    prev: last,
                    next: first,
                });
                link_mut(tasks, last).next = id;
                link_mut(tasks, first).prev = id;
            }
        }

        // Update `bitmap` accordingly
        self.bitmap.set(pri);
    }

    /// Remove the specified task from the queue.
    ///
    /// The task must be in the queue, linked at the priority currently stored
    /// in its [`TaskCb::priority`].
    pub fn remove(&mut self, tasks: &mut [TaskCb<'_>], id: TaskId) {
        let pri = tasks[id.index()].priority;
        let Link { prev, next } = match tasks[id.index()].ready_link.take() {
            Some(link) => link,
            None => unreachable!("{id:?} is not in the ready queue"),
        };

        if next == id {
            // It was the only element
            debug_assert_eq!(self.queues[pri], Some(id));
            self.queues[pri] = None;
            self.bitmap.clear(pri);
        } else {
            link_mut(tasks, prev).next = next;
            link_mut(tasks, next).prev = prev;
            if self.queues[pri] == Some(id) {
                self.queues[pri] = Some(next);
            }
        }
    }

    /// Reposition the specified task within the queue after changing its
    /// priority to `priority`.
    ///
    /// The task will be re-inserted as close to the back as possible without
    /// violating the priority ordering.
    pub fn reorder(&mut self, tasks: &mut [TaskCb<'_>], id: TaskId, priority: usize) {
        self.remove(tasks, id);
        tasks[id.index()].priority = priority;
        self.push_back(tasks, id);
    }

    /// Iterate over the tasks of the specified priority, front to back.
    pub fn iter_priority<'a>(
        &'a self,
        tasks: &'a [TaskCb<'a>],
        priority: usize,
    ) -> impl Iterator<Item = TaskId> + 'a {
        let first = self.queues[priority];
        let mut cursor = first;
        core::iter::from_fn(move || {
            let id = cursor?;
            let next = link(tasks, id).next;
            cursor = if Some(next) == first { None } else { Some(next) };
            Some(id)
        })
    }

    /// Iterate over all tasks in the queue in scheduling order.
    pub fn iter<'a>(&'a self, tasks: &'a [TaskCb<'a>]) -> impl Iterator<Item = TaskId> + 'a {
        self.bitmap
            .iter()
            .flat_map(move |pri| self.iter_priority(tasks, pri))
    }
}

impl<const LEN: usize> Default for BitmapQueue<LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LEN: usize> fmt::Debug for BitmapQueue<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("BitmapQueue ")?;
        f.debug_map()
            .entries(self.bitmap.iter().map(|pri| (pri, self.queues[pri])))
            .finish()
    }
}

#[inline]
fn link(tasks: &[TaskCb<'_>], id: TaskId) -> Link {
    match tasks[id.index()].ready_link {
        Some(link) => link,
        None => unreachable!("{id:?} is not in the ready queue"),
    }
}

#[inline]
fn link_mut<'a>(tasks: &'a mut [TaskCb<'_>], id: TaskId) -> &'a mut Link {
    match &mut tasks[id.index()].ready_link {
        Some(link) => link,
        None => unreachable!("{id:?} is not in the ready queue"),
    }
}
