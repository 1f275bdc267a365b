// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.
//!
//! Tasks live in a fixed-size table inside the kernel state. A task's
//! membership in the ready or sleep "queue" is its scheduling state; the
//! scheduler extracts heads by scanning the table, which at this scale
//! beats maintaining ordered structures and is much harder to corrupt.

use abi::{OsError, Priority, TaskId, TaskInfo, TaskState, WaitFlags};

use crate::arch;
use crate::descs::TaskDesc;
use crate::sanity::SanityCheck;
use crate::startup::{with_kernel, KernelState};
use crate::time::{self, Ticks};
use crate::uassert;

/// Pattern used to fill fresh task stacks, so the high-water mark of stack
/// consumption can be measured later by scanning for where it survives.
pub(crate) const STACK_PATTERN: u32 = 0xbaddcafe;

/// Internal representation of a task.
///
/// The fields are private to the kernel so state transitions stay
/// consistent with the scheduler's bookkeeping.
pub(crate) struct Task {
    /// Saved machine state; only meaningful while the task isn't running.
    pub(crate) save: arch::SavedState,
    /// Stable identifier, assigned at creation and never reused.
    pub(crate) id: TaskId,
    pub(crate) name: &'static str,
    /// Scheduling priority, unique among living tasks.
    pub(crate) priority: Priority,
    pub(crate) state: TaskState,
    /// Absolute wake tick; `Some` only while sleeping with a timeout.
    pub(crate) deadline: Option<Ticks>,
    /// Wait bookkeeping maintained by sync primitives; a task with any flag
    /// set (or a nonzero lock count) cannot be removed.
    pub(crate) wait_flags: WaitFlags,
    pub(crate) lock_count: u8,
    pub(crate) sanity: SanityCheck,
    /// Times this task has been switched onto the processor.
    pub(crate) context_switches: u32,
    /// Accumulated ticks spent running.
    pub(crate) run_ticks: u32,
    /// The task's stack region, owned by the task from creation to removal.
    /// The kernel never frees it.
    pub(crate) stack: &'static mut [u32],
}

impl Task {
    /// Checks if this task is in a potentially schedulable state.
    pub(crate) fn is_runnable(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Measures the high-water mark of stack consumption, in words, by
    /// scanning from the low end for the first cell the task has written.
    fn stack_used(&self) -> u32 {
        let untouched = self
            .stack
            .iter()
            .take_while(|&&word| word == STACK_PATTERN)
            .count();
        (self.stack.len() - untouched) as u32
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name,
            priority: self.priority,
            state: self.state,
            stack_size: self.stack.len() as u32,
            stack_used: self.stack_used(),
            context_switches: self.context_switches,
            run_ticks: self.run_ticks,
            last_checkin: self
                .sanity
                .checkin_itvl
                .map(|_| self.sanity.checkin_last.into()),
            next_checkin: self
                .sanity
                .checkin_itvl
                .map(|itvl| (self.sanity.checkin_last + itvl).into()),
        }
    }
}

/// Finds the table index of the task named by `id`, if it is alive.
pub(crate) fn find_by_id(
    tasks: &[Option<Task>],
    id: TaskId,
) -> Option<usize> {
    tasks
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|t| t.id == id))
}

/// Selects the most important ready task, scanning after `previous` for
/// fairness. Returns `None` when nothing is ready (which, once the idle
/// task exists, can only mean the running task is the sole eligible one).
pub(crate) fn select(
    tasks: &[Option<Task>],
    previous: usize,
) -> Option<usize> {
    kerncore::priority_scan(
        previous,
        tasks,
        |slot| slot.as_ref().is_some_and(Task::is_runnable),
        |a, b| match (a, b) {
            (Some(a), Some(b)) => {
                a.priority.is_more_important_than(b.priority)
            }
            _ => false,
        },
    )
}

impl KernelState {
    /// Creates a task from `desc` and makes it ready. If the scheduler is
    /// running and the newcomer outranks the current task, it preempts
    /// before this returns.
    pub(crate) fn create_task(
        &mut self,
        mut desc: TaskDesc,
        now: Ticks,
    ) -> Result<TaskId, OsError> {
        // Priorities are globally unique; a collision is a programming
        // error, reported softly only in release builds.
        let clash = self
            .tasks
            .iter()
            .flatten()
            .any(|t| t.priority == desc.priority);
        if clash {
            debug_assert!(false, "priority {:?} already in use", desc.priority);
            return Err(OsError::InvalidParam);
        }
        if desc.stack.is_empty() {
            return Err(OsError::InvalidParam);
        }
        let slot = self
            .tasks
            .iter()
            .position(Option::is_none)
            .ok_or(OsError::NoMem)?;

        // Identifiers are never reused, so the id space can run out even
        // though table slots free up. Refuse rather than hand a stale
        // identifier a second owner.
        let id = match u8::try_from(self.next_task_id) {
            Ok(raw) => TaskId(raw),
            Err(_) => return Err(OsError::NoMem),
        };

        // Register with the sanity watchdog before the task becomes
        // visible, so a refusal leaves no trace.
        if let Some(interval) = desc.sanity_itvl {
            if let Some(registry) = self.sanity_registry {
                registry.register(id, interval)?;
            }
        }

        for word in desc.stack.iter_mut() {
            *word = STACK_PATTERN;
        }
        let save = arch::init_stack(desc.entry, desc.arg, desc.stack);

        self.tasks[slot] = Some(Task {
            save,
            id,
            name: desc.name,
            priority: desc.priority,
            state: TaskState::Ready,
            deadline: None,
            wait_flags: WaitFlags::empty(),
            lock_count: 0,
            sanity: SanityCheck {
                checkin_last: now,
                checkin_itvl: desc.sanity_itvl,
            },
            context_switches: 0,
            run_ticks: 0,
            stack: desc.stack,
        });
        self.next_task_id += 1;

        if self.started {
            self.schedule(now);
        }
        Ok(id)
    }

    /// Removes a task from the system. The running task cannot remove
    /// itself, and tasks holding a lock or waiting on a primitive are
    /// refused.
    pub(crate) fn remove_task(&mut self, id: TaskId) -> Result<(), OsError> {
        let index =
            find_by_id(&self.tasks, id).ok_or(OsError::NotStarted)?;
        if self.current == Some(index) {
            return Err(OsError::InvalidParam);
        }
        let task = self.tasks[index].as_ref();
        let task = match task {
            Some(t) => t,
            None => return Err(OsError::NotStarted),
        };
        match task.state {
            TaskState::Ready | TaskState::Sleeping => (),
            _ => return Err(OsError::NotStarted),
        }
        if !task.wait_flags.is_empty() || task.lock_count > 0 {
            return Err(OsError::Busy);
        }

        if task.sanity.checkin_itvl.is_some() {
            if let Some(registry) = self.sanity_registry {
                registry.deregister(id);
            }
        }

        // Dropping the record is the removal; the identifier never becomes
        // valid again, and the stack region returns to the caller's
        // keeping.
        self.tasks[index] = None;
        Ok(())
    }

    /// Returns information about the living task with the smallest
    /// identifier greater than `prev` (or the smallest overall for `None`),
    /// giving a stable creation-order iteration.
    pub(crate) fn task_info_after(
        &self,
        prev: Option<TaskId>,
    ) -> Option<TaskInfo> {
        let mut best: Option<&Task> = None;
        for task in self.tasks.iter().flatten() {
            if let Some(prev) = prev {
                if task.id.0 <= prev.0 {
                    continue;
                }
            }
            match best {
                Some(b) if b.id.0 <= task.id.0 => (),
                _ => best = Some(task),
            }
        }
        best.map(Task::info)
    }

    /// Moves a sleeping task to ready, regardless of its deadline. Sync
    /// primitives use this to deliver wake-ups. Waking a task that is
    /// already ready or running is a no-op.
    pub(crate) fn wake_task(
        &mut self,
        id: TaskId,
        now: Ticks,
    ) -> Result<(), OsError> {
        let index =
            find_by_id(&self.tasks, id).ok_or(OsError::NotStarted)?;
        let task = self.tasks[index].as_mut();
        let task = match task {
            Some(t) => t,
            None => return Err(OsError::NotStarted),
        };
        if task.state == TaskState::Sleeping {
            task.state = TaskState::Ready;
            task.deadline = None;
            self.schedule(now);
        }
        Ok(())
    }

    /// Promotes every sleeper whose deadline has passed by `now` to ready,
    /// in deadline order.
    pub(crate) fn promote_expired(&mut self, now: Ticks) {
        loop {
            let expired =
                kerncore::earliest_expired(&self.tasks, now.into(), |slot| {
                    slot.as_ref().and_then(|t| {
                        if t.state == TaskState::Sleeping {
                            t.deadline.map(u32::from)
                        } else {
                            None
                        }
                    })
                });
            let Some(index) = expired else { break };
            let Some(task) = self.tasks[index].as_mut() else {
                panic!(); // expiry scan returned an empty slot
            };
            task.state = TaskState::Ready;
            task.deadline = None;
        }
    }

    pub(crate) fn with_task_mut<R>(
        &mut self,
        id: TaskId,
        body: impl FnOnce(&mut Task) -> R,
    ) -> Result<R, OsError> {
        let index =
            find_by_id(&self.tasks, id).ok_or(OsError::NotStarted)?;
        match self.tasks[index].as_mut() {
            Some(task) => Ok(body(task)),
            None => Err(OsError::NotStarted),
        }
    }
}

/// Creates a task. See [`TaskDesc`] for the inputs; the new task starts
/// ready, and preempts the caller before this returns if it is more
/// important.
pub fn task_create(desc: TaskDesc) -> Result<TaskId, OsError> {
    with_kernel(|k| k.create_task(desc, time::now()))
}

/// Removes the named task. Fails with `InvalidParam` for the running task,
/// `Busy` for one that holds a lock or waits on a primitive, and
/// `NotStarted` for an identifier that names no living task.
pub fn task_remove(id: TaskId) -> Result<(), OsError> {
    with_kernel(|k| k.remove_task(id))
}

/// Iterates the task table in creation order: pass `None` to begin, then
/// the previously returned id. `None` marks the end of the iteration.
pub fn task_info_next(prev: Option<TaskId>) -> Option<TaskInfo> {
    with_kernel(|k| k.task_info_after(prev))
}

/// Number of task identifiers handed out since boot. Once this reaches
/// 256 the id space is spent and further creation fails with `NoMem`.
pub fn task_count() -> u16 {
    with_kernel(|k| k.next_task_id)
}

/// Wakes the named task if it is sleeping, regardless of its deadline.
pub fn task_wake(id: TaskId) -> Result<(), OsError> {
    with_kernel(|k| k.wake_task(id, time::now()))
}

/// Records that the named task is waiting on a synchronization primitive.
/// While any wait flag is set the task cannot be removed.
pub fn set_wait_flags(id: TaskId, flags: WaitFlags) -> Result<(), OsError> {
    with_kernel(|k| k.with_task_mut(id, |t| t.wait_flags |= flags))
}

/// Clears wait bookkeeping previously recorded with [`set_wait_flags`].
pub fn clear_wait_flags(id: TaskId, flags: WaitFlags) -> Result<(), OsError> {
    with_kernel(|k| k.with_task_mut(id, |t| t.wait_flags &= !flags))
}

/// Records that the named task acquired a lock. While the count is nonzero
/// the task cannot be removed.
pub fn lock_acquired(id: TaskId) -> Result<(), OsError> {
    with_kernel(|k| {
        k.with_task_mut(id, |t| {
            let count = t.lock_count.checked_add(1);
            uassert!(count.is_some());
            t.lock_count = count.unwrap_or(t.lock_count);
        })
    })
}

/// Records release of a lock counted by [`lock_acquired`].
pub fn lock_released(id: TaskId) -> Result<(), OsError> {
    with_kernel(|k| {
        k.with_task_mut(id, |t| {
            uassert!(t.lock_count > 0);
            t.lock_count -= 1;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{boot, desc, leak_stack};

    #[test]
    fn creation_assigns_increasing_ids() {
        let mut k = KernelState::new();
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let b = k.create_task(desc("b", 5), Ticks::ZERO).unwrap();
        assert!(a.0 < b.0, "ids must grow: {a:?} vs {b:?}");
        assert_eq!(k.next_task_id, 2);
    }

    #[test]
    fn creation_fills_the_stack_with_the_pattern() {
        let mut k = KernelState::new();
        let id = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let index = find_by_id(&k.tasks, id).unwrap();
        let task = k.tasks[index].as_ref().unwrap();
        // Everything below the initial frame must carry the sentinel.
        let frame_words = 16;
        let below = &task.stack[..task.stack.len() - frame_words];
        assert!(below.iter().all(|&w| w == STACK_PATTERN));
        assert_eq!(task.stack_used(), frame_words as u32);
    }

    #[test]
    fn exhausted_id_space_refuses_creation() {
        let mut k = KernelState::new();
        // Pretend 255 identifiers have already been issued over the
        // system's lifetime; one remains.
        k.next_task_id = u16::from(u8::MAX);
        let last = k.create_task(desc("last", 4), Ticks::ZERO).unwrap();
        assert_eq!(last, TaskId(u8::MAX));
        assert_eq!(
            k.create_task(desc("extra", 5), Ticks::ZERO),
            Err(OsError::NoMem),
        );
        // The table still has free slots; it's the id space that's spent,
        // and issued ids stay dead rather than wrapping onto newcomers.
        assert!(k.tasks.iter().any(Option::is_none));
        assert_eq!(k.next_task_id, 256);
    }

    #[test]
    #[should_panic]
    fn duplicate_priority_halts_debug_builds() {
        let mut k = KernelState::new();
        k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let _ = k.create_task(desc("b", 4), Ticks::ZERO);
    }

    #[test]
    fn empty_stack_is_rejected() {
        let mut k = KernelState::new();
        let mut d = desc("a", 4);
        d.stack = leak_stack(0);
        assert_eq!(
            k.create_task(d, Ticks::ZERO),
            Err(OsError::InvalidParam)
        );
    }

    #[test]
    fn removing_the_running_task_is_refused() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        // `a` outranks idle, so it is now running.
        assert_eq!(k.remove_task(a), Err(OsError::InvalidParam));
    }

    #[test]
    fn removing_an_unknown_id_reports_not_started() {
        let mut k = KernelState::new();
        assert_eq!(
            k.remove_task(TaskId(42)),
            Err(OsError::NotStarted)
        );
    }

    #[test]
    fn removal_is_refused_while_holding_a_lock() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        // A more important task takes over, leaving `a` ready but holding
        // a lock.
        k.create_task(desc("b", 2), Ticks::ZERO).unwrap();
        k.with_task_mut(a, |t| t.lock_count = 1).unwrap();
        assert_eq!(k.remove_task(a), Err(OsError::Busy));
        k.with_task_mut(a, |t| t.lock_count = 0).unwrap();
        assert_eq!(k.remove_task(a), Ok(()));
    }

    #[test]
    fn removal_is_refused_while_waiting_on_a_primitive() {
        let mut k = KernelState::new();
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        k.with_task_mut(a, |t| t.wait_flags = WaitFlags::MUTEX_WAIT)
            .unwrap();
        assert_eq!(k.remove_task(a), Err(OsError::Busy));
    }

    #[test]
    fn removed_tasks_vanish_completely() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let b = k.create_task(desc("b", 6), Ticks::ZERO).unwrap();
        // `a` runs; `b` is ready and removable.
        assert_eq!(k.remove_task(b), Ok(()));
        assert!(find_by_id(&k.tasks, b).is_none());
        // The scheduler can no longer pick it, and its id stays dead.
        k.schedule(Ticks::ZERO);
        assert_eq!(k.current, find_by_id(&k.tasks, a));
        assert_eq!(k.remove_task(b), Err(OsError::NotStarted));
    }

    #[test]
    fn iteration_walks_in_creation_order() {
        let mut k = KernelState::new();
        // Priorities deliberately out of id order.
        k.create_task(desc("a", 9), Ticks::ZERO).unwrap();
        k.create_task(desc("b", 3), Ticks::ZERO).unwrap();
        k.create_task(desc("c", 6), Ticks::ZERO).unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        while let Some(info) = k.task_info_after(cursor) {
            seen.push((info.id, info.name));
            cursor = Some(info.id);
        }
        let names: Vec<_> = seen.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn waking_a_sleeper_ignores_its_deadline() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        k.sleep_current(Some(1000), Ticks::ZERO).unwrap();
        // Idle took over; a long wake deadline is pending.
        let index = find_by_id(&k.tasks, a).unwrap();
        assert_eq!(
            k.tasks[index].as_ref().unwrap().state,
            TaskState::Sleeping
        );
        k.wake_task(a, Ticks(5)).unwrap();
        assert_eq!(k.current, Some(index), "woken task must preempt idle");
        // Waking it again is harmless.
        assert_eq!(k.wake_task(a, Ticks(6)), Ok(()));
    }
}
