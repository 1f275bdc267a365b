// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler core.
//!
//! The scheduling rule is small: whenever something may have changed the
//! set of ready tasks -- a tick, a wake, a sleep, a yield, a creation --
//! compare the most important ready task against the current one and switch
//! if it wins or if the current task stopped running. Priorities are unique,
//! so there are no ties to break.
//!
//! The actual transfer of the processor is delegated to
//! [`crate::arch::switch_context`]; everything here is bookkeeping, which is
//! what makes the state machine testable on the host.

use abi::{OsError, TaskState};

use crate::arch;
use crate::startup::{with_kernel, KernelState};
use crate::task;
use crate::time::{self, Ticks};
use crate::{profiling, uassert};

impl KernelState {
    /// Reschedule decision point. Called after tick processing, after a
    /// task becomes ready, after the running task blocks, and on voluntary
    /// yield.
    pub(crate) fn schedule(&mut self, now: Ticks) {
        if !self.started {
            return;
        }
        let previous = self.current.unwrap_or(0);
        let Some(candidate) = task::select(&self.tasks, previous) else {
            // Nothing else is ready. That's fine as long as someone is
            // still running; idle never blocks, so this holds.
            let running = self.current.and_then(|i| self.tasks[i].as_ref());
            uassert!(
                running.is_some_and(|t| t.state == TaskState::Running)
            );
            return;
        };

        let switch = match self.current.and_then(|i| self.tasks[i].as_ref())
        {
            Some(current) if current.state == TaskState::Running => {
                let cand = self.tasks[candidate].as_ref();
                cand.is_some_and(|c| {
                    c.priority.is_more_important_than(current.priority)
                })
            }
            // The current task stopped running (slept) or there is no
            // current task yet: someone else must take over.
            _ => true,
        };

        if switch {
            self.switch_to(candidate, now);
        }
    }

    /// Hands the processor to the task at `next`, demoting the outgoing
    /// task to ready if it was still running and keeping the run-time
    /// statistics.
    pub(crate) fn switch_to(&mut self, next: usize, now: Ticks) {
        let from = match self.current {
            Some(index) => {
                let Some(t) = self.tasks[index].as_mut() else {
                    panic!(); // current names an empty slot
                };
                if t.state == TaskState::Running {
                    t.state = TaskState::Ready;
                }
                t.run_ticks =
                    t.run_ticks.wrapping_add(now.since(self.last_switch));
                Some(&mut t.save as *mut arch::SavedState)
            }
            None => None,
        };
        self.last_switch = now;

        let Some(incoming) = self.tasks[next].as_mut() else {
            panic!(); // scheduler chose an empty slot
        };
        incoming.state = TaskState::Running;
        incoming.context_switches =
            incoming.context_switches.wrapping_add(1);
        incoming.deadline = None;
        let to = &mut incoming.save as *mut arch::SavedState;

        self.current = Some(next);
        profiling::event_context_switch(next);

        if let Some(from) = from {
            // Safety: both pointers refer to live slots in this kernel's
            // task table, and this is the only scheduling decision taken in
            // this kernel entry.
            unsafe {
                arch::switch_context(from, to);
            }
        }
    }

    /// Puts the current task to sleep for `duration` ticks, or until
    /// explicitly woken when `duration` is `None`. A zero duration is a
    /// no-op.
    pub(crate) fn sleep_current(
        &mut self,
        duration: Option<u32>,
        now: Ticks,
    ) -> Result<(), OsError> {
        if duration == Some(0) {
            return Ok(());
        }
        let index = self.current.ok_or(OsError::NotStarted)?;
        let Some(task) = self.tasks[index].as_mut() else {
            panic!(); // current names an empty slot
        };
        uassert!(task.state == TaskState::Running);
        task.state = TaskState::Sleeping;
        task.deadline = duration.map(|d| now + d);
        self.schedule(now);
        Ok(())
    }
}

/// Voluntarily offers the processor to more important ready tasks. Since
/// priorities are unique and a more important task preempts as soon as it
/// becomes ready, this is usually a no-op; it exists for callers that have
/// been told to be polite at particular points.
pub fn yield_now() {
    with_kernel(|k| k.schedule(time::now()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::startup::KernelState;
    use crate::task::find_by_id;
    use crate::test_support::{boot, check_invariants, desc};
    use abi::{Priority, TaskId};

    fn state_of(k: &KernelState, id: TaskId) -> TaskState {
        let index = find_by_id(&k.tasks, id).unwrap();
        k.tasks[index].as_ref().unwrap().state
    }

    fn current_priority(k: &KernelState) -> Priority {
        let index = k.current.unwrap();
        k.tasks[index].as_ref().unwrap().priority
    }

    #[test]
    fn startup_runs_the_most_important_task() {
        let mut k = KernelState::new();
        k.create_task(desc("lo", 9), Ticks::ZERO).unwrap();
        k.create_task(desc("hi", 1), Ticks::ZERO).unwrap();
        boot(&mut k);
        assert_eq!(current_priority(&k), Priority(1));
        check_invariants(&k, Ticks::ZERO);
    }

    #[test]
    fn ready_newcomer_preempts_before_create_returns() {
        let mut k = KernelState::new();
        boot(&mut k);
        let hi = k.create_task(desc("hi", 3), Ticks::ZERO).unwrap();
        assert_eq!(state_of(&k, hi), TaskState::Running);
        // A less important newcomer does not take over.
        let lo = k.create_task(desc("lo", 7), Ticks::ZERO).unwrap();
        assert_eq!(state_of(&k, lo), TaskState::Ready);
        assert_eq!(state_of(&k, hi), TaskState::Running);
        check_invariants(&k, Ticks::ZERO);
    }

    #[test]
    fn sleepers_resume_in_priority_order() {
        // Three tasks at priorities 1, 5 and 9 all sleep 10 ticks at tick
        // 0; at tick 10 they must run again most-important-first.
        let mut k = KernelState::new();
        let t1 = k.create_task(desc("p1", 1), Ticks::ZERO).unwrap();
        let t5 = k.create_task(desc("p5", 5), Ticks::ZERO).unwrap();
        let t9 = k.create_task(desc("p9", 9), Ticks::ZERO).unwrap();
        boot(&mut k);

        // Each task runs and goes to sleep, most important first.
        for _ in 0..3 {
            k.sleep_current(Some(10), Ticks::ZERO).unwrap();
        }
        for id in [t1, t5, t9] {
            assert_eq!(state_of(&k, id), TaskState::Sleeping);
        }
        assert_eq!(current_priority(&k), Priority::IDLE);
        check_invariants(&k, Ticks::ZERO);

        // Nothing stirs before the deadline.
        k.process_tick(Ticks(8), Ticks(9));
        assert_eq!(current_priority(&k), Priority::IDLE);

        // At the deadline all three wake; execution order follows priority.
        k.process_tick(Ticks(9), Ticks(10));
        check_invariants(&k, Ticks(10));
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(current_priority(&k));
            k.sleep_current(Some(100), Ticks(10)).unwrap();
        }
        assert_eq!(order, [Priority(1), Priority(5), Priority(9)]);
    }

    #[test]
    fn zero_delay_is_a_complete_no_op() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let index = find_by_id(&k.tasks, a).unwrap();
        let switches_before =
            k.tasks[index].as_ref().unwrap().context_switches;

        k.sleep_current(Some(0), Ticks::ZERO).unwrap();

        assert_eq!(k.current, Some(index));
        assert_eq!(state_of(&k, a), TaskState::Running);
        assert_eq!(
            k.tasks[index].as_ref().unwrap().context_switches,
            switches_before,
            "delay(0) must not context switch",
        );
    }

    #[test]
    fn forever_sleepers_wait_for_an_explicit_wake() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        k.sleep_current(None, Ticks::ZERO).unwrap();
        assert_eq!(state_of(&k, a), TaskState::Sleeping);

        // No amount of tick processing wakes it...
        k.process_tick(Ticks(0), Ticks(100_000));
        assert_eq!(state_of(&k, a), TaskState::Sleeping);

        // ...but a wake does, immediately.
        k.wake_task(a, Ticks(100_000)).unwrap();
        assert_eq!(state_of(&k, a), TaskState::Running);
        check_invariants(&k, Ticks(100_000));
    }

    #[test]
    fn yield_surrenders_only_to_more_important_tasks() {
        let mut k = KernelState::new();
        boot(&mut k);
        let mid = k.create_task(desc("mid", 5), Ticks::ZERO).unwrap();
        // Sneak a more important task into ready state without letting the
        // creation path reschedule, as if it became ready inside a
        // critical section.
        k.started = false;
        let hi = k.create_task(desc("hi", 2), Ticks::ZERO).unwrap();
        let lo = k.create_task(desc("lo", 8), Ticks::ZERO).unwrap();
        k.started = true;

        assert_eq!(state_of(&k, mid), TaskState::Running);
        k.schedule(Ticks::ZERO); // yield
        assert_eq!(state_of(&k, hi), TaskState::Running);
        assert_eq!(state_of(&k, mid), TaskState::Ready);

        // With only less important tasks ready, yielding changes nothing.
        k.schedule(Ticks::ZERO);
        assert_eq!(state_of(&k, hi), TaskState::Running);
        assert_eq!(state_of(&k, lo), TaskState::Ready);
        check_invariants(&k, Ticks::ZERO);
    }

    #[test]
    fn run_time_lands_on_the_outgoing_task() {
        let mut k = KernelState::new();
        boot(&mut k);
        let a = k.create_task(desc("a", 4), Ticks::ZERO).unwrap();
        let index = find_by_id(&k.tasks, a).unwrap();

        // `a` runs from tick 0 to tick 25, then sleeps.
        k.sleep_current(Some(10), Ticks(25)).unwrap();
        assert_eq!(k.tasks[index].as_ref().unwrap().run_ticks, 25);
        // It is charged nothing while asleep.
        k.process_tick(Ticks(34), Ticks(35));
        assert_eq!(k.tasks[index].as_ref().unwrap().run_ticks, 25);
        assert_eq!(state_of(&k, a), TaskState::Running);
    }
}
