// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by the kernel's host tests.
//!
//! Tests drive private [`KernelState`] instances against the fake
//! architecture layer, so they can run in parallel without disturbing the
//! real kernel state.

use abi::{Priority, TaskState};

use crate::descs::TaskDesc;
use crate::startup::KernelState;
use crate::time::Ticks;

/// Produces a `'static` stack region the way board code would, minus the
/// linker script.
pub(crate) fn leak_stack(words: usize) -> &'static mut [u32] {
    Box::leak(vec![0u32; words].into_boxed_slice())
}

/// Entry point for tasks that are never actually entered on the host.
fn spin(_arg: usize) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// A plain task descriptor with a fresh stack.
pub(crate) fn desc(name: &'static str, priority: u8) -> TaskDesc {
    TaskDesc {
        name,
        entry: spin,
        arg: 0,
        priority: Priority(priority),
        sanity_itvl: None,
        stack: leak_stack(64),
    }
}

/// Installs the idle task and starts the scheduler, the way `start_kernel`
/// would.
pub(crate) fn boot(k: &mut KernelState) {
    k.create_task(
        TaskDesc {
            name: "idle",
            entry: spin,
            arg: 0,
            priority: Priority::IDLE,
            sanity_itvl: None,
            stack: leak_stack(64),
        },
        Ticks::ZERO,
    )
    .unwrap();
    k.begin_scheduling(Ticks::ZERO);
}

/// Asserts the properties that must hold at every reschedule point.
pub(crate) fn check_invariants(k: &KernelState, now: Ticks) {
    let mut priorities = Vec::new();
    let mut running = 0;
    for task in k.tasks.iter().flatten() {
        assert!(
            !priorities.contains(&task.priority),
            "two tasks share priority {:?}",
            task.priority,
        );
        priorities.push(task.priority);

        match task.state {
            TaskState::Running => running += 1,
            TaskState::Sleeping => {
                if let Some(deadline) = task.deadline {
                    assert!(
                        now.is_at_or_before(deadline),
                        "sleeper {:?} missed its wake-up",
                        task.id,
                    );
                }
            }
            TaskState::Ready => {
                assert!(
                    task.deadline.is_none(),
                    "ready task {:?} still has a deadline",
                    task.id,
                );
            }
            TaskState::Removed => {
                panic!("removed task {:?} still in the table", task.id)
            }
        }
    }

    if k.started {
        assert_eq!(running, 1, "exactly one task must be running");
        let current = k.current.expect("started kernel must have a current");
        assert_eq!(
            k.tasks[current].as_ref().map(|t| t.state),
            Some(TaskState::Running),
            "current index must point at the running task",
        );
    } else {
        assert_eq!(running, 0, "nothing may run before the scheduler starts");
    }
}
