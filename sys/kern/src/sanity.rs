// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seam to the sanity watchdog.
//!
//! The watchdog itself is middleware, outside the kernel. The kernel's
//! involvement is limited to keeping a check-in record per task, telling
//! the watchdog when supervised tasks come and go, and letting tasks check
//! in. What the watchdog does about overdue tasks is its business.

use abi::{OsError, TaskId};

use crate::startup::with_kernel;
use crate::time::{self, Ticks};
use crate::uassert;

/// Per-task sanity record stored by the kernel.
pub struct SanityCheck {
    /// Tick of the task's most recent check-in (creation counts as one).
    pub(crate) checkin_last: Ticks,
    /// How often, in ticks, the task has promised to check in. `None`
    /// means the task is not supervised.
    pub(crate) checkin_itvl: Option<u32>,
}

/// Implemented by the external sanity watchdog.
///
/// Both operations are invoked with the kernel critical section held, as
/// part of task creation and removal: implementations must be brief and
/// must not call back into the kernel. Install the registry before
/// creating any task that requests supervision.
pub trait SanityRegistry: Sync {
    /// A supervised task has been created. An `Err` here aborts the task's
    /// creation and is returned to the creator.
    fn register(&self, task: TaskId, interval: u32) -> Result<(), OsError>;

    /// A supervised task has been removed.
    fn deregister(&self, task: TaskId);
}

/// Installs the sanity watchdog. May be called once, before supervised
/// tasks are created.
pub fn set_sanity_registry(registry: &'static dyn SanityRegistry) {
    with_kernel(|k| {
        uassert!(k.sanity_registry.is_none());
        k.sanity_registry = Some(registry);
    })
}

/// Records a check-in for the named task, resetting its deadline with the
/// watchdog to one interval from now.
pub fn task_checkin(id: TaskId) -> Result<(), OsError> {
    with_kernel(|k| {
        k.with_task_mut(id, |t| t.sanity.checkin_last = time::now())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::startup::KernelState;
    use crate::task::find_by_id;
    use crate::test_support::desc;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recording {
        registered: AtomicU32,
        deregistered: AtomicU32,
        refuse: core::sync::atomic::AtomicBool,
    }

    impl SanityRegistry for Recording {
        fn register(&self, _task: TaskId, _itvl: u32) -> Result<(), OsError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(OsError::NoMem);
            }
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deregister(&self, _task: TaskId) {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn supervised_tasks_register_and_deregister() {
        static REGISTRY: Recording = Recording {
            registered: AtomicU32::new(0),
            deregistered: AtomicU32::new(0),
            refuse: core::sync::atomic::AtomicBool::new(false),
        };
        let mut k = KernelState::new();
        k.sanity_registry = Some(&REGISTRY);

        let mut supervised = desc("sup", 4);
        supervised.sanity_itvl = Some(500);
        let sup = k.create_task(supervised, Ticks(7)).unwrap();
        // Unsupervised tasks never touch the registry.
        k.create_task(desc("free", 5), Ticks(7)).unwrap();
        assert_eq!(REGISTRY.registered.load(Ordering::SeqCst), 1);

        // The record is visible through iteration.
        let index = find_by_id(&k.tasks, sup).unwrap();
        let task = k.tasks[index].as_ref().unwrap();
        assert_eq!(task.sanity.checkin_last, Ticks(7));
        assert_eq!(task.sanity.checkin_itvl, Some(500));

        k.remove_task(sup).unwrap();
        assert_eq!(REGISTRY.deregistered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_refusal_aborts_creation() {
        static REGISTRY: Recording = Recording {
            registered: AtomicU32::new(0),
            deregistered: AtomicU32::new(0),
            refuse: core::sync::atomic::AtomicBool::new(true),
        };
        let mut k = KernelState::new();
        k.sanity_registry = Some(&REGISTRY);

        let mut supervised = desc("sup", 4);
        supervised.sanity_itvl = Some(500);
        assert_eq!(
            k.create_task(supervised, Ticks::ZERO),
            Err(OsError::NoMem)
        );
        // Nothing was left behind.
        assert!(k.tasks.iter().all(Option::is_none));
        assert_eq!(k.next_task_id, 0);
    }

    #[test]
    fn checkin_schedule_shows_up_in_task_info() {
        let mut k = KernelState::new();
        let mut supervised = desc("sup", 4);
        supervised.sanity_itvl = Some(500);
        let sup = k.create_task(supervised, Ticks(100)).unwrap();

        let info = k.task_info_after(None).unwrap();
        assert_eq!(info.id, sup);
        assert_eq!(info.last_checkin, Some(100));
        assert_eq!(info.next_checkin, Some(600));

        // A check-in pushes the deadline out.
        k.with_task_mut(sup, |t| t.sanity.checkin_last = Ticks(450))
            .unwrap();
        let info = k.task_info_after(None).unwrap();
        assert_eq!(info.next_checkin, Some(950));
    }
}
