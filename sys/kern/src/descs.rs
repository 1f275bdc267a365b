// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor types, used to hand resources to the kernel.

use abi::Priority;

/// Number of slots in the task table. Creating more than this many live
/// tasks fails with `NoMem`.
pub const MAX_TASKS: usize = 16;

/// A task entry function. Tasks do not return; on ARM the initial frame
/// traps if one tries.
pub type TaskEntry = fn(usize) -> !;

/// Everything the kernel needs to create a task.
///
/// The stack region is owned by the caller until creation, at which point
/// it becomes the task's for the task's whole life. The kernel never frees
/// it, and hands it to no one else until the task is removed.
pub struct TaskDesc {
    /// Human-readable name, surfaced through task iteration.
    pub name: &'static str,
    /// Entry function, entered on the first switch into the task.
    pub entry: TaskEntry,
    /// Opaque argument passed to `entry`.
    pub arg: usize,
    /// Scheduling priority; must not collide with any living task.
    pub priority: Priority,
    /// Interval in ticks at which the task promises to check in with the
    /// sanity watchdog, or `None` to opt out of supervision.
    pub sanity_itvl: Option<u32>,
    /// Stack region for the task. Must be non-empty; on ARM its top must be
    /// 8-byte aligned.
    pub stack: &'static mut [u32],
}
