// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and the rest of the
//! system.
//!
//! Everything in this crate is plain data. Middleware (sync primitives, the
//! sanity watchdog, shells) exchanges these records with the kernel without
//! linking against kernel internals.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Names a task for the lifetime of the system.
///
/// Task identifiers are handed out by the kernel from a monotonic counter at
/// creation time and are never reassigned to a different task, so a stale
/// identifier held across a task's removal fails lookups instead of aliasing
/// the slot's next occupant. The counter is never rewound: once all 256
/// identifiers have been issued, task creation fails rather than reuse one.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct TaskId(pub u8);

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth. Unlike most kernels, priorities
/// here are *unique*: no two living tasks may share one.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority reserved for the idle task, least important of all. Creating
    /// an application task at this priority will collide with idle and fail.
    pub const IDLE: Self = Self(0xFF);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Scheduling state of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Eligible to run, waiting for the processor.
    Ready,
    /// Currently executing. Exactly one task is in this state once the
    /// scheduler has started.
    Running,
    /// Blocked until its wake deadline passes or something wakes it.
    Sleeping,
    /// Removed from the system. A removed task's identifier never becomes
    /// valid again.
    Removed,
}

bitflags::bitflags! {
    /// Reasons a task may be blocked on a synchronization primitive. These
    /// are maintained by the (out-of-kernel) primitives through the kernel's
    /// bookkeeping entry points; the kernel itself only consults them to
    /// refuse removal of a waiting task.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct WaitFlags: u8 {
        const SEM_WAIT = 1 << 0;
        const MUTEX_WAIT = 1 << 1;
        const EVQ_WAIT = 1 << 2;
    }
}

/// Errors returned by kernel operations.
///
/// The kernel reports caller mistakes through these codes and does not
/// otherwise fail at runtime; internal invariant violations halt the system
/// instead of unwinding into the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OsError {
    /// The caller supplied nonsensical input, such as removing the running
    /// task or creating a task at a priority already in use.
    InvalidParam,
    /// The operation requires an initialized object that wasn't. Also
    /// returned for task identifiers that name no living task; the kernel
    /// does not distinguish "never created" from "already removed", so
    /// callers must track task lifetime themselves.
    NotStarted,
    /// Preconditions unmet: the task holds a lock or is waiting on a
    /// primitive.
    Busy,
    /// The named record is not registered.
    NotFound,
    /// A numeric conversion exceeded 32 bits.
    Overflow,
    /// A fixed-capacity kernel table is full.
    NoMem,
}

/// Wall-clock time as seconds and microseconds.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i32,
}

impl TimeVal {
    pub const MICROS_PER_SEC: i64 = 1_000_000;

    /// Returns `self` advanced by the given offset, normalizing `usec` into
    /// `0..1_000_000`.
    pub fn offset_by(self, sec: i64, usec: i64) -> Self {
        let mut total_usec = i64::from(self.usec) + usec;
        let mut sec = self.sec + sec + total_usec / Self::MICROS_PER_SEC;
        total_usec %= Self::MICROS_PER_SEC;
        if total_usec < 0 {
            total_usec += Self::MICROS_PER_SEC;
            sec -= 1;
        }
        Self {
            sec,
            usec: total_usec as i32,
        }
    }

    /// Total microseconds since the epoch of this value. Saturates rather
    /// than wrapping on (absurd) overflow.
    pub fn as_micros(self) -> i64 {
        self.sec
            .saturating_mul(Self::MICROS_PER_SEC)
            .saturating_add(i64::from(self.usec))
    }
}

/// Time zone record: offset west of UTC and daylight-saving disposition.
/// Stored verbatim by the kernel and returned to whoever asks; the kernel
/// does no time zone arithmetic of its own.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeZone {
    pub minuteswest: i16,
    pub dst: i16,
}

/// Describes a wall-clock update, delivered to time change listeners.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeChangeInfo {
    /// UTC base before the update.
    pub prev_utc: TimeVal,
    /// UTC base after the update.
    pub cur_utc: TimeVal,
    /// Time zone before the update.
    pub prev_tz: TimeZone,
    /// Time zone after the update.
    pub cur_tz: TimeZone,
    /// True iff the kernel had never held a valid wall clock before this
    /// update.
    pub newly_synced: bool,
}

/// Snapshot of one task, produced by task iteration.
#[derive(Copy, Clone, Debug)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub priority: Priority,
    pub state: TaskState,
    /// Total stack size, in 32-bit words.
    pub stack_size: u32,
    /// High-water mark of stack consumption, in 32-bit words.
    pub stack_used: u32,
    /// Number of times this task has been switched onto the processor.
    pub context_switches: u32,
    /// Accumulated ticks spent running.
    pub run_ticks: u32,
    /// Tick of the task's last sanity check-in, if it is registered with the
    /// sanity watchdog.
    pub last_checkin: Option<u32>,
    /// Tick by which the task must next check in, if registered.
    pub next_checkin: Option<u32>,
}
