// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel online profiling support.
//!
//! This is intended to help measure the timing of kernel events -- tick
//! processing, context switches -- as an aid to debugging or optimization
//! work.
//!
//! Because the kernel is SoC-independent, this module does not assume any
//! particular way of getting profiling information out of the kernel.
//! Instead, any target that wants to use profiling needs to populate an
//! `EventsTable` struct and provide it to `configure_events_table` from its
//! startup routine. A typical implementation sets and clears GPIOs that an
//! external logic analyzer watches; keep the handlers fast, and beware
//! probe effect.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Hooks that must be provided by the board setup code if it wants to
/// enable kernel profiling.
///
/// If you provide an `EventsTable`, you have to provide every hook; stub
/// unwanted ones with `|| ()`. This eliminates a null check per
/// *implemented* event, and we expect those to outnumber the stubs.
pub struct EventsTable {
    /// Called on entry to the kernel's timer ISR.
    pub timer_isr_enter: fn(),
    /// Called on exit from the kernel's timer ISR.
    pub timer_isr_exit: fn(),
    /// Called on entry to a non-kernel interrupt service routine that wants
    /// to be counted; the kernel itself never fires this.
    pub isr_enter: fn(),
    /// Counterpart of `isr_enter`.
    pub isr_exit: fn(),
    /// Called whenever the current task changes, with the index of the
    /// incoming task.
    pub context_switch: fn(usize),
}

/// Supplies the kernel with an events table.
///
/// You can call this more than once if you need to, though that seems odd
/// at first glance.
pub fn configure_events_table(table: &'static EventsTable) {
    EVENTS_TABLE.store(table as *const _ as *mut _, Ordering::Relaxed);
}

/// Internal pointer written by `configure_events_table`. If this is null,
/// no event table has been provided.
///
/// All accesses use `Relaxed` ordering, because we expect one write at
/// startup and then many reads, and memory barriers have non-zero cost.
static EVENTS_TABLE: AtomicPtr<EventsTable> =
    AtomicPtr::new(core::ptr::null_mut());

/// Grabs a reference to the configured table, if any.
fn table() -> Option<&'static EventsTable> {
    let p = EVENTS_TABLE.load(Ordering::Relaxed);
    if p.is_null() {
        None
    } else {
        // We only write this pointer from a valid `&'static`, and we're
        // handing out a shared reference, so this should be ok...
        unsafe { Some(&*p) }
    }
}

pub(crate) fn event_timer_isr_enter() {
    if let Some(t) = table() {
        (t.timer_isr_enter)()
    }
}

pub(crate) fn event_timer_isr_exit() {
    if let Some(t) = table() {
        (t.timer_isr_exit)()
    }
}

/// Signals entry to an ISR. This is `pub` for boards that would like their
/// own ISRs included in ISR statistics.
pub fn event_isr_enter() {
    if let Some(t) = table() {
        (t.isr_enter)()
    }
}

/// Signals exit from an ISR. This is `pub` for boards that would like their
/// own ISRs included in ISR statistics.
pub fn event_isr_exit() {
    if let Some(t) = table() {
        (t.isr_exit)()
    }
}

pub(crate) fn event_context_switch(index: usize) {
    if let Some(t) = table() {
        (t.context_switch)(index)
    }
}
