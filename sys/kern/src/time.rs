// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time: the tick counter, time-of-day derivation, and time change
//! listeners.
//!
//! The fundamental unit is the *tick*, a 32-bit counter advanced from the
//! timer ISR that wraps modulo 2^32. Uptime and wall-clock time are derived
//! lazily from a cached base plus the tick delta since that base was taken;
//! the base is refreshed whenever the counter's sign bit flips so the delta
//! never spans more than 2^31 ticks, which keeps the wrapping subtraction
//! unambiguous.

use core::sync::atomic::{AtomicU32, Ordering};

use abi::{OsError, TimeChangeInfo, TimeVal, TimeZone};

use crate::startup::{with_kernel, KernelState};
use crate::{profiling, uassert};

/// Tick rate of the kernel timer. 1 kHz makes tick/millisecond conversion
/// the identity, which most boards use; other rates must divide evenly into
/// a second's worth of microseconds.
pub const TICKS_PER_SEC: u32 = 1000;

const USEC_PER_TICK: u32 = 1_000_000 / TICKS_PER_SEC;

const _: () = assert!(TICKS_PER_SEC > 0);
const _: () = assert!(
    1_000_000 % TICKS_PER_SEC == 0,
    "tick period must be a whole number of microseconds"
);

/// A point in kernel time, measured in ticks since boot (mod 2^32).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Ticks(pub(crate) u32);

impl Ticks {
    pub const ZERO: Self = Self(0);

    /// Ticks elapsed from `earlier` to `self`, assuming they are within
    /// 2^31 ticks of one another.
    pub fn since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Wrapping-aware ordering; see [`kerncore::tick_before`].
    pub fn is_before(self, other: Self) -> bool {
        kerncore::tick_before(self.0, other.0)
    }

    /// Wrapping-aware ordering; see [`kerncore::tick_at_or_before`].
    pub fn is_at_or_before(self, other: Self) -> bool {
        kerncore::tick_at_or_before(self.0, other.0)
    }

    /// Tests whether the counter's sign bit changed between `prev` and
    /// `next`, i.e. whether it crossed 0 or 2^31. This is the cue to
    /// refresh the time-of-day base.
    pub fn sign_flipped(prev: Self, next: Self) -> bool {
        (prev.0 ^ next.0) >> 31 != 0
    }
}

impl From<u32> for Ticks {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<Ticks> for u32 {
    fn from(v: Ticks) -> Self {
        v.0
    }
}

impl core::ops::Add<u32> for Ticks {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

/// Kernel global for tracking the current time in ticks.
///
/// Mutated only inside the kernel critical section; read freely (it's a
/// single 32-bit atomic, so task-context readers always see a torn-free,
/// monotonically advancing value).
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Reads the tick counter.
pub fn now() -> Ticks {
    Ticks(TICKS.load(Ordering::Relaxed))
}

/// Converts `base` advanced by `delta` ticks into wall-clock form.
fn add_delta(base: TimeVal, delta: u32) -> TimeVal {
    base.offset_by(
        i64::from(delta / TICKS_PER_SEC),
        i64::from(delta % TICKS_PER_SEC) * i64::from(USEC_PER_TICK),
    )
}

/// The cached base that uptime and wall-clock time are derived from.
///
/// Invariant: whenever time is derived, `now - ostime_ref` is less than
/// 2^31 ticks. `rebase` maintains this by advancing the bases across each
/// sign-bit flip of the counter.
#[derive(Debug)]
pub(crate) struct TodBase {
    /// Tick at which the other fields were captured.
    pub(crate) ostime_ref: Ticks,
    /// Time since boot as of `ostime_ref`.
    pub(crate) uptime: TimeVal,
    /// Wall-clock time as of `ostime_ref`. All zeros until someone sets the
    /// clock; `sec > 0` is the "clock has been set" signal.
    pub(crate) utctime: TimeVal,
    pub(crate) timezone: TimeZone,
}

impl TodBase {
    pub(crate) const fn new() -> Self {
        Self {
            ostime_ref: Ticks::ZERO,
            uptime: TimeVal { sec: 0, usec: 0 },
            utctime: TimeVal { sec: 0, usec: 0 },
            timezone: TimeZone {
                minuteswest: 0,
                dst: 0,
            },
        }
    }

    /// Folds the ticks accumulated since `ostime_ref` into the bases and
    /// restarts the delta from `now`.
    pub(crate) fn rebase(&mut self, now: Ticks) {
        let delta = now.since(self.ostime_ref);
        self.uptime = add_delta(self.uptime, delta);
        self.utctime = add_delta(self.utctime, delta);
        self.ostime_ref = now;
    }

    pub(crate) fn uptime_at(&self, now: Ticks) -> TimeVal {
        add_delta(self.uptime, now.since(self.ostime_ref))
    }

    pub(crate) fn utc_at(&self, now: Ticks) -> TimeVal {
        add_delta(self.utctime, now.since(self.ostime_ref))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.utctime.sec > 0
    }

    /// Applies a wall-clock and/or time zone update and describes it for
    /// listeners. At least one of `tv`, `tz` must be provided.
    ///
    /// Setting the clock does not disturb uptime: the accumulated delta is
    /// folded into the uptime base before the wall clock is overwritten.
    pub(crate) fn set(
        &mut self,
        now: Ticks,
        tv: Option<&TimeVal>,
        tz: Option<&TimeZone>,
    ) -> Result<TimeChangeInfo, OsError> {
        if tv.is_none() && tz.is_none() {
            return Err(OsError::InvalidParam);
        }

        let info = TimeChangeInfo {
            prev_utc: self.utctime,
            cur_utc: tv.copied().unwrap_or(self.utctime),
            prev_tz: self.timezone,
            cur_tz: tz.copied().unwrap_or(self.timezone),
            newly_synced: !self.is_set(),
        };

        if let Some(tv) = tv {
            let delta = now.since(self.ostime_ref);
            self.uptime = add_delta(self.uptime, delta);
            self.utctime = *tv;
            self.ostime_ref = now;
        }
        if let Some(tz) = tz {
            self.timezone = *tz;
        }

        Ok(info)
    }
}

/// Implemented by records that want to hear about wall-clock updates.
///
/// Listener records are externally owned; the kernel stores only the
/// reference. Callbacks run in the context of the `settimeofday` caller
/// with interrupts enabled, and must not themselves set the time.
pub trait TimeChangeListener: Sync {
    fn time_changed(&self, info: &TimeChangeInfo);
}

/// Number of slots in the listener table.
const MAX_TIME_LISTENERS: usize = 8;

type ListenerSlot = Option<&'static dyn TimeChangeListener>;

/// Registered time change listeners, in registration order.
pub(crate) struct Listeners {
    slots: [ListenerSlot; MAX_TIME_LISTENERS],
}

fn same_listener(
    a: &'static dyn TimeChangeListener,
    b: &'static dyn TimeChangeListener,
) -> bool {
    // Identity, not equality: compare data pointers, ignoring vtables.
    core::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}

impl Listeners {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; MAX_TIME_LISTENERS],
        }
    }

    /// Appends `listener`. Registering the same record twice is a
    /// programming error and halts.
    pub(crate) fn insert(
        &mut self,
        listener: &'static dyn TimeChangeListener,
    ) -> Result<(), OsError> {
        uassert!(!self
            .slots
            .iter()
            .flatten()
            .any(|l| same_listener(*l, listener)));
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(OsError::NoMem)?;
        *slot = Some(listener);
        Ok(())
    }

    /// Removes `listener`, compacting the table so registration order is
    /// preserved for the survivors.
    pub(crate) fn remove(
        &mut self,
        listener: &'static dyn TimeChangeListener,
    ) -> Result<(), OsError> {
        let pos = self
            .slots
            .iter()
            .position(|s| s.is_some_and(|l| same_listener(l, listener)))
            .ok_or(OsError::NotFound)?;
        self.slots[pos..].rotate_left(1);
        self.slots[MAX_TIME_LISTENERS - 1] = None;
        Ok(())
    }

    /// Copies out the table so notification can happen outside the critical
    /// section.
    pub(crate) fn snapshot(&self) -> [ListenerSlot; MAX_TIME_LISTENERS] {
        self.slots
    }
}

fn notify_listeners(
    snapshot: &[ListenerSlot; MAX_TIME_LISTENERS],
    info: &TimeChangeInfo,
) {
    for listener in snapshot.iter().flatten() {
        listener.time_changed(info);
    }
}

impl KernelState {
    /// Tick-side time processing: rebases the time-of-day record across
    /// sign-bit flips, promotes expired sleepers, and reconsiders the
    /// running task. Runs only once the scheduler has started.
    pub(crate) fn process_tick(&mut self, prev: Ticks, now: Ticks) {
        if Ticks::sign_flipped(prev, now) {
            self.tod.rebase(now);
        }
        self.promote_expired(now);
        self.schedule(now);
    }
}

/// Advances the tick counter by `n` on behalf of the timer ISR.
///
/// Advancing by zero is a no-op: no state changes and no reschedule. Before
/// the scheduler starts, only the counter moves.
pub fn time_advance(n: u32) {
    if n == 0 {
        return;
    }
    profiling::event_timer_isr_enter();
    with_kernel(|k| {
        let prev = Ticks(TICKS.load(Ordering::Relaxed));
        let now = prev + n;
        TICKS.store(now.0, Ordering::Relaxed);
        if k.started {
            k.process_tick(prev, now);
        }
    });
    profiling::event_timer_isr_exit();
}

/// Puts the calling task to sleep for at least `ticks` ticks. A zero
/// duration returns immediately without a context switch.
///
/// Calling this before the scheduler has started is a programming error and
/// halts.
pub fn time_delay(ticks: u32) {
    if ticks == 0 {
        return;
    }
    let r = with_kernel(|k| k.sleep_current(Some(ticks), now()));
    uassert!(r.is_ok());
}

/// Puts the calling task to sleep until something wakes it. Used by sync
/// primitives built on top of the kernel.
pub fn sleep_forever() {
    let r = with_kernel(|k| k.sleep_current(None, now()));
    uassert!(r.is_ok());
}

/// Sets the wall-clock time and/or time zone, then notifies listeners in
/// registration order. At least one of `tv`, `tz` must be provided.
pub fn settimeofday(
    tv: Option<&TimeVal>,
    tz: Option<&TimeZone>,
) -> Result<(), OsError> {
    let (info, snapshot) = with_kernel(|k| {
        let info = k.tod.set(now(), tv, tz)?;
        Ok::<_, OsError>((info, k.listeners.snapshot()))
    })?;
    notify_listeners(&snapshot, &info);
    Ok(())
}

/// Returns the current wall-clock time and time zone. Until the clock is
/// first set, the "wall clock" is just time since boot.
pub fn gettimeofday() -> (TimeVal, TimeZone) {
    with_kernel(|k| (k.tod.utc_at(now()), k.tod.timezone))
}

/// Returns time since boot as seconds and microseconds.
pub fn get_uptime() -> TimeVal {
    // Snapshot the base inside the critical section; do the derivation
    // arithmetic outside it.
    let (base, reference) = with_kernel(|k| (k.tod.uptime, k.tod.ostime_ref));
    add_delta(base, now().since(reference))
}

/// Returns time since boot in microseconds.
pub fn get_uptime_usec() -> i64 {
    get_uptime().as_micros()
}

/// Reports whether anyone has ever set the wall clock.
pub fn time_is_set() -> bool {
    with_kernel(|k| k.tod.is_set())
}

/// Converts milliseconds to ticks at the kernel tick rate.
pub fn ms_to_ticks(ms: u32) -> Result<u32, OsError> {
    kerncore::ms_to_ticks(ms, TICKS_PER_SEC).ok_or(OsError::Overflow)
}

/// Converts ticks at the kernel tick rate to milliseconds.
pub fn ticks_to_ms(ticks: u32) -> Result<u32, OsError> {
    kerncore::ticks_to_ms(ticks, TICKS_PER_SEC).ok_or(OsError::Overflow)
}

/// Registers a listener for wall-clock updates. Listener identity is the
/// record's address; registering the same record twice halts.
pub fn time_change_listen(
    listener: &'static dyn TimeChangeListener,
) -> Result<(), OsError> {
    with_kernel(|k| k.listeners.insert(listener))
}

/// Unregisters a listener. Removing a record that was never registered
/// reports `NotFound`.
pub fn time_change_remove(
    listener: &'static dyn TimeChangeListener,
) -> Result<(), OsError> {
    with_kernel(|k| k.listeners.remove(listener))
}
