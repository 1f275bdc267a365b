// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure kernel algorithms.
//!
//! This crate contains the portions of the kernel that can be expressed
//! without reference to kernel-internal types: wrapping tick arithmetic,
//! tick/millisecond conversion, and the table scans behind the scheduler.
//! Keeping them here lets us compile and exercise them on the host.

// Allow std-y things to be used in test. Note that this attribute is a bit of
// a trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]

/// Tests whether tick value `a` falls strictly before `b`.
///
/// The tick counter is 32 bits and wraps; ordering is defined by the sign of
/// the difference, so values more than 2^31 ticks apart will compare
/// "backwards". Kernel deadlines are always within 2^31 ticks of the current
/// time, which makes this comparison sound for its users.
#[inline(always)]
pub fn tick_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Tests whether tick value `a` falls at or before `b`. See [`tick_before`]
/// for the wrapping caveat.
#[inline(always)]
pub fn tick_at_or_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// Converts a duration in milliseconds to ticks at `ticks_per_sec`.
///
/// The computation is carried out in 64 bits; `None` is returned if the
/// result does not fit in a 32-bit tick count. When the tick rate is exactly
/// 1 kHz the conversion is the identity, matching the common configuration.
pub fn ms_to_ticks(ms: u32, ticks_per_sec: u32) -> Option<u32> {
    if ticks_per_sec == 1000 {
        return Some(ms);
    }
    let ticks = u64::from(ms) * u64::from(ticks_per_sec) / 1000;
    u32::try_from(ticks).ok()
}

/// Converts a duration in ticks at `ticks_per_sec` to milliseconds, or
/// `None` if the result does not fit in 32 bits.
pub fn ticks_to_ms(ticks: u32, ticks_per_sec: u32) -> Option<u32> {
    if ticks_per_sec == 1000 {
        return Some(ticks);
    }
    let ms = u64::from(ticks) * 1000 / u64::from(ticks_per_sec);
    u32::try_from(ms).ok()
}

/// Scans `items` to find a prioritized candidate.
///
/// Scans `items` for the next entry, after `previous`, that satisfies
/// `pred`. If more than one entry satisfies `pred`, returns the most
/// important one as judged by `more_important`. If multiple entries of equal
/// importance satisfy `pred`, prefers the first one in order after
/// `previous`, mod `items.len()`. Finally, if no entries satisfy `pred`,
/// returns `None`.
///
/// Whew.
///
/// This is generally the right way to search the task table, and is used to
/// implement (among other bits) the scheduler's ready-set extraction.
pub fn priority_scan<T>(
    previous: usize,
    items: &[T],
    pred: impl Fn(&T) -> bool,
    more_important: impl Fn(&T, &T) -> bool,
) -> Option<usize> {
    let mut pos = previous;
    let mut choice: Option<usize> = None;
    for _step_no in 0..items.len() {
        pos = pos.wrapping_add(1);
        if pos >= items.len() {
            pos = 0;
        }
        let t = &items[pos];
        if !pred(t) {
            continue;
        }

        if let Some(best) = choice {
            if !more_important(t, &items[best]) {
                continue;
            }
        }

        choice = Some(pos);
    }

    choice
}

/// Finds the entry with the earliest expired deadline.
///
/// `deadline_of` reports each entry's deadline in ticks, or `None` for
/// entries that have no deadline (either because they aren't waiting, or
/// because they wait forever). Among entries whose deadline has passed by
/// `now`, the one with the earliest deadline wins; ties go to the lowest
/// index. Returns `None` when nothing has expired.
///
/// Callers that need *all* expired entries, in deadline order, call this
/// repeatedly and disarm each winner.
pub fn earliest_expired<T>(
    items: &[T],
    now: u32,
    deadline_of: impl Fn(&T) -> Option<u32>,
) -> Option<usize> {
    let mut choice: Option<(usize, u32)> = None;
    for (index, item) in items.iter().enumerate() {
        if let Some(deadline) = deadline_of(item) {
            if !tick_at_or_before(deadline, now) {
                continue;
            }
            match choice {
                Some((_, best)) if !tick_before(deadline, best) => {}
                _ => choice = Some((index, deadline)),
            }
        }
    }
    choice.map(|(index, _)| index)
}
