// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fake architecture support, used to build the portable parts of the
//! kernel on the host for testing and simulation.
//!
//! There is no machine context to save on the host, so context switches are
//! bookkeeping-only: the scheduler's own record of the current task is the
//! observable outcome. Interrupt masking is modeled as a nesting depth so
//! the critical-section plumbing still round-trips tokens.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::uassert;

/// Matches the footprint of the real architectures' initial frames so stack
/// watermark numbers look plausible in simulation.
const FRAME_WORDS: usize = 16;

/// Saved execution state for one task.
#[derive(Debug, Default)]
pub struct SavedState {
    /// Pretend stack pointer; maintained so watermark and diagnostic code
    /// behave, never resumed.
    pub(crate) sp: usize,
}

/// Lays out a pretend initial frame, consuming the same number of words a
/// real architecture would.
pub fn init_stack(
    entry: fn(usize) -> !,
    arg: usize,
    stack: &mut [u32],
) -> SavedState {
    let _ = (entry, arg);
    let top = stack.len();
    uassert!(top >= FRAME_WORDS);
    for word in &mut stack[top - FRAME_WORDS..] {
        *word = 0;
    }
    SavedState {
        sp: stack.as_ptr() as usize + (top - FRAME_WORDS) * 4,
    }
}

/// Records a context switch. On the host nothing actually changes
/// execution; the scheduler's bookkeeping is the whole effect.
///
/// # Safety
///
/// Trivially safe here; the signature matches the real architectures.
pub unsafe fn switch_context(_from: *mut SavedState, _to: *mut SavedState) {}

/// The host cannot enter tasks.
///
/// # Safety
///
/// Trivially safe; it only panics.
pub unsafe fn start_first_task(
    _tick_divisor: u32,
    _first: *mut SavedState,
) -> ! {
    panic!("fake arch cannot enter tasks");
}

/// Interrupt-mask nesting depth standing in for PRIMASK.
static IRQ_DEPTH: AtomicU32 = AtomicU32::new(0);

/// Deepens the fake interrupt mask and returns the prior depth as the
/// restore token.
pub fn disable_interrupts() -> u32 {
    IRQ_DEPTH.fetch_add(1, Ordering::SeqCst)
}

/// Restores the fake interrupt mask to the depth saved by the matching
/// [`disable_interrupts`].
///
/// # Safety
///
/// `token` must come from the most recent unmatched `disable_interrupts` on
/// this call path.
pub unsafe fn restore_interrupts(token: u32) {
    IRQ_DEPTH.store(token, Ordering::SeqCst);
}

/// Parks the processor. On the host, just a scheduling hint.
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
