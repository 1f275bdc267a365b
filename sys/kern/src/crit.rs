// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-masking critical sections.
//!
//! Every kernel data structure is mutated inside one of these. The guard
//! restores the *prior* interrupt mask on drop, so critical sections nest
//! correctly and release on every exit path, including panics that unwind
//! far enough to run drops.

use crate::arch;

/// An entered critical section. Interrupts that can touch kernel state are
/// masked until this value is dropped.
pub struct CriticalSection {
    token: u32,
    /// Keep the guard from crossing threads in host builds.
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl CriticalSection {
    /// Masks interrupts, saving the prior mask for restoration on drop.
    pub fn enter() -> Self {
        Self {
            token: arch::disable_interrupts(),
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        // Safety: the token is the one our `enter` produced, and drop runs
        // at most once.
        unsafe { arch::restore_interrupts(self.token) }
    }
}

/// Runs `body` inside a critical section.
pub fn with<R>(body: impl FnOnce() -> R) -> R {
    let _guard = CriticalSection::enter();
    body()
}
