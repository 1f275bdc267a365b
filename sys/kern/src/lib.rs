// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kestrel kernel.
//!
//! This is the application-independent portion of the operating system: a
//! preemptive, priority-based scheduler together with the monotonic tick
//! timer, timed wake-ups, and time-of-day derivation. Boards, drivers, and
//! middleware live out of tree and interact with the kernel through the
//! public operations exported from the modules below.
//!
//! The code outside of the `arch` module is portable: it builds for ARM
//! M-profile targets and, against a fake architecture layer, for the host,
//! which is how the kernel's state machine gets tested.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. The task table, listener table, and tick rate
//!    take a single shape chosen at compile time; there is no allocation and
//!    no hidden init-at-first-use.
//! 2. A strong preference for safe code where reasonable. `unsafe` is
//!    concentrated in the `arch` layer and the global-state accessor.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms. The task table is small; scans beat clever data
//!    structures at this scale, and they're much easier to convince
//!    yourself of.
//! 4. Every kernel data structure is mutated under one interrupt-masking
//!    critical section. There are no internal locks and thus no ordering
//!    hazards.

#![cfg_attr(target_os = "none", no_std)]

/// Kernel assertion: cheaper than `assert!` because it carries no message,
/// and deliberately present in release builds. Failure halts the system
/// through the panic path.
macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("kernel assertion failed");
        }
    };
}
pub(crate) use uassert;

pub mod arch;
pub mod crit;
pub mod descs;
#[cfg(target_os = "none")]
pub mod fail;
pub mod profiling;
pub mod sanity;
pub mod sched;
pub mod startup;
pub mod task;
#[cfg(test)]
mod test_support;
pub mod time;
