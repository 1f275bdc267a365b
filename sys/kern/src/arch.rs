// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same
//! set of names:
//!
//! - `SavedState`: per-task saved execution state (the stack pointer; the
//!   rest of the context lives on the task's stack).
//! - `init_stack`: lay out an initial frame so the first switch into a task
//!   enters its entry function with its argument.
//! - `switch_context`: arrange for execution to move from one task's saved
//!   state to another's. Callable from both voluntary and ISR-exit paths.
//! - `start_first_task`: hand the processor to the first task; never
//!   returns.
//! - `disable_interrupts` / `restore_interrupts`: the masking primitive
//!   underneath [`crate::crit`]. The returned token is opaque; nesting
//!   restores exactly the prior mask state.
//! - `wait_for_interrupt`: park the processor until something happens.
//!
//! The rest of the kernel has no knowledge of register layout beyond this
//! interface.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        // Not a supported bare-metal target; use the fake architecture so
        // the portable parts of the kernel can build and run tests on the
        // host.
        pub mod fake;
        pub use fake::*;
    }
}
