// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash reporting.
//!
//! When the kernel halts -- an explicit [`die`] or any `panic!` -- it
//! leaves one debugger-visible record behind before parking the
//! processor:
//!
//! - `kern::fail::KERNEL_CRASH` is a `CrashRecord`. Its first word reads
//!   `CRASH_MAGIC` once the rest of the record is valid; any other value
//!   means the kernel either hasn't died or didn't get far enough to say
//!   so.
//! - The record carries the kernel tick at the time of death and as much
//!   of the failure message (UTF-8, length-prefixed) as fits.
//!
//! The crash path masks interrupts before writing the record, so a late
//! ISR can't observe or trample a half-written record, and then parks the
//! core with interrupts still masked until a debugger or watchdog
//! intervenes.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;
use crate::time;

/// Bytes of failure description a `CrashRecord` can hold.
const DETAIL_LEN: usize = 96;

/// Marker for `CrashRecord::magic`.
pub const CRASH_MAGIC: u32 = 0x4b65_7321;

/// Debugger-visible description of a kernel death.
#[repr(C)]
pub struct CrashRecord {
    /// `CRASH_MAGIC` once the rest of the record is valid.
    magic: u32,
    /// Kernel tick at the time of death.
    tick: u32,
    /// Number of valid bytes in `detail`.
    detail_len: u32,
    /// Failure description, UTF-8, truncated to fit.
    detail: [u8; DETAIL_LEN],
}

/// The one crash record. `#[used]` because no kernel code reads it back;
/// debuggers find it by symbol name.
#[used]
#[no_mangle]
static mut KERNEL_CRASH: CrashRecord = CrashRecord {
    magic: 0,
    tick: 0,
    detail_len: 0,
    detail: [0; DETAIL_LEN],
};

/// Set by the first death. A second entry -- a panic raised inside the
/// crash path itself -- skips straight to parking rather than scribbling
/// over the record that describes the original problem.
static CRASHING: AtomicBool = AtomicBool::new(false);

/// Halts the system, recording `msg` for the debugger. Never returns.
pub fn die(msg: impl core::fmt::Display) -> ! {
    // Quiesce. Nothing may run while the record is written, and nothing
    // gets the processor back afterwards either.
    arch::disable_interrupts();

    if !CRASHING.swap(true, Ordering::SeqCst) {
        // Safety: the swap admits exactly one execution here, and
        // interrupts are off, so this reference is unique.
        let record = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_CRASH) };
        record.tick = time::now().into();
        let mut cursor = Detail {
            dest: &mut record.detail,
            used: 0,
        };
        write!(cursor, "{msg}").ok();
        record.detail_len = cursor.used as u32;
        record.magic = CRASH_MAGIC;
    }

    park();
}

fn park() -> ! {
    loop {
        // Interrupts stay masked; this holds the core in its low-power
        // state rather than spinning it.
        arch::wait_for_interrupt();
    }
}

/// Appends formatted text to the crash record's detail buffer, tracking
/// how much actually fit.
struct Detail<'a> {
    dest: &'a mut [u8; DETAIL_LEN],
    used: usize,
}

impl Write for Detail<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = DETAIL_LEN - self.used;
        let n = s.len().min(room);
        self.dest[self.used..self.used + n]
            .copy_from_slice(&s.as_bytes()[..n]);
        self.used += n;
        Ok(())
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
