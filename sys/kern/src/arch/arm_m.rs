// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M and ARMv8-M mainline.
//!
//! # ARM-M timer
//!
//! We use the system tick timer as the kernel timer. It's only suitable for
//! producing periodic interrupts -- its counter is small and only counts
//! down -- so each SysTick interrupt advances the kernel tick by one through
//! [`crate::time::time_advance`]. This costs a regular interrupt but needs
//! no SoC-specific timer support.
//!
//! # Context switches and PendSV
//!
//! On any interrupt, the processor stacks r0-r3, r12, lr, pc and xPSR on the
//! interrupted task's stack and calls our handler. The callee-saved
//! registers r4-r11 still hold whatever the task left there, so a context
//! switch must spill them too. We follow the usual Cortex-M discipline:
//! scheduling decisions (made in the tick ISR or in a voluntary kernel call)
//! don't switch directly; they record the outgoing and incoming saved-state
//! slots and pend the PendSV exception. PendSV is configured at the lowest
//! priority, so it runs once every other handler has finished -- and, when a
//! decision is taken inside a critical section, not until that section ends.
//! Its handler does the actual spill of r4-r11 and the stack pointer swap.
//!
//! Tasks run privileged, on the process stack pointer (PSP); the kernel
//! entry points (SVCall, SysTick, PendSV) share the main stack. Floating
//! point context is not preserved across switches; tasks that want the FPU
//! need to coordinate among themselves.

use core::arch::global_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::uassert;

/// Saved execution state for one task. Everything except the stack pointer
/// lives on the task's stack, so this is small.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    /// Value of the process stack pointer while the task is switched out.
    /// Written and read by the PendSV handler.
    pub(crate) sp: usize,
}

/// Outgoing saved-state slot for the pending context switch, or null if the
/// current context should not be saved (first dispatch only). Consumed by
/// the PendSV handler.
#[no_mangle]
static SWITCH_FROM: AtomicPtr<SavedState> =
    AtomicPtr::new(core::ptr::null_mut());

/// Incoming saved-state slot for the pending context switch. Read by both
/// PendSV and the startup SVC.
#[no_mangle]
static SWITCH_TO: AtomicPtr<SavedState> =
    AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger, we
/// store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// EXC_RETURN value selecting a return to Thread mode on the process stack,
/// without floating point state.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Words consumed by an initial task frame: the 8-word hardware exception
/// frame plus the 8-word software-saved r4-r11 block below it.
const FRAME_WORDS: usize = 16;

/// Stuff the hardware places on the stack at exception entry.
#[derive(Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct BaseExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Lays out an initial machine frame at the top of `stack` so that the first
/// context switch into the task enters `entry` with `arg`, and returns the
/// stack pointer to store in the task.
pub fn init_stack(
    entry: fn(usize) -> !,
    arg: usize,
    stack: &mut [u32],
) -> SavedState {
    let base = stack.as_ptr() as usize;
    let top = stack.len();

    // ARMvX-M requires 8-byte stack alignment on exception entry.
    uassert!((base + top * 4) & 0x7 == 0);
    uassert!(top >= FRAME_WORDS);

    let frame = BaseExceptionFrame {
        r0: arg as u32,
        pc: entry as usize as u32 | 1, // for thumb
        lr: 0xFFFF_FFFF,               // trap on return from the entry fn
        xpsr: INITIAL_PSR,
        ..BaseExceptionFrame::default()
    };
    let words: [u32; 8] = zerocopy::transmute!(frame);
    stack[top - 8..].copy_from_slice(&words);

    // The software-saved r4-r11 block sits just below; its initial contents
    // only need to be defined, not meaningful.
    for word in &mut stack[top - FRAME_WORDS..top - 8] {
        *word = 0;
    }

    SavedState {
        sp: base + (top - FRAME_WORDS) * 4,
    }
}

/// Arranges for execution to move from the task owning `from` to the task
/// owning `to`, by pending PendSV. The switch happens once every active
/// handler has finished and interrupts are unmasked.
///
/// A null `from` skips saving the outgoing context; the scheduler uses this
/// only for the first dispatch.
///
/// # Safety
///
/// `from` and `to` must point at saved-state slots that stay valid until the
/// switch completes (in practice: slots in the kernel's static task table).
/// The caller must make at most one scheduling decision per kernel entry, so
/// that the recorded `from` is the state of the context actually executing
/// when PendSV fires.
pub unsafe fn switch_context(from: *mut SavedState, to: *mut SavedState) {
    SWITCH_FROM.store(from, Ordering::Relaxed);
    SWITCH_TO.store(to, Ordering::Relaxed);
    cortex_m::peripheral::SCB::set_pendsv();
}

// Handler that gets linked into the vector table for PendSV. (Name is
// dictated by the `cortex_m` crate.)
//
// Saves r4-r11 and the PSP of the outgoing task into its `SavedState`, then
// loads the incoming task's. The hardware-stacked half of the context is
// popped automatically on exception return.
global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    PendSV:
        movw r0, #:lower16:SWITCH_FROM
        movt r0, #:upper16:SWITCH_FROM
        ldr r1, [r0]
        @ Consume the request so a spurious PendSV is a no-op.
        movs r2, #0
        str r2, [r0]
        cbz r1, 1f
        mrs r2, PSP
        stmdb r2!, {{r4-r11}}
        str r2, [r1]
    1:  movw r0, #:lower16:SWITCH_TO
        movt r0, #:upper16:SWITCH_TO
        ldr r1, [r0]
        cbz r1, 2f
        ldr r2, [r1]
        ldmia r2!, {{r4-r11}}
        msr PSP, r2
    2:  bx lr
"}

// Handler that gets linked into the vector table for the Supervisor Call
// instruction.
//
// The only SVC in this kernel is the one `start_first_task` issues from the
// main stack to enter the first task: there are no syscalls, because tasks
// share the kernel's address space and call it directly. The handler loads
// the first task's context and manufactures an EXC_RETURN that drops into
// Thread mode on the process stack.
global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        movw r0, #:lower16:SWITCH_TO
        movt r0, #:upper16:SWITCH_TO
        ldr r0, [r0]
        ldr r1, [r0]
        ldmia r1!, {{r4-r11}}
        msr PSP, r1
        mov lr, {exc_return}
        bx lr
    ",
    exc_return = const EXC_RETURN_THREAD_PSP,
}

/// Handler that gets linked into the vector table for the System Tick Timer
/// interrupt. (Name is dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::time::time_advance(1);
}

/// Configures the tick timer and kernel exception priorities, then enters
/// the first task, whose saved state is at `first`.
///
/// # Safety
///
/// Must be called exactly once, from the main stack in privileged Thread
/// mode, with `first` pointing into the kernel's task table.
pub unsafe fn start_first_task(
    tick_divisor: u32,
    first: *mut SavedState,
) -> ! {
    uassert!(tick_divisor > 0);
    CLOCK_FREQ_KHZ.store(tick_divisor, Ordering::Relaxed);

    // Safety: we're only lowering exception priorities from their reset
    // values, which can't cause surprise preemption; the register API is
    // just conservative.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // SVCall, SysTick and PendSV all at the lowest configurable
        // priority, so kernel entry points never preempt one another and
        // PendSV runs last.
        scb.shpr[7].write(0xFF);
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);
    }

    // Safety: same deal; configuring the timer can at worst wedge us, not
    // break memory safety.
    unsafe {
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value.
        syst.rvr.write(tick_divisor - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt.
        syst.csr.modify(|v| v | 0b111);
    }

    SWITCH_TO.store(first, Ordering::Relaxed);
    SWITCH_FROM.store(core::ptr::null_mut(), Ordering::Relaxed);

    // Trap into the kernel; the SVCall handler performs the actual entry.
    // Safety: this is the one SVC this kernel issues, and the handler
    // expects exactly this environment.
    unsafe {
        core::arch::asm!("svc #0xFF", options(noreturn));
    }
}

/// Masks interrupts that can touch kernel state. Returns an opaque token for
/// [`restore_interrupts`] recording the prior mask, so nested use restores
/// exactly the outer state.
pub fn disable_interrupts() -> u32 {
    let was_active = cortex_m::register::primask::read().is_active();
    cortex_m::interrupt::disable();
    was_active as u32
}

/// Restores the interrupt mask saved by the matching
/// [`disable_interrupts`].
///
/// # Safety
///
/// `token` must come from the most recent unmatched `disable_interrupts` on
/// this call path; unmasking inside someone else's critical section breaks
/// the kernel's serialization.
pub unsafe fn restore_interrupts(token: u32) {
    if token != 0 {
        // Safety: per our contract, interrupts were enabled when the
        // matching disable ran.
        unsafe { cortex_m::interrupt::enable() }
    }
}

/// Parks the processor until an interrupt arrives. Used by the idle task.
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}
