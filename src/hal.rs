//! Hardware abstraction layer: the narrow contract the nucleus uses to talk
//! to the CP0 control registers, the TLB, and the timers.
//!
//! On the real target these are the uMPS3 `libumps` primitives (`SETSTATUS`,
//! `TLBP`/`TLBWI`/`TLBWR`, `LDST`, `LDIT`, `STCK`, ...). They are firmware/CPU
//! contracts, not nucleus logic, so they live behind one trait and a single
//! production implementation; tests substitute a software model.

use crate::konst::{BIOSDATAPAGE, RAMBASEADDR, RAMBASESIZE, TIMESCALEADDR, TODLOADDR};
use crate::types::{Context, ProcessorState};
use volatile::Volatile;

/// The exception state the firmware saves at the BIOS data page just before
/// transferring control to the pass-up handler.
///
/// # Safety
/// Valid only while handling an exception on the calling CPU; the firmware
/// contract guarantees the page holds a live `ProcessorState` at that time.
pub unsafe fn saved_exception_state() -> &'static mut ProcessorState {
    &mut *(BIOSDATAPAGE as *mut ProcessorState)
}

/// Index-register "entry not found" bit (bit 31 of CP0 Index after TLBP).
pub const INDEX_PROBE_MISS: u32 = 0x8000_0000;

pub trait Cpu {
    fn get_status(&self) -> u32;
    fn set_status(&self, status: u32);
    fn get_entry_hi(&self) -> u32;
    fn set_entry_hi(&self, entry_hi: u32);
    fn set_entry_lo(&self, entry_lo: u32);
    fn get_index(&self) -> u32;

    /// Probe the TLB for the current EntryHi; leaves a result in CP0 Index.
    fn tlb_probe(&self);
    /// Write EntryHi/EntryLo into the TLB slot found by the last probe.
    fn tlb_write_indexed(&self);
    /// Write EntryHi/EntryLo into a TLB slot chosen by the hardware (refill).
    fn tlb_write_random(&self);

    /// Set the process-local timer, in microseconds.
    fn set_timer(&self, value: u32);
    /// Reload the system-wide interval (pseudo-clock) timer, in milliseconds.
    fn load_interval_timer(&self, millis: u32);
    /// Microseconds elapsed since boot.
    fn tod(&self) -> u64;
    /// Top of physical RAM, used to seed a process's initial stack pointer.
    fn ram_top(&self) -> u32;

    /// Load a saved processor state and transfer control to it. Never
    /// returns: control resumes in the loaded process.
    fn load_state(&self, state: &ProcessorState) -> !;

    /// Load a pass-up context (new stack pointer, status, PC) and transfer
    /// control to it. Used to enter a process's own exception handler on its
    /// own stack. Never returns.
    fn load_context(&self, ctx: &Context) -> !;

    /// Issue a Nucleus syscall (the `SYSCALL` MIPS instruction, `a0` through
    /// `a3` loaded from `number`/`a1`/`a2`/`a3`). On real hardware this traps
    /// into the general exception handler and, for syscalls that do not
    /// terminate the caller, eventually resumes right after the instruction
    /// with the result in `v0` -- an ordinary, if slow, function call from
    /// the issuing process's point of view. Support-level and user-level
    /// code use this to invoke SYS1-SYS18; the Nucleus's own syscall
    /// handlers (reached only via a real trap) never call it.
    fn syscall(&self, number: i32, a1: u32, a2: u32, a3: u32) -> u32;
}

/// Production implementation: talks to the BIOS-owned, memory-mapped CP0
/// shadow registers and the bus's timer/TOD words. The addresses below are
/// the firmware's fixed contract (see the device-register area in the
/// external-interfaces section); this module performs no nucleus logic.
pub struct UmpsCpu;

impl Cpu for UmpsCpu {
    fn get_status(&self) -> u32 {
        unsafe { read_cp0_status() }
    }

    fn set_status(&self, status: u32) {
        unsafe { write_cp0_status(status) }
    }

    fn get_entry_hi(&self) -> u32 {
        unsafe { read_cp0_entry_hi() }
    }

    fn set_entry_hi(&self, entry_hi: u32) {
        unsafe { write_cp0_entry_hi(entry_hi) }
    }

    fn set_entry_lo(&self, entry_lo: u32) {
        unsafe { write_cp0_entry_lo(entry_lo) }
    }

    fn get_index(&self) -> u32 {
        unsafe { read_cp0_index() }
    }

    fn tlb_probe(&self) {
        unsafe { tlbp() }
    }

    fn tlb_write_indexed(&self) {
        unsafe { tlbwi() }
    }

    fn tlb_write_random(&self) {
        unsafe { tlbwr() }
    }

    fn set_timer(&self, value: u32) {
        unsafe { set_plt(value) }
    }

    fn load_interval_timer(&self, millis: u32) {
        let scale = unsafe { Volatile::new(&*(TIMESCALEADDR as *const u32)).read() };
        unsafe {
            Volatile::new(&mut *(crate::konst::INTERVALTMR as *mut u32)).write(millis * scale);
        }
    }

    fn tod(&self) -> u64 {
        let scale = unsafe { Volatile::new(&*(TIMESCALEADDR as *const u32)).read() };
        let lo = unsafe { Volatile::new(&*(TODLOADDR as *const u32)).read() };
        (lo / scale.max(1)) as u64
    }

    fn ram_top(&self) -> u32 {
        let base = unsafe { Volatile::new(&*(RAMBASEADDR as *const u32)).read() };
        let size = unsafe { Volatile::new(&*(RAMBASESIZE as *const u32)).read() };
        base + size
    }

    fn load_state(&self, state: &ProcessorState) -> ! {
        unsafe { ldst(state) }
    }

    fn load_context(&self, ctx: &Context) -> ! {
        unsafe { ldcxt(ctx.stack_ptr, ctx.status, ctx.pc) }
    }

    fn syscall(&self, number: i32, a1: u32, a2: u32, a3: u32) -> u32 {
        unsafe { raw_syscall(number, a1, a2, a3) }
    }
}

// These bind to the firmware/CPU contract; the nucleus never calls them
// directly, only through `Cpu`. Declared as extern so the rest of the
// kernel stays free of inline assembly.
extern "C" {
    fn read_cp0_status() -> u32;
    fn write_cp0_status(value: u32);
    fn read_cp0_entry_hi() -> u32;
    fn write_cp0_entry_hi(value: u32);
    fn write_cp0_entry_lo(value: u32);
    fn read_cp0_index() -> u32;
    fn tlbp();
    fn tlbwi();
    fn tlbwr();
    fn set_plt(value: u32);
    fn ldst(state: &ProcessorState) -> !;
    fn ldcxt(stack_ptr: u32, status: u32, pc: u32) -> !;
    fn raw_syscall(number: i32, a1: u32, a2: u32, a3: u32) -> u32;

    /// Stop the virtual machine cleanly (all processes terminated).
    pub fn halt() -> !;
    /// Idle with interrupts enabled until the next interrupt arrives.
    pub fn wait() -> !;
    /// Stop the virtual machine with an error indication (deadlock).
    pub fn panic_instr() -> !;
}
