//! Entry point: populates the firmware pass-up vector, brings up the
//! nucleus and support-level pools, creates the first process, and hands
//! off to the scheduler.
//!
//! Once `switch_process` runs a process for the first time, this module is
//! never entered again except through the pass-up vector's two handler
//! addresses -- everything downstream of boot is exception-driven.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod serial;

pub mod asl;
pub mod devreg;
pub mod exceptions;
pub mod hal;
pub mod interrupts;
pub mod konst;
pub mod pcb;
pub mod scheduler;
pub mod support;
pub mod types;

use hal::{Cpu, UmpsCpu};
use konst::{reg, INIT_INTERVAL_TIMER, PASSUPVECTOR, STATUS_IEP_ON, STATUS_INT_ON, STATUS_TE_ON, TOPSTKPAGE};
use types::{PassUpVector, ProcessorState};

extern "C" {
    /// The first process's entry point, supplied by whatever is linked
    /// against this crate to form the final kernel image (the boot stub's
    /// contract, not this crate's).
    fn test() -> !;
}

/// Write the nucleus's two handler addresses into the BIOS-owned pass-up
/// vector, so a TLB refill or any other exception transfers control here
/// instead of being handled (badly) by the firmware itself.
fn populate_pass_up_vector() {
    let vec = unsafe { &mut *(PASSUPVECTOR as *mut PassUpVector) };
    vec.tlb_refill_handler = support::pager::tlb_refill_entry_stub as usize as u32;
    vec.tlb_refill_stack_ptr = TOPSTKPAGE;
    vec.exception_handler = exceptions::exception_entry_stub as usize as u32;
    vec.exception_stack_ptr = TOPSTKPAGE;
}

/// Build the first process's initial state: kernel mode, interrupts and the
/// process-local timer enabled, running `test` with a stack at the top of
/// physical RAM. `t9` must match `pc` on entry, per the MIPS jump-register
/// convention.
fn first_process_state(cpu: &dyn Cpu) -> ProcessorState {
    let mut state = ProcessorState::zeroed();
    state.pc = test as usize as u32;
    state.reg[reg::T9] = test as usize as u32;
    state.reg[reg::SP] = cpu.ram_top();
    state.status = STATUS_IEP_ON | STATUS_TE_ON | STATUS_INT_ON;
    state
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let cpu = &UmpsCpu;

    serial::init();
    log_info!("nucleus starting");

    scheduler::init();
    support::init();
    populate_pass_up_vector();

    cpu.load_interval_timer(INIT_INTERVAL_TIMER / 1000);

    {
        let mut guard = scheduler::NUCLEUS.lock();
        let first = guard.pcbs.alloc().expect("pcb pool exhausted creating the first process");
        guard.pcbs.pcb_mut(first).state = first_process_state(cpu);
        guard.process_count += 1;
        let n = &mut *guard;
        n.pcbs.insert_queue(&mut n.ready_queue, first);
    }

    support::delay::spawn(cpu);
    log_info!("handing off to the scheduler");

    scheduler::switch_process(cpu)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log_error!("{}", info);
    unsafe { hal::panic_instr() }
}
