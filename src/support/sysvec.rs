//! The Support Level's general exception handler, its own SYSCALL dispatcher
//! (syscalls 9-18), and the program-trap handler that ends a u-proc for good.
//!
//! Reached only via a pass-up from the Nucleus (`except_context[GENERALEXCEPT]`
//! points here for every u-proc), never called directly by the Nucleus
//! itself. Everything it does to affect scheduling goes back through
//! `Cpu::syscall`, exactly as a user-level program would.

use crate::hal::Cpu;
use crate::konst::{
    CAUSE_SHIFT, EXC_SYSCALL, GENERALEXCEPT, GET_EXC_CODE, KUSEG, MAX_SUPPORT_SYSCALL,
    MIN_SUPPORT_SYSCALL, MAX_PRINT_LEN, NUM_SUPPORT_DEVICE_TYPES, PRNTINT, READY, SUPP_PRINTER,
    SUPP_TERM_RECV, SUPP_TERM_TRANS, SYS10_GETTOD, SYS11_WRITEPRINTER, SYS12_WRITETERMINAL,
    SYS13_READTERMINAL, SYS14_DISKPUT, SYS15_DISKGET, SYS16_FLASHPUT, SYS17_FLASHGET, SYS18_DELAY,
    SYS3_PASSEREN, SYS4_VERHOGEN, SYS5_WAITIO, SYS8_GETSUPPORTDATA, SYS9_TERMINATE,
    TERM_CHAR_SHIFT, TERMINT, TRANSMIT_CHAR, WORD_LEN,
};
use crate::types::SupportStruct;

/// The address a u-proc's `except_context[GENERALEXCEPT].pc` should be set
/// to. `Cpu::load_context` jumps here with no arguments, same as the
/// pass-up vector's own handler slots.
pub extern "C" fn general_exception_entry_stub() -> ! {
    general_exception_handler(&crate::hal::UmpsCpu)
}

/// Entry point registered in every u-proc's `except_context[GENERALEXCEPT]`.
/// Fetches the caller's own support structure, decides whether the pass-up
/// was a real syscall or a program trap, and dispatches accordingly.
pub fn general_exception_handler(cpu: &dyn Cpu) -> ! {
    let supp_addr = cpu.syscall(SYS8_GETSUPPORTDATA, 0, 0, 0);
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    let cause = (supp.except_state[GENERALEXCEPT].cause & GET_EXC_CODE) >> CAUSE_SHIFT;

    if cause == EXC_SYSCALL {
        let number = supp.except_state[GENERALEXCEPT].a0() as i32;
        syscall_dispatch(cpu, supp, supp_addr, number);
    }
    program_trap_kill(cpu, supp_addr);
}

fn syscall_dispatch(cpu: &dyn Cpu, supp: &mut SupportStruct, supp_addr: u32, number: i32) -> ! {
    if !(MIN_SUPPORT_SYSCALL..=MAX_SUPPORT_SYSCALL).contains(&number) {
        program_trap_kill(cpu, supp_addr);
    }

    let state = &mut supp.except_state[GENERALEXCEPT];
    let a1 = state.a1();
    let a2 = state.a2();
    let a3 = state.a3();
    state.pc += WORD_LEN;

    match number {
        n if n == SYS9_TERMINATE => get_nuked(cpu, supp_addr),
        n if n == SYS10_GETTOD => {
            let v0 = cpu.tod() as u32;
            finish(cpu, supp_addr, v0)
        }
        n if n == SYS11_WRITEPRINTER => write_to_printer(cpu, supp_addr, a1, a2 as i32),
        n if n == SYS12_WRITETERMINAL => write_to_terminal(cpu, supp_addr, a1, a2 as i32),
        n if n == SYS13_READTERMINAL => read_from_terminal(cpu, supp_addr, a1),
        n if n == SYS14_DISKPUT => crate::support::dma::disk_put(cpu, a1, a2 as usize, a3 as i32, supp_addr),
        n if n == SYS15_DISKGET => crate::support::dma::disk_get(cpu, a1, a2 as usize, a3 as i32, supp_addr),
        n if n == SYS16_FLASHPUT => crate::support::dma::flash_put(cpu, a1, a2 as usize, a3, supp_addr),
        n if n == SYS17_FLASHGET => crate::support::dma::flash_get(cpu, a1, a2 as usize, a3, supp_addr),
        n if n == SYS18_DELAY => crate::support::delay::sys18_handler(cpu, supp_addr, a1),
        _ => program_trap_kill(cpu, supp_addr),
    }
}

/// Write `v0` into the caller's saved general-exception state and resume it.
/// Shared by every support-level syscall that returns a value.
pub(crate) fn finish(cpu: &dyn Cpu, supp_addr: u32, v0: u32) -> ! {
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    supp.except_state[GENERALEXCEPT].set_v0(v0);
    cpu.load_state(&supp.except_state[GENERALEXCEPT])
}

/// SYS9: release every device mutex and master-semaphore slot the caller
/// holds, invalidate its page table, free its support structure, and
/// terminate it (and its descendants) via SYS2. Never returns.
fn get_nuked(cpu: &dyn Cpu, supp_addr: u32) -> ! {
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    let unit = (supp.asid - 1) as usize;

    for device_type in 0..NUM_SUPPORT_DEVICE_TYPES {
        let addr = crate::support::device_mutex_addr(device_type, unit);
        let value = unsafe { *(addr as *const i32) };
        if value == 0 {
            cpu.syscall(SYS4_VERHOGEN, addr, 0, 0);
        }
    }

    crate::support::pager::invalidate_page_table(cpu, supp);

    cpu.syscall(SYS4_VERHOGEN, crate::support::master_semaphore_addr(), 0, 0);

    {
        let mut guard = crate::scheduler::NUCLEUS.lock();
        let current = guard.current.expect("SYS9 with no current process");
        if let Some(idx) = guard.pcbs.pcb(current).support {
            guard.free_support(idx);
        }
    }

    cpu.syscall(crate::konst::SYS2_TERMINATEPROCESS, 0, 0, 0);
    unreachable!("SYS2 never returns")
}

/// The support level's program trap handler: every bad syscall, out-of-range
/// access, or unsupported exception code lands here. Equivalent to calling
/// `get_nuked` directly.
pub fn program_trap_kill(cpu: &dyn Cpu, supp_addr: u32) -> ! {
    get_nuked(cpu, supp_addr)
}

/// SYS11: write `len` characters starting at `virt_addr` to the caller's own
/// printer unit (`asid - 1`), one at a time, each guarded by a disabled-
/// interrupts window around the device command and the blocking `SYS5`.
fn write_to_printer(cpu: &dyn Cpu, supp_addr: u32, virt_addr: u32, len: i32) -> ! {
    if virt_addr < KUSEG || !(0..=MAX_PRINT_LEN).contains(&len) {
        program_trap_kill(cpu, supp_addr);
    }
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    let unit = (supp.asid - 1) as usize;
    let mutex_addr = crate::support::device_mutex_addr(SUPP_PRINTER, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let bytes = unsafe { core::slice::from_raw_parts(virt_addr as *const u8, len as usize) };
    let mut sent: i32 = 0;
    for &byte in bytes {
        if crate::devreg::status(PRNTINT, unit) != READY {
            sent = -(crate::devreg::status(PRNTINT, unit) as i32);
            break;
        }
        let device_status = crate::support::pager::with_interrupts_disabled(cpu, || {
            crate::devreg::set_data0(PRNTINT, unit, byte as u32);
            crate::devreg::set_command(PRNTINT, unit, crate::konst::PRINT_CHAR);
            cpu.syscall(SYS5_WAITIO, PRNTINT, unit as u32, 0)
        });
        if device_status != READY {
            sent = -(device_status as i32);
            break;
        }
        sent += 1;
    }

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    finish(cpu, supp_addr, sent as u32)
}

/// SYS12: write `len` characters starting at `virt_addr` to the caller's own
/// terminal unit's transmitter.
fn write_to_terminal(cpu: &dyn Cpu, supp_addr: u32, virt_addr: u32, len: i32) -> ! {
    if virt_addr < KUSEG || !(0..=MAX_PRINT_LEN).contains(&len) {
        program_trap_kill(cpu, supp_addr);
    }
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    let unit = (supp.asid - 1) as usize;
    let mutex_addr = crate::support::device_mutex_addr(SUPP_TERM_TRANS, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let bytes = unsafe { core::slice::from_raw_parts(virt_addr as *const u8, len as usize) };
    let mut sent: i32 = 0;
    for &byte in bytes {
        if crate::devreg::term_transm_status(unit) & crate::konst::TERM_STATUS_MASK != READY {
            sent = -((crate::devreg::term_transm_status(unit) & crate::konst::TERM_STATUS_MASK) as i32);
            break;
        }
        let device_status = crate::support::pager::with_interrupts_disabled(cpu, || {
            let command = TRANSMIT_CHAR | ((byte as u32) << TERM_CHAR_SHIFT);
            crate::devreg::term_transm_command(unit, command);
            cpu.syscall(SYS5_WAITIO, TERMINT, unit as u32, 1)
        });
        let status = device_status & crate::konst::TERM_STATUS_MASK;
        if status != crate::konst::TERM_RECV_OK {
            sent = -(status as i32);
            break;
        }
        sent += 1;
    }

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    finish(cpu, supp_addr, sent as u32)
}

/// SYS13: read characters from the caller's own terminal unit's receiver
/// into the buffer at `virt_addr`, stopping at a newline (not stored) or the
/// first non-ready/non-success status.
fn read_from_terminal(cpu: &dyn Cpu, supp_addr: u32, virt_addr: u32) -> ! {
    if virt_addr < KUSEG {
        program_trap_kill(cpu, supp_addr);
    }
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };
    let unit = (supp.asid - 1) as usize;
    let mutex_addr = crate::support::device_mutex_addr(SUPP_TERM_RECV, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let buf = unsafe { core::slice::from_raw_parts_mut(virt_addr as *mut u8, MAX_PRINT_LEN as usize) };
    let mut received: i32 = 0;
    let mut failed_status: Option<u32> = None;
    loop {
        if crate::devreg::term_recv_status(unit) & crate::konst::TERM_STATUS_MASK != READY {
            break;
        }
        let read_status = crate::support::pager::with_interrupts_disabled(cpu, || {
            crate::devreg::set_command(TERMINT, unit, TRANSMIT_CHAR);
            cpu.syscall(SYS5_WAITIO, TERMINT, unit as u32, 0)
        });
        if read_status & crate::konst::TERM_STATUS_MASK != crate::konst::TERM_RECV_OK {
            failed_status = Some(read_status);
            break;
        }
        let ch = (read_status >> TERM_CHAR_SHIFT) as u8;
        if ch == b'\n' {
            break;
        }
        if (received as usize) < buf.len() {
            buf[received as usize] = ch;
        }
        received += 1;
    }

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    match failed_status {
        Some(status) => finish(cpu, supp_addr, (-(status as i32)) as u32),
        None => finish(cpu, supp_addr, received as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_nuked_is_grounded_on_sys2() {
        // No host-side harness exercises the full pass-up path (it needs a
        // live Nucleus + Cpu), but this keeps the module honest about what
        // SYS9 ultimately reduces to.
        assert_eq!(crate::konst::SYS9_TERMINATE, 9);
        assert_eq!(crate::konst::SYS2_TERMINATEPROCESS, 2);
    }
}
