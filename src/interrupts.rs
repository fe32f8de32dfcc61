//! Interrupt handler: services the process-local timer, the system-wide
//! interval (pseudo-clock) timer, and the five device lines (disk, flash,
//! network, printer, terminal).

use crate::devreg;
use crate::hal::{saved_exception_state, Cpu};
use crate::konst::{
    DISKINT, FLASHINT, INIT_INTERVAL_TIMER, LARGE_TIME, NETWINT, PRNTINT,
    TERMINT, TERM_STATUS_MASK, TERM_RECV_OK,
};
use crate::scheduler::{switch_process, NUCLEUS};

/// Isolate the lowest set bit of a pending-interrupt bitmap and return its
/// bit position, i.e. the highest-priority pending line/device.
fn lowest_set_bit_index(bitmap: u32) -> Option<u32> {
    if bitmap == 0 {
        None
    } else {
        Some(bitmap.trailing_zeros())
    }
}

/// V the semaphore for `(line, unit)`, place `status` in the unblocked
/// process's `v0`, and decrement the soft-block count.
fn unblock_load(line: u32, unit: usize, status: u32) {
    let mut guard = NUCLEUS.lock();
    let index = (line - DISKINT) as usize * crate::konst::DEV_UNITS + unit;
    let sem_addr = guard.device_sem_addr(index);
    guard.device_sems[index] += 1;
    if guard.device_sems[index] <= 0 {
        if let Some(p) = {
            let n = &mut *guard;
            n.asl.remove_blocked(&mut n.pcbs, sem_addr)
        } {
            guard.pcbs.pcb_mut(p).state.set_v0(status);
            {
                let n = &mut *guard;
                n.pcbs.insert_queue(&mut n.ready_queue, p);
            }
            guard.soft_block_count -= 1;
        }
    }
}

/// Handle interrupt lines 3..7 (device/terminal interrupts).
fn nontimer_interrupt(cpu: &dyn Cpu, line: u32) -> ! {
    let bitmap = devreg::interrupting_devices(line);
    let unit = lowest_set_bit_index(bitmap).expect("interrupt line asserted with no device bit set") as usize;

    if line == TERMINT {
        let recv_status = devreg::term_recv_status(unit);
        if (recv_status & TERM_STATUS_MASK) == TERM_RECV_OK {
            devreg::term_recv_ack(unit);
            unblock_load(line, unit, recv_status);
        }
        let transm_status = devreg::term_transm_status(unit);
        if (transm_status & TERM_STATUS_MASK) == TERM_RECV_OK {
            devreg::term_transm_command(unit, crate::konst::ACK);
            unblock_load(line + 1, unit, transm_status);
        }
    } else {
        let status = devreg::status(line, unit);
        devreg::set_command(line, unit, crate::konst::ACK);
        unblock_load(line, unit, status);
    }

    resume_or_schedule(cpu)
}

fn resume_or_schedule(cpu: &dyn Cpu) -> ! {
    let has_current = NUCLEUS.lock().current.is_some();
    if has_current {
        let state = unsafe { saved_exception_state() };
        cpu.load_state(state)
    } else {
        switch_process(cpu)
    }
}

/// Handle a process-local-timer (line 1) interrupt: the running process has
/// exhausted its quantum.
fn plt_interrupt(cpu: &dyn Cpu) -> ! {
    cpu.set_timer(LARGE_TIME);
    let saved = unsafe { saved_exception_state() };
    let mut guard = NUCLEUS.lock();
    let current = guard.current.take().expect("PLT interrupt with no current process");
    guard.pcbs.pcb_mut(current).state = *saved;
    let elapsed = cpu.tod().saturating_sub(guard.quantum_start) as u32;
    guard.pcbs.pcb_mut(current).time += elapsed;
    {
        let n = &mut *guard;
        n.pcbs.insert_queue(&mut n.ready_queue, current);
    }
    drop(guard);
    switch_process(cpu)
}

/// Handle a system-wide interval-timer (line 2) interrupt: wake every
/// process blocked on the pseudo-clock semaphore.
fn system_interval_interrupt(cpu: &dyn Cpu) -> ! {
    cpu.load_interval_timer(INIT_INTERVAL_TIMER / 1000);
    let mut guard = NUCLEUS.lock();
    let pseudo_addr = guard.pseudo_clock_addr();
    loop {
        let woken = {
            let n = &mut *guard;
            n.asl.remove_blocked(&mut n.pcbs, pseudo_addr)
        };
        match woken {
            Some(p) => {
                let n = &mut *guard;
                n.pcbs.insert_queue(&mut n.ready_queue, p);
            }
            None => break,
        }
    }
    let idx = crate::konst::PSEUDOCLOCK_IDX;
    guard.soft_block_count += guard.device_sems[idx];
    guard.device_sems[idx] = 0;
    let has_current = guard.current.is_some();
    drop(guard);

    if has_current {
        let state = unsafe { saved_exception_state() };
        cpu.load_state(state)
    } else {
        switch_process(cpu)
    }
}

/// Top-level entry point: reads the pending-interrupt bits from the saved
/// cause register, isolates the highest-priority line, and dispatches.
pub fn handle(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let pending = saved.cause & 0x0000_FE00;
    let line_bit = (pending as i32 & -(pending as i32)) as u32;

    match line_bit {
        0x0200 => plt_interrupt(cpu),
        0x0400 => system_interval_interrupt(cpu),
        0x0800 => nontimer_interrupt(cpu, DISKINT),
        0x1000 => nontimer_interrupt(cpu, FLASHINT),
        0x2000 => nontimer_interrupt(cpu, NETWINT),
        0x4000 => nontimer_interrupt(cpu, PRNTINT),
        0x8000 => nontimer_interrupt(cpu, TERMINT),
        _ => resume_or_schedule(cpu),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_set_bit_picks_highest_priority_device() {
        // device 0 and device 3 both pending; device 0 must win.
        assert_eq!(lowest_set_bit_index(0b1001), Some(0));
        assert_eq!(lowest_set_bit_index(0b1000), Some(3));
        assert_eq!(lowest_set_bit_index(0), None);
    }
}
