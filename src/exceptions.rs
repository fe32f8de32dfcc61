//! The general exception dispatcher and the eight kernel-mode ("Nucleus")
//! syscalls (1-8).
//!
//! Every exception -- interrupt, TLB event, or syscall -- lands here first.
//! The dispatcher reads the exception code out of the saved Cause register
//! and routes to the interrupt handler, the pager, or a syscall handler.
//! Anything else (and any syscall attempted from user mode) is a program
//! trap, handled by the same pass-up-or-die mechanism the pager uses for
//! page-fault exceptions.

use crate::hal::{saved_exception_state, Cpu};
use crate::konst::{
    CAUSE_SHIFT, DISKINT, DEV_UNITS, EXC_INTERRUPT, EXC_RESERVED_INSTR, EXC_SYSCALL, EXC_TLB_MAX,
    GENERALEXCEPT, GET_EXC_CODE, PGFAULTEXCEPT, STATUS_KUC_MASK, STATUS_KUC_SHIFT,
    SYS1_CREATEPROCESS, SYS2_TERMINATEPROCESS, SYS3_PASSEREN, SYS4_VERHOGEN, SYS5_WAITIO,
    SYS6_GETCPUTIME, SYS7_WAITCLOCK, SYS8_GETSUPPORTDATA, TERMINT, WORD_LEN,
};
use crate::pcb::PcbId;
use crate::scheduler::{switch_process, Nucleus, NUCLEUS};
use crate::types::ProcessorState;

/// The address actually stored in the pass-up vector's general-exception
/// slot. The firmware jumps here with no arguments, so the handler proper
/// (`handle`, which takes a `&dyn Cpu` and is what the tests exercise)
/// cannot be the target directly; this stub supplies the one `Cpu` there is.
pub extern "C" fn exception_entry_stub() -> ! {
    handle(&crate::hal::UmpsCpu)
}

/// Top-level exception entry point: the pass-up vector's general-exception
/// handler points here. Never returns.
pub fn handle(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let code = (saved.cause & GET_EXC_CODE) >> CAUSE_SHIFT;
    match code {
        EXC_INTERRUPT => crate::interrupts::handle(cpu),
        1..=EXC_TLB_MAX => pass_up_or_die(cpu, PGFAULTEXCEPT),
        EXC_SYSCALL => syscall_dispatch(cpu),
        _ => program_trap(cpu),
    }
}

fn syscall_dispatch(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let from_user_mode = (saved.status >> STATUS_KUC_SHIFT) & STATUS_KUC_MASK != 0;
    let code = saved.a0() as i32;

    if from_user_mode && (SYS1_CREATEPROCESS..=SYS8_GETSUPPORTDATA).contains(&code) {
        saved.cause = (saved.cause & !GET_EXC_CODE) | (EXC_RESERVED_INSTR << CAUSE_SHIFT);
        return program_trap(cpu);
    }

    saved.pc += WORD_LEN;
    match code {
        SYS1_CREATEPROCESS => sys_create_process(cpu),
        SYS2_TERMINATEPROCESS => sys_terminate_process(cpu),
        SYS3_PASSEREN => sys_passeren(cpu),
        SYS4_VERHOGEN => sys_verhogen(cpu),
        SYS5_WAITIO => sys_wait_io(cpu),
        SYS6_GETCPUTIME => sys_get_cpu_time(cpu),
        SYS7_WAITCLOCK => sys_wait_clock(cpu),
        SYS8_GETSUPPORTDATA => sys_get_support_data(cpu),
        _ => program_trap(cpu),
    }
}

/// Resume the process that issued the just-handled syscall: the saved state
/// already has its v0 (and PC) updated in place.
fn resume_current(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    cpu.load_state(saved)
}

/// SYS1: allocate a child PCB, seed it with the caller-supplied initial
/// state, and place it on the ready queue. `a1` is the address of a
/// `ProcessorState` to copy; `a2` is the index of a pre-allocated support
/// structure, or `u32::MAX` if the child has none. Returns 0 in v0 on
/// success, or -1 if the PCB pool is exhausted.
fn sys_create_process(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let state_ptr = saved.a1() as *const ProcessorState;
    let support_raw = saved.a2();

    let mut guard = NUCLEUS.lock();
    let current = guard.current.expect("SYS1 with no current process");
    let result = match guard.pcbs.alloc() {
        Some(child) => {
            let new_state = unsafe { *state_ptr };
            {
                let c = guard.pcbs.pcb_mut(child);
                c.state = new_state;
                c.time = 0;
                c.support = if support_raw == u32::MAX {
                    None
                } else {
                    Some(support_raw as usize)
                };
            }
            guard.pcbs.insert_child(current, child);
            {
                let n = &mut *guard;
                n.pcbs.insert_queue(&mut n.ready_queue, child);
            }
            guard.process_count += 1;
            0
        }
        None => -1,
    };
    saved.set_v0(result as u32);
    drop(guard);
    resume_current(cpu)
}

/// SYS2: detach the caller from its parent, then recursively terminate it
/// and its entire descendant subtree.
fn sys_terminate_process(cpu: &dyn Cpu) -> ! {
    let mut guard = NUCLEUS.lock();
    let current = guard.current.take().expect("SYS2 with no current process");
    guard.pcbs.out_child(current);
    terminate_recursive(&mut guard, current);
    drop(guard);
    switch_process(cpu)
}

/// Kill `p` and, first, every process in its subtree. Children are detached
/// from `p` one at a time and recursively killed before `p` itself is torn
/// down, so a parent never outlives the children it is terminating.
fn terminate_recursive(n: &mut Nucleus, p: PcbId) {
    while let Some(child) = n.pcbs.first_child(p) {
        n.pcbs.out_child(child);
        terminate_recursive(n, child);
    }
    remove_victim(n, p);
    if let Some(idx) = n.pcbs.pcb(p).support {
        n.free_support(idx);
    }
    n.pcbs.free(p);
    n.process_count -= 1;
}

/// Remove `p` from wherever it currently lives (ready queue or ASL) and
/// release whatever resource it held, so killing a blocked process never
/// leaves a semaphore permanently short one V.
fn remove_victim(n: &mut Nucleus, p: PcbId) {
    if n.pcbs.out_queue(&mut n.ready_queue, p).is_some() {
        return;
    }
    if let Some(sem_addr) = n.pcbs.pcb(p).sem_addr {
        let soft = is_device_sem(n, sem_addr);
        n.asl.out_blocked(&mut n.pcbs, p);
        if soft {
            n.soft_block_count -= 1;
        } else {
            bump_semaphore(sem_addr);
        }
    }
}

fn is_device_sem(n: &Nucleus, addr: u32) -> bool {
    addr >= n.device_sem_addr(0) && addr <= n.pseudo_clock_addr()
}

/// Increment the semaphore cell at `addr` directly, the way `verhogen`
/// would, without waking anything. Used when a blocked victim is killed out
/// from under the semaphore it held.
fn bump_semaphore(addr: u32) {
    unsafe {
        *(addr as *mut i32) += 1;
    }
}

/// SYS3: P on the semaphore at `a1`. Blocks the caller if the post-decrement
/// value is negative.
fn sys_passeren(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let sem_addr = saved.a1();
    let value = unsafe {
        let cell = sem_addr as *mut i32;
        *cell -= 1;
        *cell
    };

    if value >= 0 {
        return resume_current(cpu);
    }

    let mut guard = NUCLEUS.lock();
    let current = guard.current.take().expect("SYS3 with no current process");
    guard.pcbs.pcb_mut(current).state = *saved;
    guard.charge_elapsed(cpu, current);
    let blocked = {
        let n = &mut *guard;
        n.asl.insert_blocked(&mut n.pcbs, sem_addr, current)
    };
    if !blocked {
        drop(guard);
        crate::scheduler::fatal("ASL descriptor pool exhausted in passeren");
    }
    drop(guard);
    switch_process(cpu)
}

/// SYS4: V on the semaphore at `a1`. Wakes the semaphore's oldest blocked
/// process, if any, but never blocks the caller.
fn sys_verhogen(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let sem_addr = saved.a1();
    let value = unsafe {
        let cell = sem_addr as *mut i32;
        *cell += 1;
        *cell
    };

    if value <= 0 {
        let mut guard = NUCLEUS.lock();
        let woken = {
            let n = &mut *guard;
            n.asl.remove_blocked(&mut n.pcbs, sem_addr)
        };
        if let Some(p) = woken {
            let n = &mut *guard;
            n.pcbs.insert_queue(&mut n.ready_queue, p);
        }
    }
    resume_current(cpu)
}

/// SYS5: block the caller on the device semaphore identified by
/// `(a1 = interrupt line, a2 = device unit, a3 = wait-for-transmit)` until
/// the matching interrupt handler V's it.
fn sys_wait_io(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let line = saved.a1();
    let unit = saved.a2() as usize;
    let wait_for_transmit = saved.a3() != 0;

    let mut guard = NUCLEUS.lock();
    let mut index = (line - DISKINT) as usize * DEV_UNITS + unit;
    if line == TERMINT && wait_for_transmit {
        index += DEV_UNITS;
    }
    let sem_addr = guard.device_sem_addr(index);
    guard.device_sems[index] -= 1;
    let should_block = guard.device_sems[index] < 0;

    let current = guard.current.take().expect("SYS5 with no current process");
    guard.pcbs.pcb_mut(current).state = *saved;
    guard.charge_elapsed(cpu, current);

    if should_block {
        let blocked = {
            let n = &mut *guard;
            n.asl.insert_blocked(&mut n.pcbs, sem_addr, current)
        };
        if !blocked {
            drop(guard);
            crate::scheduler::fatal("ASL descriptor pool exhausted in waitForIO");
        }
        guard.soft_block_count += 1;
    } else {
        // The matching interrupt already fired and V'd this semaphore
        // before we got here; run again immediately.
        let n = &mut *guard;
        n.pcbs.insert_queue(&mut n.ready_queue, current);
    }
    drop(guard);
    switch_process(cpu)
}

/// SYS6: report the caller's accumulated CPU time, including the still-open
/// current quantum, in v0.
fn sys_get_cpu_time(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let guard = NUCLEUS.lock();
    let current = guard.current.expect("SYS6 with no current process");
    let elapsed = cpu.tod().saturating_sub(guard.quantum_start) as u32;
    let total = guard.pcbs.pcb(current).time + elapsed;
    drop(guard);
    saved.set_v0(total);
    resume_current(cpu)
}

/// SYS7: block the caller on the pseudo-clock semaphore until the next
/// system-wide interval-timer interrupt.
fn sys_wait_clock(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let mut guard = NUCLEUS.lock();
    let sem_addr = guard.pseudo_clock_addr();
    let idx = crate::konst::PSEUDOCLOCK_IDX;
    guard.device_sems[idx] -= 1;

    let current = guard.current.take().expect("SYS7 with no current process");
    guard.pcbs.pcb_mut(current).state = *saved;
    guard.charge_elapsed(cpu, current);
    let blocked = {
        let n = &mut *guard;
        n.asl.insert_blocked(&mut n.pcbs, sem_addr, current)
    };
    if !blocked {
        drop(guard);
        crate::scheduler::fatal("ASL descriptor pool exhausted in waitForClock");
    }
    guard.soft_block_count += 1;
    drop(guard);
    switch_process(cpu)
}

/// SYS8: report the address of the caller's support structure in v0, or 0
/// if it has none.
fn sys_get_support_data(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { saved_exception_state() };
    let guard = NUCLEUS.lock();
    let current = guard.current.expect("SYS8 with no current process");
    let addr = match guard.pcbs.pcb(current).support {
        Some(idx) => guard.support_addr(idx),
        None => 0,
    };
    drop(guard);
    saved.set_v0(addr);
    resume_current(cpu)
}

/// Shared pass-up-or-die mechanism for program traps and (via the pager)
/// page-fault exceptions: if the current process has a support structure,
/// copy the saved state into `except_state[which]` and transfer to
/// `except_context[which]`; otherwise the process has no handler of its own
/// and is killed outright.
pub fn pass_up_or_die(cpu: &dyn Cpu, which: usize) -> ! {
    let saved = unsafe { saved_exception_state() };
    let mut guard = NUCLEUS.lock();
    let current = guard.current.expect("exception with no current process");

    match guard.pcbs.pcb(current).support {
        Some(idx) => {
            guard.support_pool[idx].except_state[which] = *saved;
            let ctx = guard.support_pool[idx].except_context[which];
            drop(guard);
            cpu.load_context(&ctx)
        }
        None => {
            guard.pcbs.out_child(current);
            terminate_recursive(&mut guard, current);
            guard.current = None;
            drop(guard);
            switch_process(cpu)
        }
    }
}

fn program_trap(cpu: &dyn Cpu) -> ! {
    pass_up_or_die(cpu, GENERALEXCEPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_recursive_kills_whole_subtree() {
        let mut n = Nucleus::new();
        n.init();
        let root = n.pcbs.alloc().unwrap();
        let child = n.pcbs.alloc().unwrap();
        let grandchild = n.pcbs.alloc().unwrap();
        n.pcbs.insert_child(root, child);
        n.pcbs.insert_child(child, grandchild);
        n.process_count = 3;

        terminate_recursive(&mut n, child);

        assert_eq!(n.process_count, 1);
        assert!(n.pcbs.empty_child(root));
    }

    #[test]
    fn remove_victim_releases_regular_semaphore() {
        let mut n = Nucleus::new();
        n.init();
        let mut sem_cell: i32 = -1;
        let addr = &mut sem_cell as *mut i32 as u32;
        let p = n.pcbs.alloc().unwrap();
        n.asl.insert_blocked(&mut n.pcbs, addr, p);

        remove_victim(&mut n, p);

        assert_eq!(sem_cell, 0);
    }

    #[test]
    fn remove_victim_decrements_soft_block_for_device_sem() {
        let mut n = Nucleus::new();
        n.init();
        n.soft_block_count = 1;
        let addr = n.device_sem_addr(0);
        let p = n.pcbs.alloc().unwrap();
        n.asl.insert_blocked(&mut n.pcbs, addr, p);

        remove_victim(&mut n, p);

        assert_eq!(n.soft_block_count, 0);
    }
}
