//! The delay daemon: a time-ordered list of sleeping u-procs, and syscall 18.
//!
//! Mirrors the ASL's shape -- a sorted, free-list-backed pool of descriptors
//! bounded by two sentinels -- but keyed by absolute wake time instead of a
//! semaphore address, and owned by one dedicated kernel process (the daemon)
//! rather than by the interrupt handler.

use spin::Mutex;

use crate::hal::Cpu;
use crate::konst::{MAX_DELAY_DESC, SUPP_SEMA4_INIT, SYS1_CREATEPROCESS, SYS3_PASSEREN, SYS4_VERHOGEN, SYS7_WAITCLOCK, STATUS_IEC_ON};
use crate::types::{DelayDescriptor, ProcessorState};

const SECOND_IN_MICROS: u64 = 1_000_000;
const DUMMY_HEAD: usize = 0;
const DUMMY_TAIL: usize = 1;

struct Adl {
    slots: [DelayDescriptor; MAX_DELAY_DESC],
    next: [Option<usize>; MAX_DELAY_DESC],
    free_head: Option<usize>,
}

static ADL: Mutex<Adl> = Mutex::new(Adl {
    slots: [DelayDescriptor::sentinel(0); MAX_DELAY_DESC],
    next: [None; MAX_DELAY_DESC],
    free_head: None,
});

static ADL_SEM: Mutex<i32> = Mutex::new(SUPP_SEMA4_INIT);

fn adl_sem_addr() -> u32 {
    let guard = ADL_SEM.lock();
    &*guard as *const i32 as u32
}

/// Build the sorted list's two sentinels and chain the rest as the free
/// list. Does not launch the daemon process; that is `spawn`'s job, once a
/// `Cpu` is available to issue the creating syscall.
pub fn init() {
    let mut adl = ADL.lock();
    adl.slots[DUMMY_HEAD] = DelayDescriptor::sentinel(0);
    adl.slots[DUMMY_TAIL] = DelayDescriptor::sentinel(0xFFFF_FFFF_FFFF_FFFF);
    adl.next[DUMMY_HEAD] = Some(DUMMY_TAIL);
    adl.next[DUMMY_TAIL] = None;

    for i in 2..MAX_DELAY_DESC {
        adl.next[i] = if i + 1 < MAX_DELAY_DESC { Some(i + 1) } else { None };
    }
    adl.free_head = if MAX_DELAY_DESC > 2 { Some(2) } else { None };
    log_info!("delay list initialized: {} descriptors", MAX_DELAY_DESC);
}

fn alloc(adl: &mut Adl) -> Option<usize> {
    let id = adl.free_head?;
    adl.free_head = adl.next[id];
    Some(id)
}

fn release(adl: &mut Adl, id: usize) {
    adl.next[id] = adl.free_head;
    adl.free_head = Some(id);
}

/// Insert a descriptor for `support` waking at `wake_time`, keeping the list
/// sorted. Returns `false` if the descriptor pool is exhausted.
fn insert(adl: &mut Adl, wake_time: u64, support: usize) -> bool {
    let Some(fresh) = alloc(adl) else {
        return false;
    };
    adl.slots[fresh] = DelayDescriptor {
        wake_time,
        support: Some(support),
    };

    let mut prev = DUMMY_HEAD;
    let mut cur = adl.next[prev].unwrap();
    while cur != DUMMY_TAIL && adl.slots[cur].wake_time < wake_time {
        prev = cur;
        cur = adl.next[cur].unwrap();
    }
    adl.next[fresh] = Some(cur);
    adl.next[prev] = Some(fresh);
    true
}

/// Entry point for the kernel-spawned delay daemon process. Loops forever:
/// wait for the next 100ms tick, then wake every descriptor whose time has
/// come. Never returns -- it is a process in its own right, not a routine
/// called from one, so (like any process entry point) it takes no arguments
/// and drives itself through the real `Cpu` rather than a borrowed one.
pub extern "C" fn daemon_entry() -> ! {
    let cpu = &crate::hal::UmpsCpu;
    loop {
        cpu.syscall(SYS7_WAITCLOCK, 0, 0, 0);
        let sem_addr = adl_sem_addr();
        cpu.syscall(SYS3_PASSEREN, sem_addr, 0, 0);

        let now = cpu.tod();
        loop {
            let mut adl = ADL.lock();
            let head_next = adl.next[DUMMY_HEAD].unwrap();
            if head_next == DUMMY_TAIL || adl.slots[head_next].wake_time > now {
                break;
            }
            let support_idx = adl.slots[head_next].support;
            adl.next[DUMMY_HEAD] = adl.next[head_next];
            release(&mut adl, head_next);
            drop(adl);

            if let Some(idx) = support_idx {
                let private_addr = {
                    let guard = crate::scheduler::NUCLEUS.lock();
                    (&guard.support_pool[idx].private_sem) as *const i32 as u32
                };
                cpu.syscall(SYS4_VERHOGEN, private_addr, 0, 0);
            }
        }

        cpu.syscall(SYS4_VERHOGEN, sem_addr, 0, 0);
    }
}

/// SYS18: put the caller to sleep for `seconds`. Negative durations kill the
/// caller; zero is a no-op; anything else inserts a descriptor and blocks on
/// the caller's own private semaphore, with the release-the-list-then-block
/// step done atomically (interrupts off) so the daemon cannot run between
/// them and signal a semaphore nobody is waiting on yet.
pub fn sys18_handler(cpu: &dyn Cpu, supp_addr: u32, seconds: u32) -> ! {
    let seconds = seconds as i32;
    if seconds == 0 {
        return crate::support::sysvec::finish(cpu, supp_addr, 0);
    }
    if seconds < 0 {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let sem_addr = adl_sem_addr();
    cpu.syscall(SYS3_PASSEREN, sem_addr, 0, 0);

    let wake_time = cpu.tod() + (seconds as u64) * SECOND_IN_MICROS;
    let support_idx = {
        let guard = crate::scheduler::NUCLEUS.lock();
        let current = guard.current.expect("SYS18 with no current process");
        guard.pcbs.pcb(current).support.expect("SYS18 from a process with no support structure")
    };

    let inserted = insert(&mut ADL.lock(), wake_time, support_idx);
    if !inserted {
        cpu.syscall(SYS4_VERHOGEN, sem_addr, 0, 0);
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let private_addr = {
        let guard = crate::scheduler::NUCLEUS.lock();
        (&guard.support_pool[support_idx].private_sem) as *const i32 as u32
    };

    let prev_status = cpu.get_status();
    cpu.set_status(prev_status & !STATUS_IEC_ON);
    cpu.syscall(SYS4_VERHOGEN, sem_addr, 0, 0);
    cpu.syscall(SYS3_PASSEREN, private_addr, 0, 0);
    cpu.set_status(prev_status);

    crate::support::sysvec::finish(cpu, supp_addr, 0)
}

/// Create the delay daemon as an ordinary kernel process: a bare state with
/// no support structure, entry point `daemon_entry`, running in kernel mode
/// with interrupts and the local timer enabled.
pub fn spawn(cpu: &dyn Cpu) {
    let mut state = ProcessorState::zeroed();
    state.pc = daemon_entry as usize as u32;
    state.reg[crate::konst::reg::T9] = daemon_entry as usize as u32;
    state.reg[crate::konst::reg::SP] = cpu.ram_top();
    state.status = crate::konst::STATUS_IEP_ON | crate::konst::STATUS_TE_ON | crate::konst::STATUS_INT_ON;

    let result = cpu.syscall(SYS1_CREATEPROCESS, &state as *const ProcessorState as u32, u32::MAX, 0);
    if result as i32 == -1 {
        crate::scheduler::fatal("PCB pool exhausted spawning the delay daemon");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_list_sorted_by_wake_time() {
        let mut adl = Adl {
            slots: [DelayDescriptor::sentinel(0); MAX_DELAY_DESC],
            next: [None; MAX_DELAY_DESC],
            free_head: None,
        };
        adl.slots[DUMMY_HEAD] = DelayDescriptor::sentinel(0);
        adl.slots[DUMMY_TAIL] = DelayDescriptor::sentinel(u64::MAX);
        adl.next[DUMMY_HEAD] = Some(DUMMY_TAIL);
        for i in 2..MAX_DELAY_DESC {
            adl.next[i] = if i + 1 < MAX_DELAY_DESC { Some(i + 1) } else { None };
        }
        adl.free_head = Some(2);

        assert!(insert(&mut adl, 300, 1));
        assert!(insert(&mut adl, 100, 2));
        assert!(insert(&mut adl, 200, 3));

        let mut cur = adl.next[DUMMY_HEAD].unwrap();
        let mut times = Vec::new();
        while cur != DUMMY_TAIL {
            times.push(adl.slots[cur].wake_time);
            cur = adl.next[cur].unwrap();
        }
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn insert_fails_when_pool_exhausted() {
        let mut adl = Adl {
            slots: [DelayDescriptor::sentinel(0); MAX_DELAY_DESC],
            next: [None; MAX_DELAY_DESC],
            free_head: None,
        };
        adl.next[DUMMY_HEAD] = Some(DUMMY_TAIL);
        adl.free_head = None;
        assert!(!insert(&mut adl, 42, 0));
    }
}
