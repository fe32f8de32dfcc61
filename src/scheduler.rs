//! Global nucleus state and the preemptive round-robin scheduler.
//!
//! The nucleus is single-threaded: there is one current process, one ready
//! queue, and one copy of the bookkeeping counters. They are packaged as a
//! single `Nucleus` value behind a `spin::Mutex`, initialized once at boot
//! and accessed only from the exception entry point, which acts as the
//! system's sole serialization barrier.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::asl::Asl;
use crate::hal::Cpu;
use crate::konst::{
    MAX_UPROC, NUM_DEVICE_SEMS, PSEUDOCLOCK_IDX, SCHED_TIME_SLICE,
};
use crate::pcb::{PcbId, PcbPool, ProcQueue};
use crate::types::{ProcessorState, SupportStruct};

pub struct Nucleus {
    pub pcbs: PcbPool,
    pub asl: Asl,
    pub ready_queue: ProcQueue,
    pub current: Option<PcbId>,
    pub process_count: i32,
    pub soft_block_count: i32,
    /// 40 external sub-device semaphores plus one pseudo-clock semaphore.
    pub device_sems: [i32; NUM_DEVICE_SEMS],
    pub quantum_start: u64,
    /// One support structure per potential u-proc, indexed by `Pcb::support`.
    pub support_pool: [SupportStruct; MAX_UPROC],
}

impl Nucleus {
    pub(crate) const fn new() -> Self {
        Nucleus {
            pcbs: PcbPool::new(),
            asl: Asl::new(),
            ready_queue: ProcQueue::empty(),
            current: None,
            process_count: 0,
            soft_block_count: 0,
            device_sems: [0; NUM_DEVICE_SEMS],
            quantum_start: 0,
            support_pool: [const { SupportStruct::empty() }; MAX_UPROC],
        }
    }

    pub fn init(&mut self) {
        self.pcbs.init();
        self.asl.init();
        self.ready_queue = ProcQueue::empty();
        self.current = None;
        self.process_count = 0;
        self.soft_block_count = 0;
        self.device_sems = [0; NUM_DEVICE_SEMS];
        self.quantum_start = 0;
        self.support_pool = [const { SupportStruct::empty() }; MAX_UPROC];
    }

    /// Allocate a free support structure slot, if any, and mark it in use.
    pub fn alloc_support(&mut self) -> Option<usize> {
        let idx = self.support_pool.iter().position(|s| !s.in_use)?;
        self.support_pool[idx].in_use = true;
        Some(idx)
    }

    pub fn free_support(&mut self, idx: usize) {
        self.support_pool[idx] = SupportStruct::empty();
    }

    pub fn support_addr(&self, idx: usize) -> u32 {
        (&self.support_pool[idx] as *const SupportStruct) as u32
    }

    pub fn device_sem_addr(&self, index: usize) -> u32 {
        (&self.device_sems[index] as *const i32) as u32
    }

    pub fn pseudo_clock_addr(&self) -> u32 {
        self.device_sem_addr(PSEUDOCLOCK_IDX)
    }

    /// Charge the elapsed time since the current quantum began to `p`.
    pub fn charge_elapsed(&mut self, cpu: &dyn Cpu, p: PcbId) {
        let elapsed = cpu.tod().saturating_sub(self.quantum_start) as u32;
        self.pcbs.pcb_mut(p).time += elapsed;
    }
}

lazy_static! {
    pub static ref NUCLEUS: Mutex<Nucleus> = Mutex::new(Nucleus::new());
}

pub fn init() {
    NUCLEUS.lock().init();
    log_info!("nucleus pools initialized: pcb/asl/device semaphores");
}

/// Context-switch to `p`: record the quantum start time and load its saved
/// state. Never returns.
fn switch_context(cpu: &dyn Cpu, mut guard: spin::MutexGuard<'_, Nucleus>, p: PcbId) -> ! {
    guard.current = Some(p);
    guard.quantum_start = cpu.tod();
    let state: ProcessorState = guard.pcbs.pcb(p).state;
    drop(guard);
    cpu.load_state(&state)
}

/// Pop the next ready process and run it, or halt/wait/panic if the ready
/// queue is empty. Never returns.
pub fn switch_process(cpu: &dyn Cpu) -> ! {
    let mut guard = NUCLEUS.lock();
    let next = {
        let n = &mut *guard;
        n.pcbs.remove_queue(&mut n.ready_queue)
    };

    if let Some(p) = next {
        cpu.set_timer(SCHED_TIME_SLICE);
        return switch_context(cpu, guard, p);
    }

    if guard.process_count == 0 {
        log_info!("no processes remain; halting");
        drop(guard);
        halt();
    }

    if guard.process_count > 0 && guard.soft_block_count > 0 {
        cpu.set_status(crate::konst::STATUS_ALL_OFF | crate::konst::STATUS_INT_ON | crate::konst::STATUS_IEC_ON);
        cpu.set_timer(crate::konst::LARGE_TIME);
        drop(guard);
        wait();
    }

    log_error!("deadlock: processes exist but none are ready or soft-blocked");
    drop(guard);
    panic_halt();
}

/// Log a fatal internal-consistency error and stop the virtual machine.
/// Used by callers that hit an unrecoverable resource-pool exhaustion (e.g.
/// the ASL or support-structure pools), which the original design treats as
/// a nucleus bug rather than a recoverable condition.
pub fn fatal(msg: &str) -> ! {
    log_error!("{}", msg);
    panic_halt()
}

#[cfg(not(test))]
fn halt() -> ! {
    unsafe { crate::hal::halt() }
}

#[cfg(not(test))]
fn wait() -> ! {
    unsafe { crate::hal::wait() }
}

#[cfg(not(test))]
fn panic_halt() -> ! {
    unsafe { crate::hal::panic_instr() }
}

#[cfg(test)]
fn halt() -> ! {
    panic!("halt")
}

#[cfg(test)]
fn wait() -> ! {
    panic!("wait")
}

#[cfg(test)]
fn panic_halt() -> ! {
    panic!("deadlock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_count_tracks_ready_and_current() {
        let mut n = Nucleus::new();
        n.init();
        let p = n.pcbs.alloc().unwrap();
        n.process_count += 1;
        n.pcbs.insert_queue(&mut n.ready_queue, p);
        assert_eq!(n.process_count, 1);
        assert_eq!(n.pcbs.remove_queue(&mut n.ready_queue), Some(p));
    }

    #[test]
    fn device_sem_addr_is_stable_and_distinct() {
        let n = Nucleus::new();
        let a = n.device_sem_addr(0);
        let b = n.device_sem_addr(1);
        assert_ne!(a, b);
        assert_eq!(n.pseudo_clock_addr(), n.device_sem_addr(PSEUDOCLOCK_IDX));
    }
}
