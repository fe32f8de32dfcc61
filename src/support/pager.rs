//! The pager: the TLB-refill handler, the TLB exception handler ("the
//! Pager" proper), and the swap pool they share.
//!
//! The swap pool is a fixed set of physical frames, each backed by one
//! u-proc's flash device (`device = asid - 1`, `block = page_number mod
//! 32`). A page fault picks a frame with a round-robin-from-last-victim
//! policy, writes back whatever it finds there, reads in the faulting
//! page, and retries the instruction.

use spin::Mutex;

use crate::hal::Cpu;
use crate::konst::{
    BLOCK_SHIFT, CAUSE_SHIFT, D_BIT_SET, EXC_TLB_MOD, FLASHINT, FLASH_READ, FLASH_WRITE,
    GET_EXC_CODE, MAX_FRAMES, MAX_PAGES, PAGE_SIZE, PGFAULTEXCEPT, POOLBASEADDR, READY,
    STATUS_IEC_ON, SUPP_FLASH, SYS3_PASSEREN, SYS4_VERHOGEN, SYS5_WAITIO, SYS8_GETSUPPORTDATA,
    VALIDOFF, VPN_MASK, VPN_SHIFT, V_BIT_SET,
};
use crate::types::{PageTableEntry, SupportStruct, SwapFrame};

struct SwapPool {
    frames: [SwapFrame; MAX_FRAMES],
    last_replaced: usize,
}

static SWAP_POOL: Mutex<SwapPool> = Mutex::new(SwapPool {
    frames: [SwapFrame::free(); MAX_FRAMES],
    last_replaced: 0,
});

static SWAP_SEM: Mutex<i32> = Mutex::new(crate::konst::SWAP_SEMAPHORE_INIT);

fn swap_sem_addr() -> u32 {
    let guard = SWAP_SEM.lock();
    &*guard as *const i32 as u32
}

pub fn init_swap_structs() {
    log_info!("swap pool initialized: {} frames", MAX_FRAMES);
}

/// Round-robin victim selection: prefer the first free frame found scanning
/// forward from the last replaced index; if none is free, evict the very
/// next one.
fn find_frame(pool: &mut SwapPool) -> usize {
    let mut iter = 0;
    while iter < MAX_FRAMES && pool.frames[(pool.last_replaced + iter) % MAX_FRAMES].asid.is_some()
    {
        iter += 1;
    }
    if iter == MAX_FRAMES {
        iter = 1;
    }
    pool.last_replaced = (pool.last_replaced + iter) % MAX_FRAMES;
    pool.last_replaced
}

/// Re-synchronize the TLB with a page table entry that has just changed, if
/// it happens to be cached.
fn update_tlb(cpu: &dyn Cpu, pte: &PageTableEntry) {
    cpu.set_entry_hi(pte.entry_hi);
    cpu.tlb_probe();
    if cpu.get_index() & crate::hal::INDEX_PROBE_MISS == 0 {
        cpu.set_entry_lo(pte.entry_lo);
        cpu.tlb_write_indexed();
    }
}

/// Run `f` with the global interrupt-enable bit cleared, restoring the
/// prior status word afterward. Used around the handful of updates that
/// must be atomic with respect to interrupts (TLB/swap-pool consistency).
pub(crate) fn with_interrupts_disabled<R>(cpu: &dyn Cpu, f: impl FnOnce() -> R) -> R {
    let prev = cpu.get_status();
    cpu.set_status(prev & !STATUS_IEC_ON);
    let result = f();
    cpu.set_status(prev);
    result
}

/// Read or write one 4KB block on a flash device, via the device's mutual
/// exclusion semaphore and a plain `SYS5` wait. Kills the caller (support
/// level program trap) if the device reports anything but `READY`.
pub(crate) fn flash_read_write(
    cpu: &dyn Cpu,
    device_num: usize,
    block_num: u32,
    op_type: u32,
    frame_addr: u32,
) {
    let supp_addr = cpu.syscall(SYS8_GETSUPPORTDATA, 0, 0, 0);
    let mutex_addr = crate::support::device_mutex_addr(SUPP_FLASH, device_num);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    crate::devreg::set_data0(FLASHINT, device_num, frame_addr);
    let command = (block_num << BLOCK_SHIFT) | op_type;

    let device_status = with_interrupts_disabled(cpu, || {
        crate::devreg::set_command(FLASHINT, device_num, command);
        cpu.syscall(SYS5_WAITIO, FLASHINT, device_num as u32, 0)
    });

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);

    if device_status != READY {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }
}

/// The address actually stored in the pass-up vector's TLB-refill slot; see
/// `exceptions::exception_entry_stub` for why a no-argument wrapper is
/// needed at this boundary.
pub extern "C" fn tlb_refill_entry_stub() -> ! {
    tlb_refill_handler(&crate::hal::UmpsCpu)
}

/// The TLB-refill handler proper: reached directly from the pass-up vector
/// on a genuine TLB miss, not via the general exception path, since it has
/// to be fast. Reads the current process's private page table directly
/// (no `SYS8` round trip) and writes the matching entry into a TLB slot
/// chosen by the hardware.
pub fn tlb_refill_handler(cpu: &dyn Cpu) -> ! {
    let saved = unsafe { crate::hal::saved_exception_state() };
    let vpn = ((saved.entry_hi & VPN_MASK) >> VPN_SHIFT) % MAX_PAGES as u32;

    let guard = crate::scheduler::NUCLEUS.lock();
    let current = guard
        .current
        .expect("TLB refill interrupt with no current process");
    let idx = guard
        .pcbs
        .pcb(current)
        .support
        .expect("TLB refill for a process with no support structure");
    let pte = guard.support_pool[idx].page_table[vpn as usize];
    drop(guard);

    cpu.set_entry_hi(pte.entry_hi);
    cpu.set_entry_lo(pte.entry_lo);
    cpu.tlb_write_random();
    cpu.load_state(saved)
}

/// The address a u-proc's `except_context[PGFAULTEXCEPT].pc` should be set
/// to; see `tlb_refill_entry_stub` for why a no-argument wrapper is needed.
pub extern "C" fn tlb_exception_entry_stub() -> ! {
    tlb_exception_handler(&crate::hal::UmpsCpu)
}

/// The Pager: the support level's TLB exception handler, entered via the
/// Nucleus's pass-up-or-die mechanism on any non-refill TLB event. Runs on
/// the faulting process's own TLB exception stack.
pub fn tlb_exception_handler(cpu: &dyn Cpu) -> ! {
    let supp_addr = cpu.syscall(SYS8_GETSUPPORTDATA, 0, 0, 0);
    let supp = unsafe { &mut *(supp_addr as *mut SupportStruct) };

    let cause = (supp.except_state[PGFAULTEXCEPT].cause & GET_EXC_CODE) >> CAUSE_SHIFT;
    if cause == EXC_TLB_MOD {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let swap_sem = swap_sem_addr();
    cpu.syscall(SYS3_PASSEREN, swap_sem, 0, 0);

    let missing_vpn = (supp.except_state[PGFAULTEXCEPT].entry_hi & VPN_MASK) >> VPN_SHIFT;
    let missing_page = (missing_vpn % MAX_PAGES as u32) as usize;

    let frame_idx = {
        let mut pool = SWAP_POOL.lock();
        find_frame(&mut pool)
    };
    let frame_addr = (frame_idx as u32) * PAGE_SIZE + POOLBASEADDR;

    let evicted = {
        let pool = SWAP_POOL.lock();
        pool.frames[frame_idx]
    };
    if let (Some(old_asid), Some(owner_pte_addr)) = (evicted.asid, evicted.owner_pte_addr) {
        with_interrupts_disabled(cpu, || {
            let owner_pte = unsafe { &mut *(owner_pte_addr as *mut PageTableEntry) };
            owner_pte.entry_lo &= VALIDOFF;
            update_tlb(cpu, owner_pte);
        });
        let old_page_num = evicted.page_number % MAX_PAGES as u32;
        let flash_no = (old_asid - 1) as usize;
        flash_read_write(cpu, flash_no, old_page_num, FLASH_WRITE, frame_addr);
    }

    let asid = supp.asid;
    let flash_no = (asid - 1) as usize;
    flash_read_write(cpu, flash_no, missing_page as u32, FLASH_READ, frame_addr);

    with_interrupts_disabled(cpu, || {
        let owner_pte_addr = &supp.page_table[missing_page] as *const PageTableEntry as u32;
        {
            let mut pool = SWAP_POOL.lock();
            pool.frames[frame_idx] = SwapFrame {
                asid: Some(asid),
                page_number: missing_page as u32,
                owner_pte_addr: Some(owner_pte_addr),
            };
        }
        supp.page_table[missing_page].entry_lo = frame_addr | D_BIT_SET | V_BIT_SET;
        update_tlb(cpu, &supp.page_table[missing_page]);
    });

    cpu.syscall(SYS4_VERHOGEN, swap_sem, 0, 0);
    cpu.load_state(&supp.except_state[PGFAULTEXCEPT])
}

/// Invalidate every valid entry in a terminating u-proc's page table and
/// evict it from the TLB if cached. Called once from `get_nuked` (SYS9); the
/// swap-pool frames the process still owns are left alone and simply get
/// overwritten the next time the victim-selection policy reaches them.
pub fn invalidate_page_table(cpu: &dyn Cpu, supp: &mut SupportStruct) {
    for pte in supp.page_table.iter_mut() {
        if pte.entry_lo & V_BIT_SET != 0 {
            with_interrupts_disabled(cpu, || {
                pte.entry_lo &= VALIDOFF;
                update_tlb(cpu, pte);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_frame_prefers_free_slot_before_evicting() {
        let mut pool = SwapPool {
            frames: [SwapFrame::free(); MAX_FRAMES],
            last_replaced: 0,
        };
        pool.frames[0].asid = Some(1);
        let chosen = find_frame(&mut pool);
        assert_eq!(chosen, 1);
    }

    #[test]
    fn find_frame_wraps_and_evicts_when_pool_is_full() {
        let mut pool = SwapPool {
            frames: [SwapFrame::free(); MAX_FRAMES],
            last_replaced: MAX_FRAMES - 1,
        };
        for f in pool.frames.iter_mut() {
            f.asid = Some(2);
        }
        let chosen = find_frame(&mut pool);
        assert_eq!(chosen, 0);
    }
}
