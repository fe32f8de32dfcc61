//! The Support Level: everything that runs above the Nucleus on behalf of a
//! user process (u-proc) rather than as part of it.
//!
//! Unlike the Nucleus, the support level is reached only indirectly -- a
//! u-proc's general or TLB exception is passed up from the Nucleus into the
//! handlers registered in its own `SupportStruct`, which in turn issue
//! ordinary Nucleus syscalls (`Cpu::syscall`) to get work done. Its state is
//! therefore module-local, not folded into `Nucleus`: a mutual-exclusion
//! semaphore per physical device (shared across every u-proc that might
//! want to print, read a terminal, or touch a disk/flash unit) and the swap
//! pool table the pager maintains.

pub mod delay;
pub mod dma;
pub mod pager;
pub mod sysvec;

use crate::konst::{NUM_SUPPORT_DEVICE_SEMS, SUPP_SEMA4_INIT};
use spin::Mutex;

/// One mutual-exclusion semaphore per physical device, shared by every
/// u-proc that might want to use it. Indexed by `(device_type_index) *
/// DEV_UNITS + unit`, where `device_type_index` is one of `konst::SUPP_DISK`
/// / `SUPP_FLASH` / `SUPP_PRINTER` / `SUPP_TERM_RECV` / `SUPP_TERM_TRANS` --
/// five categories, not the Nucleus's five interrupt lines: there is no
/// network entry here, and the terminal gets two (receive and transmit are
/// separate devices from the support level's point of view).
pub static DEVICE_MUTEX: Mutex<[i32; NUM_SUPPORT_DEVICE_SEMS]> =
    Mutex::new([SUPP_SEMA4_INIT; NUM_SUPPORT_DEVICE_SEMS]);

/// Address of the device mutex semaphore cell for `(device_type_index, unit)`,
/// suitable for passing to `SYS3`/`SYS4`.
pub fn device_mutex_addr(device_type_index: usize, unit: usize) -> u32 {
    let guard = DEVICE_MUTEX.lock();
    (&guard[device_type_index * crate::konst::DEV_UNITS + unit] as *const i32) as u32
}

/// Signalled once by every terminating u-proc so the instantiator can P it
/// `MAX_UPROC` times and know the whole fleet has shut down before it halts.
static MASTER_SEMAPHORE: Mutex<i32> = Mutex::new(0);

pub fn master_semaphore_addr() -> u32 {
    let guard = MASTER_SEMAPHORE.lock();
    &*guard as *const i32 as u32
}

pub fn init() {
    pager::init_swap_structs();
    delay::init();
}
