//! Core data types shared by the nucleus and the support level: processor
//! state, page-table entries, device registers, and the per-process support
//! structure.

use crate::konst::{GENERALEXCEPT, MAX_PAGES, STATE_REG_NUM};

/// A saved MIPS processor state: the four control registers plus the 31
/// general-purpose registers. Laid out to match what the firmware stores at
/// the BIOS data page.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ProcessorState {
    pub entry_hi: u32,
    pub cause: u32,
    pub status: u32,
    pub pc: u32,
    pub reg: [u32; STATE_REG_NUM],
}

impl ProcessorState {
    pub const fn zeroed() -> Self {
        ProcessorState {
            entry_hi: 0,
            cause: 0,
            status: 0,
            pc: 0,
            reg: [0; STATE_REG_NUM],
        }
    }

    pub fn v0(&self) -> u32 {
        self.reg[crate::konst::reg::V0]
    }

    pub fn set_v0(&mut self, value: u32) {
        self.reg[crate::konst::reg::V0] = value;
    }

    pub fn a0(&self) -> u32 {
        self.reg[crate::konst::reg::A0]
    }

    pub fn a1(&self) -> u32 {
        self.reg[crate::konst::reg::A1]
    }

    pub fn a2(&self) -> u32 {
        self.reg[crate::konst::reg::A2]
    }

    pub fn a3(&self) -> u32 {
        self.reg[crate::konst::reg::A3]
    }
}

/// Context used for a pass-up (new stack pointer, status, and PC) -- loaded
/// when control transfers to a handler running on its own stack.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub stack_ptr: u32,
    pub status: u32,
    pub pc: u32,
}

impl Context {
    pub const fn zeroed() -> Self {
        Context {
            stack_ptr: 0,
            status: 0,
            pc: 0,
        }
    }
}

/// A single page-table entry: EntryHi (VPN + ASID) and EntryLo (PFN + bits).
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct PageTableEntry {
    pub entry_hi: u32,
    pub entry_lo: u32,
}

impl PageTableEntry {
    pub const fn zeroed() -> Self {
        PageTableEntry {
            entry_hi: 0,
            entry_lo: 0,
        }
    }
}

/// A four-word device register block, as found in the device-register area.
/// Terminal devices alias these same words as recv/transm status & command.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct DeviceRegister {
    pub status: u32,
    pub command: u32,
    pub data0: u32,
    pub data1: u32,
}

/// The pass-up vector: fixed location the boot stub/firmware consults to
/// find the nucleus's TLB-refill and general-exception entry points.
#[repr(C)]
pub struct PassUpVector {
    pub tlb_refill_handler: u32,
    pub tlb_refill_stack_ptr: u32,
    pub exception_handler: u32,
    pub exception_stack_ptr: u32,
}

/// Per-user-process support structure: owned by the support level, pointed
/// to by the process's PCB. Holds everything needed to run that process's
/// TLB and general exception handlers on their own stacks.
#[repr(C)]
pub struct SupportStruct {
    pub asid: i32,
    pub except_state: [ProcessorState; 2],
    pub except_context: [Context; 2],
    pub page_table: [PageTableEntry; MAX_PAGES],
    pub tlb_stack: [u32; 500],
    pub general_stack: [u32; 500],
    /// Private semaphore used to implement syscall 18 (delay).
    pub private_sem: i32,
    pub in_use: bool,
}

impl SupportStruct {
    pub const fn empty() -> Self {
        SupportStruct {
            asid: 0,
            except_state: [ProcessorState::zeroed(); 2],
            except_context: [Context::zeroed(); 2],
            page_table: [PageTableEntry::zeroed(); MAX_PAGES],
            tlb_stack: [0; 500],
            general_stack: [0; 500],
            private_sem: 0,
            in_use: false,
        }
    }

    pub fn general_except_state(&mut self) -> &mut ProcessorState {
        &mut self.except_state[GENERALEXCEPT]
    }
}

/// A swap-pool frame: the owning ASID (or `None` if free), the owner's
/// virtual page number, and the address of the owner's page-table entry so
/// the pager can invalidate it on eviction without a second lookup.
#[derive(Clone, Copy)]
pub struct SwapFrame {
    pub asid: Option<i32>,
    pub page_number: u32,
    pub owner_pte_addr: Option<u32>,
}

impl SwapFrame {
    pub const fn free() -> Self {
        SwapFrame {
            asid: None,
            page_number: 0,
            owner_pte_addr: None,
        }
    }
}

/// A delay-list descriptor, keyed by absolute wake time.
#[derive(Clone, Copy)]
pub struct DelayDescriptor {
    pub wake_time: u64,
    pub support: Option<usize>,
}

impl DelayDescriptor {
    pub const fn sentinel(wake_time: u64) -> Self {
        DelayDescriptor {
            wake_time,
            support: None,
        }
    }
}
