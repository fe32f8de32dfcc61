//! Numeric constants for the nucleus and support level.
//!
//! Mirrors the uMPS3/PandOS hardware and kernel constant set: memory layout,
//! device addressing, status/command codes, and pool capacities.

pub const PAGE_SIZE: u32 = 4096;
pub const WORD_LEN: u32 = 4;

/// Bus register area / BIOS-owned fixed addresses.
pub const RAMBASEADDR: u32 = 0x1000_0000;
pub const RAMBASESIZE: u32 = 0x1000_0004;
pub const TODLOADDR: u32 = 0x1000_001C;
pub const INTERVALTMR: u32 = 0x1000_0020;
pub const TIMESCALEADDR: u32 = 0x1000_0024;

/// Memory-mapped debug console: a single write-only byte register the
/// simulator drains to the host terminal. Not part of the device-register
/// area proper -- it exists purely for kernel logging, the way a real board
/// would expose a debug UART outside its normal bus devices.
pub const DEBUG_CONSOLE_ADDR: u32 = 0x0FFF_E000;

pub const BIOSDATAPAGE: u32 = 0x0FFF_F000;
pub const PASSUPVECTOR: u32 = 0x0FFF_F900;
pub const TOPSTKPAGE: u32 = 0x2000_1000;
pub const KUSEG: u32 = 0x8000_0000;

/// Device interrupt line numbers.
pub const DISKINT: u32 = 3;
pub const FLASHINT: u32 = 4;
pub const NETWINT: u32 = 5;
pub const PRNTINT: u32 = 6;
pub const TERMINT: u32 = 7;

pub const DEV_INT_NUM: usize = 5;
pub const DEV_PER_INT: usize = 8;
pub const DEV_REG_SIZE: u32 = 16;

/// Device common status codes.
pub const UNINSTALLED: u32 = 0;
pub const READY: u32 = 1;
pub const BUSY: u32 = 3;
pub const TERM_RECV_OK: u32 = 5;
pub const TERM_STATUS_MASK: u32 = 0xFF;

/// Device common command codes.
pub const RESET: u32 = 0;
pub const ACK: u32 = 1;
pub const TRANSMIT_CHAR: u32 = 2;
pub const PRINT_CHAR: u32 = 2;
pub const WRITE_BLK: u32 = 3;
pub const SEEK_CMD_BITS: u32 = 2;
pub const FLASH_READ: u32 = 2;
pub const FLASH_WRITE: u32 = 3;
pub const BLOCK_SHIFT: u32 = 8;
pub const CYL_SHIFT: u32 = 8;
pub const HEAD_SHIFT: u32 = 16;
pub const TERM_CHAR_SHIFT: u32 = 8;

pub const READ_BLK_CMD: u32 = 2;

/// Exception codes (`Cause.ExcCode`).
pub const CAUSE_SHIFT: u32 = 2;
pub const GET_EXC_CODE: u32 = 0x0000_007C;
pub const EXC_INTERRUPT: u32 = 0;
pub const EXC_TLB_MOD: u32 = 1;
pub const EXC_TLB_MAX: u32 = 3;
pub const EXC_SYSCALL: u32 = 8;
pub const EXC_RESERVED_INSTR: u32 = 10;

pub const PGFAULTEXCEPT: usize = 0;
pub const GENERALEXCEPT: usize = 1;

/// Paging.
pub const VPN_SHIFT: u32 = 12;
pub const VPN_MASK: u32 = 0xFFFF_F000;
pub const POOLBASEADDR: u32 = 0x2002_0000;
pub const V_BIT_SET: u32 = 0x0000_0200;
pub const D_BIT_SET: u32 = 0x0000_0400;
pub const VALIDOFF: u32 = !V_BIT_SET;

/// Status register bits.
pub const STATUS_ALL_OFF: u32 = 0x0;
pub const STATUS_IEC_ON: u32 = 0x0000_0001;
pub const STATUS_IEP_ON: u32 = 0x0000_0004;
pub const STATUS_KU_P_ON: u32 = 0x0000_0008;
pub const STATUS_INT_ON: u32 = 0x0000_FF00;
pub const STATUS_TE_ON: u32 = 0x0800_0000;
pub const STATUS_KUC_SHIFT: u32 = 1;
pub const STATUS_KUC_MASK: u32 = 0x1;

/// Pool capacities.
pub const MAX_PROC: usize = 20;
pub const MAX_SEMD: usize = 22;
pub const MAX_UPROC: usize = 8;
pub const MAX_FRAMES: usize = MAX_UPROC * 2;
pub const MAX_PAGES: usize = 32;
pub const MAX_DELAY_DESC: usize = MAX_UPROC + 2;

pub const SMALLEST_SEM_ADDR: u32 = 0x0000_0000;
pub const LARGEST_SEM_ADDR: u32 = 0x0FFF_FFFF;

/// Interrupt lines with their own device semaphores: disk, flash, network,
/// printer, terminal. The terminal line needs two semaphore slots per unit
/// (receive and transmit), so the flat Nucleus device-semaphore array has
/// room for one extra line's worth of units beyond this count.
pub const DEVICE_TYPES: usize = 5;
pub const DEV_UNITS: usize = 8;
/// 48 external sub-device semaphores (disk/flash/netw/prnt/term-recv/
/// term-trans, 8 units each) plus one pseudo-clock semaphore.
pub const NUM_DEVICE_SEMS: usize = (DEVICE_TYPES + 1) * DEV_UNITS + 1;
pub const PSEUDOCLOCK_IDX: usize = NUM_DEVICE_SEMS - 1;

/// Support-level device semaphore categories: disk, flash, printer,
/// terminal-receive, terminal-transmit (no network device at the support
/// level -- nothing above the Nucleus ever issues a network syscall).
pub const SUPP_DISK: usize = 0;
pub const SUPP_FLASH: usize = 1;
pub const SUPP_PRINTER: usize = 2;
pub const SUPP_TERM_RECV: usize = 3;
pub const SUPP_TERM_TRANS: usize = 4;
pub const NUM_SUPPORT_DEVICE_TYPES: usize = 5;
pub const NUM_SUPPORT_DEVICE_SEMS: usize = NUM_SUPPORT_DEVICE_TYPES * DEV_UNITS;
pub const SUPP_SEMA4_INIT: i32 = 1;
pub const SWAP_SEMAPHORE_INIT: i32 = 1;

pub const SCHED_TIME_SLICE: u32 = 5_000;
pub const INIT_INTERVAL_TIMER: u32 = 100_000;
pub const LARGE_TIME: u32 = 0xFFFF_FFFF;

pub const STATE_REG_NUM: usize = 31;

/// Named general-purpose register slots within `state_t.reg`.
pub mod reg {
    pub const AT: usize = 0;
    pub const V0: usize = 1;
    pub const V1: usize = 2;
    pub const A0: usize = 3;
    pub const A1: usize = 4;
    pub const A2: usize = 5;
    pub const A3: usize = 6;
    pub const T9: usize = 24;
    pub const SP: usize = 26;
}

/// Nucleus syscall numbers (kernel mode only).
pub const SYS1_CREATEPROCESS: i32 = 1;
pub const SYS2_TERMINATEPROCESS: i32 = 2;
pub const SYS3_PASSEREN: i32 = 3;
pub const SYS4_VERHOGEN: i32 = 4;
pub const SYS5_WAITIO: i32 = 5;
pub const SYS6_GETCPUTIME: i32 = 6;
pub const SYS7_WAITCLOCK: i32 = 7;
pub const SYS8_GETSUPPORTDATA: i32 = 8;

/// Support-level syscall numbers (user mode).
pub const SYS9_TERMINATE: i32 = 9;
pub const SYS10_GETTOD: i32 = 10;
pub const SYS11_WRITEPRINTER: i32 = 11;
pub const SYS12_WRITETERMINAL: i32 = 12;
pub const SYS13_READTERMINAL: i32 = 13;
pub const SYS14_DISKPUT: i32 = 14;
pub const SYS15_DISKGET: i32 = 15;
pub const SYS16_FLASHPUT: i32 = 16;
pub const SYS17_FLASHGET: i32 = 17;
pub const SYS18_DELAY: i32 = 18;

pub const MIN_SUPPORT_SYSCALL: i32 = SYS9_TERMINATE;
pub const MAX_SUPPORT_SYSCALL: i32 = SYS18_DELAY;

pub const MAX_PRINT_LEN: i32 = 128;

/// Disk geometry field extraction.
pub const DISK_SECT_MASK: u32 = 0x0000_00FF;
pub const DISK_HEAD_MASK: u32 = 0x0000_FF00;
pub const DISK_HEAD_SHIFT: u32 = 8;
pub const DISK_CYL_SHIFT: u32 = 16;

pub const FLASH_ADDR_SHIFT: u32 = BLOCK_SHIFT;

/// Disk command codes and geometry-field shifts (distinct from the flash
/// codes above: disks additionally need a seek phase).
pub const DISK_SEEK_CMD: u32 = 2;
pub const DISK_READ_BLK_CMD: u32 = 3;
pub const DISK_WRITE_BLK_CMD: u32 = 4;
pub const DISK_CYL_CMD_SHIFT: u32 = 8;
pub const DISK_HEAD_CMD_SHIFT: u32 = 16;
pub const DISK_SECT_CMD_SHIFT: u32 = 8;

/// Per-unit DMA staging buffers, one page each, placed directly above the
/// swap pool: disk units first, then flash units.
pub const DMA_BUFFERS_BASE: u32 = POOLBASEADDR + (MAX_FRAMES as u32) * PAGE_SIZE;
pub const FLASH_DMA_BASE: u32 = DMA_BUFFERS_BASE + (DEV_UNITS as u32) * PAGE_SIZE;
pub const WORDS_PER_BLOCK: usize = (PAGE_SIZE / WORD_LEN) as usize;
