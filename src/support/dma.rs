//! DMA-backed block I/O for disks and flash devices: syscalls 14-17.
//!
//! Every disk and flash unit owns a fixed 4KB staging buffer (the "DMA
//! buffer"). A transfer copies between that buffer and the caller's own
//! virtual memory, then drives the device through its buffer via the usual
//! command/waitIO protocol. Disks additionally require translating a linear
//! sector number into a cylinder/head/sector triplet and issuing a SEEK
//! before the READ or WRITE; flash devices address blocks directly.

use crate::hal::Cpu;
use crate::konst::{
    DISKINT, DISK_CYL_CMD_SHIFT, DISK_CYL_SHIFT, DISK_HEAD_CMD_SHIFT, DISK_HEAD_MASK,
    DISK_HEAD_SHIFT, DISK_READ_BLK_CMD, DISK_SECT_CMD_SHIFT, DISK_SECT_MASK, DISK_SEEK_CMD,
    DISK_WRITE_BLK_CMD, DMA_BUFFERS_BASE, FLASHINT, FLASH_ADDR_SHIFT, FLASH_DMA_BASE, FLASH_READ,
    FLASH_WRITE, KUSEG, PAGE_SIZE, READY, SUPP_DISK, SUPP_FLASH, SYS3_PASSEREN, SYS4_VERHOGEN,
    SYS5_WAITIO, WORDS_PER_BLOCK,
};

fn disk_dma_buffer(unit: usize) -> u32 {
    DMA_BUFFERS_BASE + unit as u32 * PAGE_SIZE
}

fn flash_dma_buffer(unit: usize) -> u32 {
    FLASH_DMA_BASE + unit as u32 * PAGE_SIZE
}

/// Copy one 4KB block, word by word, between two physical/virtual addresses.
fn copy_block(src: u32, dst: u32) {
    let src = src as *const u32;
    let dst = dst as *mut u32;
    for i in 0..WORDS_PER_BLOCK {
        unsafe { *dst.add(i) = *src.add(i) };
    }
}

/// Disk geometry (max_cyl, max_head, max_sect) from the unit's DATA1 register.
fn disk_geometry(unit: usize) -> (u32, u32, u32) {
    let data1 = crate::devreg::data1(DISKINT, unit);
    let max_sect = data1 & DISK_SECT_MASK;
    let max_head = (data1 & DISK_HEAD_MASK) >> DISK_HEAD_SHIFT;
    let max_cyl = data1 >> DISK_CYL_SHIFT;
    (max_cyl, max_head, max_sect)
}

/// Seek to the cylinder containing `sector`, then issue a READ or WRITE for
/// that cylinder/head/sector triplet against `dma_addr`. Returns the final
/// device status (`READY` on success). Assumes the device mutex is already
/// held and interrupts are the caller's to manage around `waitIO`.
fn seek_and_transfer(cpu: &dyn Cpu, unit: usize, sector: u32, dma_addr: u32, write: bool) -> u32 {
    let (_, max_head, max_sect) = disk_geometry(unit);
    let per_cyl = max_head * max_sect;
    let cyl = sector / per_cyl;
    let rem = sector % per_cyl;
    let head = rem / max_sect;
    let sect = rem % max_sect;

    let seek_status = crate::support::pager::with_interrupts_disabled(cpu, || {
        crate::devreg::set_command(DISKINT, unit, (cyl << DISK_CYL_CMD_SHIFT) | DISK_SEEK_CMD);
        cpu.syscall(SYS5_WAITIO, DISKINT, unit as u32, 0)
    });
    if seek_status != READY {
        return seek_status;
    }

    crate::support::pager::with_interrupts_disabled(cpu, || {
        crate::devreg::set_data0(DISKINT, unit, dma_addr);
        let op = if write {
            DISK_WRITE_BLK_CMD
        } else {
            DISK_READ_BLK_CMD
        };
        let command = (head << DISK_HEAD_CMD_SHIFT) | (sect << DISK_SECT_CMD_SHIFT) | op;
        crate::devreg::set_command(DISKINT, unit, command);
        cpu.syscall(SYS5_WAITIO, DISKINT, unit as u32, 0)
    })
}

/// SYS14: write a 4KB block from the caller's virtual address to disk
/// `unit`, sector `sector`.
pub fn disk_put(cpu: &dyn Cpu, virt_addr: u32, unit: usize, sector: i32, supp_addr: u32) -> ! {
    let (max_cyl, max_head, max_sect) = disk_geometry(unit);
    if virt_addr < KUSEG || sector < 0 || sector as u32 >= max_cyl * max_head * max_sect {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let mutex_addr = crate::support::device_mutex_addr(SUPP_DISK, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let dma_addr = disk_dma_buffer(unit);
    copy_block(virt_addr, dma_addr);
    let status = seek_and_transfer(cpu, unit, sector as u32, dma_addr, true);

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    let v0 = if status == READY { status } else { (-(status as i32)) as u32 };
    crate::support::sysvec::finish(cpu, supp_addr, v0)
}

/// SYS15: read a 4KB block from disk `unit`, sector `sector`, into the
/// caller's virtual address.
pub fn disk_get(cpu: &dyn Cpu, virt_addr: u32, unit: usize, sector: i32, supp_addr: u32) -> ! {
    let (max_cyl, max_head, max_sect) = disk_geometry(unit);
    if virt_addr < KUSEG || sector < 0 || sector as u32 >= max_cyl * max_head * max_sect {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let mutex_addr = crate::support::device_mutex_addr(SUPP_DISK, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let dma_addr = disk_dma_buffer(unit);
    let status = seek_and_transfer(cpu, unit, sector as u32, dma_addr, false);
    if status == READY {
        copy_block(dma_addr, virt_addr);
    }

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    let v0 = if status == READY { status } else { (-(status as i32)) as u32 };
    crate::support::sysvec::finish(cpu, supp_addr, v0)
}

/// Shared body of SYS16/SYS17: validate, lock the flash unit, issue the
/// command, and move data the direction `op` implies.
fn flash_operation(cpu: &dyn Cpu, virt_addr: u32, unit: usize, block: u32, op: u32, supp_addr: u32) -> ! {
    if virt_addr < KUSEG {
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let mutex_addr = crate::support::device_mutex_addr(SUPP_FLASH, unit);
    cpu.syscall(SYS3_PASSEREN, mutex_addr, 0, 0);

    let max_block = crate::devreg::data1(FLASHINT, unit);
    if block >= max_block {
        cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
        crate::support::sysvec::program_trap_kill(cpu, supp_addr);
    }

    let dma_addr = flash_dma_buffer(unit);
    if op == FLASH_WRITE {
        copy_block(virt_addr, dma_addr);
    }

    let status = crate::support::pager::with_interrupts_disabled(cpu, || {
        crate::devreg::set_data0(FLASHINT, unit, dma_addr);
        crate::devreg::set_command(FLASHINT, unit, op | (block << FLASH_ADDR_SHIFT));
        cpu.syscall(SYS5_WAITIO, FLASHINT, unit as u32, 0)
    });

    if op == FLASH_READ && status == READY {
        copy_block(dma_addr, virt_addr);
    }

    cpu.syscall(SYS4_VERHOGEN, mutex_addr, 0, 0);
    let v0 = if status == READY { status } else { (-(status as i32)) as u32 };
    crate::support::sysvec::finish(cpu, supp_addr, v0)
}

/// SYS16: write a 4KB block from the caller's virtual address to flash
/// `unit`, block `block`.
pub fn flash_put(cpu: &dyn Cpu, virt_addr: u32, unit: usize, block: u32, supp_addr: u32) -> ! {
    flash_operation(cpu, virt_addr, unit, block, FLASH_WRITE, supp_addr)
}

/// SYS17: read a 4KB block from flash `unit`, block `block`, into the
/// caller's virtual address.
pub fn flash_get(cpu: &dyn Cpu, virt_addr: u32, unit: usize, block: u32, supp_addr: u32) -> ! {
    flash_operation(cpu, virt_addr, unit, block, FLASH_READ, supp_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_dma_buffers_are_distinct_and_page_aligned() {
        let a = disk_dma_buffer(0);
        let b = disk_dma_buffer(1);
        assert_eq!(b - a, PAGE_SIZE);
    }

    #[test]
    fn flash_dma_buffers_follow_disk_buffers() {
        assert!(flash_dma_buffer(0) >= DMA_BUFFERS_BASE);
    }

    #[test]
    fn cylinder_head_sector_decomposition_round_trips() {
        let max_head = 4u32;
        let max_sect = 16u32;
        let linear = 3 * max_head * max_sect + 2 * max_sect + 5;
        let per_cyl = max_head * max_sect;
        let cyl = linear / per_cyl;
        let rem = linear % per_cyl;
        let head = rem / max_sect;
        let sect = rem % max_sect;
        assert_eq!((cyl, head, sect), (3, 2, 5));
    }
}
