//! Accessors for the firmware-owned device-register area: a fixed-address
//! array of four-word blocks, one per external sub-device, addressed as
//! `(line - DISKINT) * DEV_PER_INT + unit`.

use crate::konst::{DEV_PER_INT, DEV_REG_SIZE, DISKINT, RAMBASEADDR};
use crate::types::DeviceRegister;
use volatile::Volatile;

/// Offset of the device-register array within the bus register area, per
/// the uMPS3 memory map (after the 11 fixed bus-status words).
const DEVREG_OFFSET: u32 = 0x54;

fn device_register_ptr(line: u32, unit: usize) -> *mut DeviceRegister {
    let index = (line - DISKINT) as usize * DEV_PER_INT + unit;
    (RAMBASEADDR + DEVREG_OFFSET + index as u32 * DEV_REG_SIZE) as *mut DeviceRegister
}

pub fn status(line: u32, unit: usize) -> u32 {
    unsafe { Volatile::new(&(*device_register_ptr(line, unit)).status).read() }
}

pub fn set_command(line: u32, unit: usize, value: u32) {
    unsafe { Volatile::new(&mut (*device_register_ptr(line, unit)).command).write(value) };
}

pub fn set_data0(line: u32, unit: usize, value: u32) {
    unsafe { Volatile::new(&mut (*device_register_ptr(line, unit)).data0).write(value) };
}

pub fn data0(line: u32, unit: usize) -> u32 {
    unsafe { Volatile::new(&(*device_register_ptr(line, unit)).data0).read() }
}

pub fn data1(line: u32, unit: usize) -> u32 {
    unsafe { Volatile::new(&(*device_register_ptr(line, unit)).data1).read() }
}

/// Terminal receiver sub-registers alias `status`/`command`.
pub fn term_recv_status(unit: usize) -> u32 {
    status(crate::konst::TERMINT, unit)
}

pub fn term_recv_ack(unit: usize) {
    set_command(crate::konst::TERMINT, unit, crate::konst::ACK);
}

/// Terminal transmitter sub-registers alias `data0`/`data1`.
pub fn term_transm_status(unit: usize) -> u32 {
    data0(crate::konst::TERMINT, unit)
}

pub fn term_transm_command(unit: usize, value: u32) {
    unsafe { Volatile::new(&mut (*device_register_ptr(crate::konst::TERMINT, unit)).data1).write(value) };
}

/// Bitmap of pending interrupts for a given line, read from the interrupt
/// device bitmap area preceding the device-register blocks.
pub fn interrupting_devices(line: u32) -> u32 {
    let line_idx = (line - DISKINT) as usize;
    let addr = RAMBASEADDR + 0x0000_0040 + (line_idx as u32) * 4;
    unsafe { Volatile::new(&*(addr as *const u32)).read() }
}
