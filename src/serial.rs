//! Kernel logging over the memory-mapped debug console.
//!
//! One write-only register, drained byte by byte -- no handshake, no
//! interrupts, nothing the device-register area's command/status protocol
//! would warrant. Exists purely so `log_info!`/`log_warn!`/`log_error!` have
//! somewhere to go.

use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;

use crate::konst::DEBUG_CONSOLE_ADDR;

pub struct DebugConsole;

impl DebugConsole {
    fn send(&mut self, byte: u8) {
        unsafe {
            Volatile::new(&mut *(DEBUG_CONSOLE_ADDR as *mut u8)).write(byte);
        }
    }
}

impl core::fmt::Write for DebugConsole {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<DebugConsole> = Mutex::new(DebugConsole);
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    CONSOLE.lock().write_fmt(args).expect("write to debug console failed");
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[INFO] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[WARN] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[ERROR] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

pub fn init() {
    let _ = CONSOLE.lock();
}
