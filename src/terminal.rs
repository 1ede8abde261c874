//! Debug console on terminal 0's transmit subdevice. Output is
//! synchronous and polled, so it works before the interrupt machinery is
//! up and inside handlers; used only for bootstrap and fatal paths.

use crate::interrupts::{device_sem_index, TERMINAL_LINE};
use crate::uarm::{self, TermRegister};
use lazy_static::lazy_static;
use spin::Mutex;

const CMD_TRANSMIT: u32 = 2;
const CHAR_SHIFT: u32 = 8;
const STATUS_MASK: u32 = 0xFF;
const STATUS_BUSY: u32 = 3;

pub struct TerminalWriter {
    reg: u32,
}

impl TerminalWriter {
    fn new() -> TerminalWriter {
        TerminalWriter {
            reg: uarm::device_register_addr(device_sem_index(TERMINAL_LINE, 0)),
        }
    }

    fn send(&mut self, byte: u8) {
        let term = unsafe { &mut *uarm::phys::<TermRegister>(self.reg) };
        term.transm_command
            .write((byte as u32) << CHAR_SHIFT | CMD_TRANSMIT);
        while (term.transm_status.read() & STATUS_MASK) == STATUS_BUSY {}
        // Clear the completion interrupt we just polled for.
        term.transm_command.write(uarm::CMD_ACK);
    }
}

impl core::fmt::Write for TerminalWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref TERMINAL: Mutex<TerminalWriter> = Mutex::new(TerminalWriter::new());
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    #[cfg(not(test))]
    {
        use core::fmt::Write;
        TERMINAL
            .lock()
            .write_fmt(args)
            .expect("Printing to terminal failed");
    }
    #[cfg(test)]
    std::print!("{}", args);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::terminal::_print(format_args!("[INFO] "));
        $crate::terminal::_print(format_args!($($arg)*));
        $crate::terminal::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::terminal::_print(format_args!("[WARN] "));
        $crate::terminal::_print(format_args!($($arg)*));
        $crate::terminal::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::terminal::_print(format_args!("[ERROR] "));
        $crate::terminal::_print(format_args!($($arg)*));
        $crate::terminal::_print(format_args!("\n"));
    };
}
