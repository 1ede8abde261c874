//! uARM platform contract: architected addresses, the processor state
//! layout, device registers and the ROM services. Everything the nucleus
//! knows about the machine lives here; nothing else touches raw addresses.

use bitflags::bitflags;
use volatile::Volatile;

#[cfg(test)]
pub mod mock;

// ── Architected save areas (old/new processor-state pairs) ──

pub const INT_OLD_AREA: u32 = 0x0000_7000;
pub const INT_NEW_AREA: u32 = 0x0000_7058;
pub const TLB_OLD_AREA: u32 = 0x0000_70B0;
pub const TLB_NEW_AREA: u32 = 0x0000_7108;
pub const PGM_OLD_AREA: u32 = 0x0000_7160;
pub const PGM_NEW_AREA: u32 = 0x0000_71B8;
pub const SYS_OLD_AREA: u32 = 0x0000_7210;
pub const SYS_NEW_AREA: u32 = 0x0000_7268;

// ── Pending-interrupt bitmaps, one word per external line ──

pub const DISK_INT_MAP: u32 = 0x0000_6FE0;
pub const TAPE_INT_MAP: u32 = 0x0000_6FE4;
pub const NETWORK_INT_MAP: u32 = 0x0000_6FE8;
pub const PRINTER_INT_MAP: u32 = 0x0000_6FEC;
pub const TERMINAL_INT_MAP: u32 = 0x0000_6FF0;

// ── Device register block ──

pub const DEV_REG_BASE: u32 = 0x0000_0040;
pub const DEV_REG_LEN: u32 = 0x0000_0010;

/// Low byte of a device status word when the device is idle.
pub const DEVICE_READY: u32 = 1;
/// Command written to a device to acknowledge its interrupt.
pub const CMD_ACK: u32 = 1;

// ── Installed RAM ──

pub const RAM_BASE: u32 = 0x0000_8000;
pub const BUS_REG_RAM_SIZE: u32 = 0x0000_02D4;
pub const FRAME_SIZE: u32 = 4096;

// ── CPSR and Cause ──

bitflags! {
    /// Interrupt-disable bits of the CPSR. A set bit masks that
    /// interrupt class; mode bits live below bit 5 and are not flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Psr: u32 {
        const FIQ_DISABLED = 0x40;
        const IRQ_DISABLED = 0x80;
        const INTS_DISABLED = 0xC0;
    }
}

pub const MODE_USER: u32 = 0x10;
pub const MODE_SYS: u32 = 0x1F;
pub const MODE_MASK: u32 = 0x1F;

/// CP15 Cause code for a reserved-instruction program trap.
pub const CAUSE_RESERVED_INSTRUCTION: u32 = 20;
/// Pending interrupt lines occupy Cause bits [24..32].
pub const CAUSE_LINE_SHIFT: usize = 24;

/// The pipeline has already advanced the saved PC by one fetch when an
/// interrupt is taken.
pub const PC_PREFETCH: u32 = 4;

/// A full uARM processor-state snapshot, laid out exactly as the machine
/// stores it in the old/new areas.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State {
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub a4: u32,
    pub v1: u32,
    pub v2: u32,
    pub v3: u32,
    pub v4: u32,
    pub v5: u32,
    pub v6: u32,
    pub sl: u32,
    pub fp: u32,
    pub ip: u32,
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
    pub cp15_control: u32,
    pub cp15_entry_hi: u32,
    pub cp15_cause: u32,
    pub tod_hi: u32,
    pub tod_lo: u32,
}

/// Register word for disks, tapes, printers and network cards.
#[repr(C)]
pub struct DtpRegister {
    pub status: Volatile<u32>,
    pub command: Volatile<u32>,
    pub data0: Volatile<u32>,
    pub data1: Volatile<u32>,
}

/// Register word for terminals; the four fields cover both subdevices.
#[repr(C)]
pub struct TermRegister {
    pub recv_status: Volatile<u32>,
    pub recv_command: Volatile<u32>,
    pub transm_status: Volatile<u32>,
    pub transm_command: Volatile<u32>,
}

/// Address of the register word for the device at `index` in the
/// line-major device ordering (8 devices per external line).
pub fn device_register_addr(index: usize) -> u32 {
    DEV_REG_BASE + index as u32 * DEV_REG_LEN
}

/// Translate a physical address into a dereferencable pointer. This is the
/// only place a raw machine address becomes a pointer; under the test
/// harness it resolves into the simulated RAM image instead.
#[cfg(not(test))]
pub fn phys<T>(addr: u32) -> *mut T {
    addr as usize as *mut T
}

#[cfg(test)]
pub use mock::phys;

/// Top of installed RAM, as reported by the bus register block.
pub fn ram_top() -> u32 {
    RAM_BASE + unsafe { core::ptr::read_volatile(phys::<u32>(BUS_REG_RAM_SIZE)) }
}

// ── ROM services ──
//
// Supplied by the platform support library and linked into the final
// image, the same way the BIOS-provided service routines are reached
// from any uARM kernel.

#[cfg(not(test))]
#[allow(non_snake_case)]
mod rom {
    use super::State;

    extern "C" {
        pub fn LDST(state: *const State) -> !;
        pub fn HALT() -> !;
        pub fn PANIC() -> !;
        pub fn WAIT();
        pub fn setTIMER(microseconds: u32);
        pub fn getTODLO() -> u32;
        pub fn setSTATUS(status: u32);
    }
}

/// Microseconds on the time-of-day clock (low word).
#[cfg(not(test))]
pub fn get_tod_lo() -> u32 {
    unsafe { rom::getTODLO() }
}

/// Arm the interval timer to raise a line-2 interrupt after
/// `microseconds`.
#[cfg(not(test))]
pub fn set_timer(microseconds: u32) {
    unsafe { rom::setTIMER(microseconds) }
}

/// Replace the live CPSR.
#[cfg(not(test))]
pub fn set_status(status: u32) {
    unsafe { rom::setSTATUS(status) }
}

/// Load a full processor state; control continues at `state.pc` and never
/// returns here.
#[cfg(not(test))]
pub fn load_state(state: &State) -> ! {
    unsafe { rom::LDST(state) }
}

/// Stop the machine after a normal shutdown.
#[cfg(not(test))]
pub fn halt() -> ! {
    unsafe { rom::HALT() }
}

/// Stop the machine after an unrecoverable kernel error.
#[cfg(not(test))]
pub fn rom_panic() -> ! {
    unsafe { rom::PANIC() }
}

/// Suspend the processor until the next interrupt. The interrupt resumes
/// through the interrupt new area, so this never returns.
#[cfg(not(test))]
pub fn wait() -> ! {
    loop {
        unsafe { rom::WAIT() }
    }
}

// The test harness swaps every ROM service for its simulated twin.
#[cfg(test)]
pub use mock::{get_tod_lo, halt, load_state, rom_panic, set_status, set_timer, wait};
