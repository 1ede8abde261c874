//! Simulated machine for the host test harness. A per-thread RAM image
//! stands in for the architected low memory (save areas, pending bitmaps,
//! device registers), and the ROM services record their effects so tests
//! can assert on them.

use super::State;
use std::cell::RefCell;

/// Covers the architected region (0x0..0x8000) plus scratch space tests
/// use for user-owned states and semaphores.
pub const RAM_SIZE: usize = 0x20000;

/// Value a fresh machine reports in the bus RAM-size register.
const INSTALLED_RAM: u32 = 0x18000;

#[repr(align(8))]
struct Ram([u8; RAM_SIZE]);

struct Machine {
    ram: Box<Ram>,
    tod: u32,
    timer: Option<u32>,
    status: Option<u32>,
    loaded: Option<State>,
}

impl Machine {
    fn new() -> Machine {
        let mut m = Machine {
            ram: Box::new(Ram([0; RAM_SIZE])),
            tod: 0,
            timer: None,
            status: None,
            loaded: None,
        };
        let at = super::BUS_REG_RAM_SIZE as usize;
        m.ram.0[at..at + 4].copy_from_slice(&INSTALLED_RAM.to_le_bytes());
        m
    }
}

thread_local! {
    static MACHINE: RefCell<Machine> = RefCell::new(Machine::new());
}

/// Throw away the current thread's machine and start from power-on.
pub fn reset() {
    MACHINE.with(|m| *m.borrow_mut() = Machine::new());
}

pub fn phys<T>(addr: u32) -> *mut T {
    let addr = addr as usize;
    assert!(
        addr + core::mem::size_of::<T>() <= RAM_SIZE,
        "access at {:#x} outside the simulated RAM",
        addr
    );
    MACHINE.with(|m| unsafe { m.borrow_mut().ram.0.as_mut_ptr().add(addr) as *mut T })
}

pub fn get_tod_lo() -> u32 {
    MACHINE.with(|m| m.borrow().tod)
}

pub fn set_tod(microseconds: u32) {
    MACHINE.with(|m| m.borrow_mut().tod = microseconds);
}

pub fn advance_tod(microseconds: u32) {
    MACHINE.with(|m| m.borrow_mut().tod += microseconds);
}

pub fn set_timer(microseconds: u32) {
    MACHINE.with(|m| m.borrow_mut().timer = Some(microseconds));
}

/// Most recent `setTIMER` value, if any.
pub fn last_timer() -> Option<u32> {
    MACHINE.with(|m| m.borrow().timer)
}

pub fn set_status(status: u32) {
    MACHINE.with(|m| m.borrow_mut().status = Some(status));
}

/// Most recent `setSTATUS` value, if any.
pub fn last_status() -> Option<u32> {
    MACHINE.with(|m| m.borrow().status)
}

/// Simulated `LDST`: records the state, then unwinds out of the handler
/// (a real load never returns).
pub fn load_state(state: &State) -> ! {
    MACHINE.with(|m| m.borrow_mut().loaded = Some(*state));
    panic!("LDST")
}

/// State most recently handed to `LDST`, if any.
pub fn last_loaded() -> Option<State> {
    MACHINE.with(|m| m.borrow().loaded)
}

/// Simulated `HALT`.
pub fn halt() -> ! {
    panic!("HALT")
}

/// Simulated `PANIC`.
pub fn rom_panic() -> ! {
    panic!("PANIC")
}

/// Simulated `WAIT`.
pub fn wait() -> ! {
    panic!("WAIT")
}

/// Store a processor state at a physical address (e.g. an old area).
pub fn write_state(addr: u32, state: &State) {
    unsafe { core::ptr::write(super::phys::<State>(addr), *state) }
}

/// Read back a processor state from a physical address.
pub fn read_state(addr: u32) -> State {
    unsafe { core::ptr::read(super::phys::<State>(addr)) }
}

/// Store a word at a physical address (pending bitmaps, device registers).
pub fn write_word(addr: u32, value: u32) {
    unsafe { core::ptr::write(super::phys::<u32>(addr), value) }
}

/// Read back a word from a physical address.
pub fn read_word(addr: u32) -> u32 {
    unsafe { core::ptr::read(super::phys::<u32>(addr)) }
}
