//! Asynchronous interrupt handling: decode the highest-priority pending
//! line from the Cause register, the lowest-numbered pending device
//! within it, V the device's semaphore and silence the device. Line 2 is
//! the processor timer and carries both the pseudo-clock tick and
//! quantum expiry.

use crate::kernel::{Dispatch, Kernel, CLOCK_INDEX, INTERVAL, QUANTUM};
use crate::uarm::{self, DtpRegister, State, TermRegister};
use bit_field::BitField;

/// Line 2 raises processor-timer interrupts.
pub const TIMER_LINE: usize = 2;
/// Lines 3..=7 carry external devices (disk, tape, network, printer,
/// terminal).
pub const FIRST_DEVICE_LINE: usize = 3;
pub const TERMINAL_LINE: usize = 7;
pub const LINE_COUNT: usize = 8;
pub const DEVICES_PER_LINE: usize = 8;

/// Device-semaphore slot for a device, in line-major order. Terminal
/// transmit subdevices live a further DEVICES_PER_LINE above their line.
pub fn device_sem_index(line: usize, device: usize) -> usize {
    (line - FIRST_DEVICE_LINE) * DEVICES_PER_LINE + device
}

#[no_mangle]
pub extern "C" fn interrupt_entry() -> ! {
    let next = crate::kernel::KERNEL.lock().on_interrupt();
    next.run()
}

/// Highest-priority asserted line in the Cause register (line 0 wins).
fn pending_line(cause: u32) -> usize {
    let lines = cause.get_bits(uarm::CAUSE_LINE_SHIFT..32);
    for line in 0..LINE_COUNT {
        if lines.get_bit(line) {
            return line;
        }
    }
    panic!("interrupt taken with no line asserted");
}

/// Lowest-numbered asserted device in a per-line pending bitmap.
fn pending_device(bitmap: u32) -> usize {
    for device in 0..DEVICES_PER_LINE {
        if bitmap.get_bit(device) {
            return device;
        }
    }
    panic!("device interrupt with an empty pending bitmap");
}

impl Kernel {
    /// Interrupt trap. The interrupted state sits in the interrupt old
    /// area; whoever was running gets charged for its slice and keeps
    /// the corrected resume point.
    pub fn on_interrupt(&mut self) -> Dispatch {
        let mut old = unsafe { core::ptr::read(uarm::phys::<State>(uarm::INT_OLD_AREA)) };
        let line = pending_line(old.cp15_cause);

        // Undo the pipeline's prefetch so the interrupted instruction
        // re-executes on resume.
        old.pc = old.pc.wrapping_sub(uarm::PC_PREFETCH);

        if let Some(cur) = self.current {
            self.charge_current();
            self.pcbs[cur].state = old;
        }

        if line == TIMER_LINE {
            return self.on_timer();
        }

        let map_addr = match line {
            3 => uarm::DISK_INT_MAP,
            4 => uarm::TAPE_INT_MAP,
            5 => uarm::NETWORK_INT_MAP,
            6 => uarm::PRINTER_INT_MAP,
            7 => uarm::TERMINAL_INT_MAP,
            // Lines 0 and 1 are inter-processor interrupts; this
            // machine has one processor.
            _ => panic!("interrupt on unsupported line {}", line),
        };
        let bitmap = unsafe { core::ptr::read_volatile(uarm::phys::<u32>(map_addr)) };
        let device = pending_device(bitmap);

        self.service_device(line, device)
    }

    /// V the interrupting device's semaphore, hand the status word to
    /// the woken waiter (or park it if the interrupt won the race), and
    /// ACK the device.
    fn service_device(&mut self, line: usize, device: usize) -> Dispatch {
        let mut index = device_sem_index(line, device);
        let reg_addr = uarm::device_register_addr(index);

        // For terminals, a receive status of "device ready" means the
        // receiver has nothing to say: the transmitter interrupted, and
        // it has priority when both are up.
        let transmit = line == TERMINAL_LINE && {
            let term = unsafe { &mut *uarm::phys::<TermRegister>(reg_addr) };
            (term.recv_status.read() & 0xFF) == uarm::DEVICE_READY
        };
        if transmit {
            index += DEVICES_PER_LINE;
        }

        let status = if line == TERMINAL_LINE {
            let term = unsafe { &mut *uarm::phys::<TermRegister>(reg_addr) };
            if transmit {
                term.transm_status.read()
            } else {
                term.recv_status.read()
            }
        } else {
            let dtp = unsafe { &mut *uarm::phys::<DtpRegister>(reg_addr) };
            dtp.status.read()
        };

        self.device_sem[index] += 1;
        let woken = if self.device_sem[index] <= 0 {
            let key = self.device_sem_key(index);
            self.asl.remove_blocked(&mut self.pcbs, key)
        } else {
            None
        };

        match woken {
            Some(p) => {
                self.pcbs[p].sem = None;
                self.soft_block_count -= 1;
                self.pcbs[p].state.a1 = status;
                self.ready(p);
            }
            None => {
                // The interrupt outran its WaitIO; park the status so
                // the request finds it later.
                self.device_status[index] = status;
            }
        }

        // Shut the alarm off either way.
        if line == TERMINAL_LINE {
            let term = unsafe { &mut *uarm::phys::<TermRegister>(reg_addr) };
            if transmit {
                term.transm_command.write(uarm::CMD_ACK);
            } else {
                term.recv_command.write(uarm::CMD_ACK);
            }
        } else {
            let dtp = unsafe { &mut *uarm::phys::<DtpRegister>(reg_addr) };
            dtp.command.write(uarm::CMD_ACK);
        }

        if self.current.is_some() {
            self.tod_start = uarm::get_tod_lo();
            self.resume()
        } else {
            self.schedule()
        }
    }

    /// Line 2: when the pseudo-clock interval has elapsed, release every
    /// WaitClock sleeper and re-arm the interval; in every case the
    /// running process's quantum is over.
    fn on_timer(&mut self) -> Dispatch {
        if uarm::get_tod_lo() >= self.end_of_interval {
            let key = self.device_sem_key(CLOCK_INDEX);
            while let Some(p) = self.asl.remove_blocked(&mut self.pcbs, key) {
                self.pcbs[p].sem = None;
                self.ready(p);
                self.soft_block_count -= 1;
            }
            // Nobody is left waiting on the tick.
            self.device_sem[CLOCK_INDEX] = 0;
            uarm::set_timer(QUANTUM);
            self.end_of_interval = uarm::get_tod_lo().wrapping_add(INTERVAL);
        }

        // Quantum expiry: still ready, but to the back of the line. The
        // scheduler re-arms the timer for whoever comes next.
        if let Some(cur) = self.current.take() {
            self.ready(cur);
        }
        self.schedule()
    }
}
