//! Kernel-wide state. Everything the handlers mutate lives in one
//! `Kernel` aggregate behind a spin mutex; the exception-vector entry
//! stubs lock it, run one handler, drop the guard, then perform whatever
//! terminal effect the handler decided on.

use crate::asl::Asl;
use crate::pcb::{PcbPool, Pid};
use crate::uarm::{self, Psr, State};
use lazy_static::lazy_static;
use spin::Mutex;

/// Device semaphores: 8 lines × 8 devices, the terminal line counted
/// twice (receive then transmit subdevices), plus the pseudo-clock.
pub const MAX_SEM: usize = 49;
/// The pseudo-clock occupies the last device-semaphore slot.
pub const CLOCK_INDEX: usize = 48;

/// Full CPU burst granted to a dispatched process, in microseconds.
pub const QUANTUM: u32 = 5000;
/// Pseudo-clock tick period, in microseconds.
pub const INTERVAL: u32 = 100_000;

/// CreateProcess status values returned in the caller's a1.
pub const SUCCESS: u32 = 0;
pub const FAILURE: u32 = 0xFFFF_FFFF;

/// What the machine does once a handler has finished. Exactly one of
/// these ends every handler path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Resume execution of this processor state.
    Load(State),
    /// Nothing to run but soft-blocked processes exist; wait for an
    /// interrupt with the timer armed for the pseudo-clock.
    Idle,
    /// Every process has terminated.
    Halt,
    /// Live processes, an empty ready queue and nobody waiting on a
    /// device: no V can ever arrive.
    Deadlock,
}

impl Dispatch {
    /// Perform the effect. Callers must have dropped the kernel lock.
    pub fn run(self) -> ! {
        match self {
            Dispatch::Load(state) => uarm::load_state(&state),
            Dispatch::Idle => uarm::wait(),
            Dispatch::Halt => uarm::halt(),
            Dispatch::Deadlock => {
                crate::log_error!("deadlock: live processes with nothing left to run");
                uarm::rom_panic()
            }
        }
    }
}

pub struct Kernel {
    pub pcbs: PcbPool,
    pub asl: Asl,
    /// Tail of the ready queue.
    pub ready_queue: Option<Pid>,
    /// Process owning the CPU, if any.
    pub current: Option<Pid>,
    /// Live processes.
    pub proc_count: usize,
    /// Processes blocked on a device or pseudo-clock semaphore.
    pub soft_block_count: usize,
    pub device_sem: [i32; MAX_SEM],
    /// Status words captured when a device interrupt found no waiter.
    pub device_status: [u32; MAX_SEM],
    pub tod_start: u32,
    pub tod_end: u32,
    pub accumulated: u32,
    /// Absolute TOD of the next pseudo-clock tick.
    pub end_of_interval: u32,
}

lazy_static! {
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

impl Kernel {
    pub fn new() -> Kernel {
        Kernel {
            pcbs: PcbPool::new(),
            asl: Asl::new(),
            ready_queue: None,
            current: None,
            proc_count: 0,
            soft_block_count: 0,
            device_sem: [0; MAX_SEM],
            device_status: [0; MAX_SEM],
            tod_start: 0,
            tod_end: 0,
            accumulated: 0,
            end_of_interval: 0,
        }
    }

    /// Install the four exception new-area templates, ready the first
    /// process and hand over to the scheduler. Called exactly once, with
    /// interrupts disabled.
    pub fn bootstrap(&mut self, entry_pc: u32) -> Dispatch {
        let ram_top = uarm::ram_top();
        let kernel_psr = Psr::INTS_DISABLED.bits() | uarm::MODE_SYS;
        let vectors = [
            (uarm::SYS_NEW_AREA, crate::exceptions::syscall_entry as usize),
            (uarm::PGM_NEW_AREA, crate::exceptions::pgm_trap_entry as usize),
            (uarm::TLB_NEW_AREA, crate::exceptions::tlb_trap_entry as usize),
            (uarm::INT_NEW_AREA, crate::interrupts::interrupt_entry as usize),
        ];
        for (area, handler) in vectors {
            let mut template = State::default();
            template.pc = handler as u32;
            template.sp = ram_top;
            template.cpsr = kernel_psr;
            template.cp15_control = 0;
            unsafe { core::ptr::write(uarm::phys::<State>(area), template) };
        }

        let first = self.pcbs.alloc().expect("PCB pool empty at boot");
        self.pcbs[first].state.pc = entry_pc;
        self.pcbs[first].state.sp = ram_top - uarm::FRAME_SIZE;
        // The first process runs in SYS mode with interrupts live.
        self.pcbs[first].state.cpsr = uarm::MODE_SYS;
        self.pcbs[first].state.cp15_control = 0;
        self.ready(first);
        self.proc_count = 1;

        self.end_of_interval = uarm::get_tod_lo().wrapping_add(INTERVAL);
        uarm::set_timer(QUANTUM);
        self.schedule()
    }

    /// Go back to the interrupted current process.
    pub fn resume(&self) -> Dispatch {
        let cur = self.current.expect("resume with no current process");
        Dispatch::Load(self.pcbs[cur].state)
    }

    /// Charge the TOD elapsed since the last accounting mark to the
    /// current process and move the mark, so later work in the same
    /// handler is not billed twice.
    pub fn charge_current(&mut self) {
        self.tod_end = uarm::get_tod_lo();
        self.accumulated = self.tod_end.wrapping_sub(self.tod_start);
        let cur = self.current.expect("charging time with no current process");
        self.pcbs[cur].cpu_time = self.pcbs[cur].cpu_time.wrapping_add(self.accumulated);
        self.tod_start = self.tod_end;
    }

    /// Append `p` to the ready queue.
    pub fn ready(&mut self, p: Pid) {
        let mut q = self.ready_queue;
        self.pcbs.insert_q(&mut q, p);
        self.ready_queue = q;
    }

    /// Detach the head of the ready queue.
    pub fn dequeue_ready(&mut self) -> Option<Pid> {
        let mut q = self.ready_queue;
        let p = self.pcbs.remove_head(&mut q);
        self.ready_queue = q;
        p
    }

    /// Park the current process on the semaphore keyed `key`.
    pub fn block_current(&mut self, key: usize) {
        let cur = self.current.take().expect("blocking with no current process");
        if self.asl.insert_blocked(&mut self.pcbs, key, cur).is_err() {
            // MAX_PROC + 2 descriptors cover every live process.
            panic!("semaphore descriptor pool exhausted");
        }
    }

    /// ASL key of the device semaphore at `index`: the address of its
    /// counter, like any other semaphore.
    pub fn device_sem_key(&self, index: usize) -> usize {
        &self.device_sem[index] as *const i32 as usize
    }

    /// Whether `key` addresses one of the 49 device semaphores. Decides
    /// soft-block accounting when a blocked process dies.
    pub fn is_device_key(&self, key: usize) -> bool {
        let first = &self.device_sem[0] as *const i32 as usize;
        let last = &self.device_sem[MAX_SEM - 1] as *const i32 as usize;
        key >= first && key <= last
    }
}
