//! Synchronous trap handling: the eight nucleus services, the privilege
//! rewrite for user-mode service requests, program/TLB traps, and the
//! pass-up-or-die rule for everything a process handles (or dies) on its
//! own.

use crate::interrupts::{device_sem_index, DEVICES_PER_LINE, TERMINAL_LINE};
use crate::kernel::{Dispatch, Kernel, CLOCK_INDEX, FAILURE, SUCCESS};
use crate::pcb::{Pid, TrapVector};
use crate::uarm::{self, State};

/// Service numbers (passed in a1 by the requesting process).
pub const CREATE_PROCESS: u32 = 1;
pub const TERMINATE_PROCESS: u32 = 2;
pub const VERHOGEN: u32 = 3;
pub const PASSEREN: u32 = 4;
pub const SPEC_TRAP_VEC: u32 = 5;
pub const GET_CPU_TIME: u32 = 6;
pub const WAIT_CLOCK: u32 = 7;
pub const WAIT_IO: u32 = 8;

/// The three trap classes a process may install second-level handlers
/// for; the discriminants are the SpecTrapVec ABI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Tlb = 0,
    Pgm = 1,
    Sys = 2,
}

impl TrapKind {
    fn old_area(self) -> u32 {
        match self {
            TrapKind::Tlb => uarm::TLB_OLD_AREA,
            TrapKind::Pgm => uarm::PGM_OLD_AREA,
            TrapKind::Sys => uarm::SYS_OLD_AREA,
        }
    }
}

// ── Exception-vector entry points ──
//
// Each stub locks the kernel for exactly one handler and drops the lock
// before the terminal load/halt/wait, so the next trap can take it.

#[no_mangle]
pub extern "C" fn syscall_entry() -> ! {
    let next = crate::kernel::KERNEL.lock().on_syscall();
    next.run()
}

#[no_mangle]
pub extern "C" fn pgm_trap_entry() -> ! {
    let next = crate::kernel::KERNEL.lock().on_pgm_trap();
    next.run()
}

#[no_mangle]
pub extern "C" fn tlb_trap_entry() -> ! {
    let next = crate::kernel::KERNEL.lock().on_tlb_trap();
    next.run()
}

impl Kernel {
    /// SVC trap. The requesting process's state sits in the syscall old
    /// area with the service number in a1 and arguments in a2..a4.
    pub fn on_syscall(&mut self) -> Dispatch {
        let old = unsafe { core::ptr::read(uarm::phys::<State>(uarm::SYS_OLD_AREA)) };
        let cur = self.current.expect("system call with no current process");
        // Commit the interrupted state first; every resume path below
        // reloads it from the PCB.
        self.pcbs[cur].state = old;

        let num = old.a1;
        if num > WAIT_IO {
            return self.pass_up_or_die(TrapKind::Sys);
        }

        if (old.cpsr & uarm::MODE_MASK) == uarm::MODE_SYS {
            match num {
                CREATE_PROCESS => return self.create_process(old.a2),
                TERMINATE_PROCESS => return self.terminate_process(),
                VERHOGEN => return self.verhogen(old.a2),
                PASSEREN => return self.passeren(old.a2),
                SPEC_TRAP_VEC => return self.spec_trap_vec(old.a2, old.a3, old.a4),
                GET_CPU_TIME => return self.get_cpu_time(),
                WAIT_CLOCK => return self.wait_clock(),
                WAIT_IO => return self.wait_io(old.a2, old.a3, old.a4),
                _ => {}
            }
        }

        // A privileged service requested from user mode (or service 0):
        // rewrite it as a reserved-instruction program trap and let the
        // process handle that, or die.
        let mut as_pgm = old;
        as_pgm.cp15_cause = uarm::CAUSE_RESERVED_INSTRUCTION;
        unsafe { core::ptr::write(uarm::phys::<State>(uarm::PGM_OLD_AREA), as_pgm) };
        self.on_pgm_trap()
    }

    /// Program trap: pass up if a handler was installed, kill otherwise.
    pub fn on_pgm_trap(&mut self) -> Dispatch {
        self.pass_up_or_die(TrapKind::Pgm)
    }

    /// Address-translation trap: same rule as program traps.
    pub fn on_tlb_trap(&mut self) -> Dispatch {
        self.pass_up_or_die(TrapKind::Tlb)
    }

    /// SYS 1: allocate a child of the caller running the supplied state.
    /// The caller learns success or pool exhaustion through its a1.
    fn create_process(&mut self, template_addr: u32) -> Dispatch {
        let cur = self.current.expect("service request with no current process");
        match self.pcbs.alloc() {
            Some(child) => {
                let template = unsafe { core::ptr::read(uarm::phys::<State>(template_addr)) };
                self.pcbs[child].state = template;
                self.pcbs.insert_child(cur, child);
                self.ready(child);
                self.proc_count += 1;
                self.pcbs[cur].state.a1 = SUCCESS;
            }
            None => self.pcbs[cur].state.a1 = FAILURE,
        }
        self.resume()
    }

    /// SYS 2: destroy the caller and every descendant, then let the
    /// scheduler find other work.
    pub fn terminate_process(&mut self) -> Dispatch {
        let cur = self.current.expect("terminate with no current process");
        self.reap(cur);
        self.schedule()
    }

    /// Depth-first destruction: children die before their parent. Each
    /// PCB is pulled out of wherever it lives (current slot, ready
    /// queue, or a semaphore queue), the counters settle, and the record
    /// returns to the free pool.
    fn reap(&mut self, p: Pid) {
        while let Some(child) = self.pcbs.remove_child(p) {
            self.reap(child);
        }

        if self.current == Some(p) {
            self.pcbs.out_child(p);
            self.current = None;
        } else if self.pcbs[p].sem.is_none() {
            let mut q = self.ready_queue;
            self.pcbs.out_q(&mut q, p);
            self.ready_queue = q;
        } else {
            self.asl.out_blocked(&mut self.pcbs, p);
            let key = self.pcbs[p].sem.expect("blocked process without a semaphore");
            if self.is_device_key(key) {
                // The pending I/O still arrives; only the waiter is gone.
                self.soft_block_count -= 1;
            } else {
                // Undo the killed waiter's P.
                unsafe { *(key as *mut i32) += 1 };
            }
        }

        self.pcbs.free(p);
        self.proc_count -= 1;
    }

    /// SYS 3: V. Wakes the longest-waiting process when the counter says
    /// someone is blocked.
    fn verhogen(&mut self, sem_addr: u32) -> Dispatch {
        let sem = uarm::phys::<i32>(sem_addr);
        let value = unsafe { *sem + 1 };
        unsafe { *sem = value };
        if value <= 0 {
            let woken = self
                .asl
                .remove_blocked(&mut self.pcbs, sem as usize)
                .expect("V on a negative semaphore with no waiter");
            self.pcbs[woken].sem = None;
            self.ready(woken);
        }
        self.resume()
    }

    /// SYS 4: P. Blocks the caller when the counter goes negative.
    fn passeren(&mut self, sem_addr: u32) -> Dispatch {
        let sem = uarm::phys::<i32>(sem_addr);
        let value = unsafe { *sem - 1 };
        unsafe { *sem = value };
        if value < 0 {
            self.charge_current();
            self.block_current(sem as usize);
            return self.schedule();
        }
        self.resume()
    }

    /// SYS 5: register the old/new area pair for one trap class. At most
    /// once per class per process; a second attempt is self-termination.
    fn spec_trap_vec(&mut self, kind: u32, old_area: u32, new_area: u32) -> Dispatch {
        let cur = self.current.expect("service request with no current process");
        let slot = match kind {
            0 => TrapKind::Tlb,
            1 => TrapKind::Pgm,
            2 => TrapKind::Sys,
            _ => return self.terminate_process(),
        };
        if self.pcbs[cur].trap_vectors[slot as usize].is_some() {
            return self.terminate_process();
        }
        self.pcbs[cur].trap_vectors[slot as usize] = Some(TrapVector { old_area, new_area });
        self.resume()
    }

    /// SYS 6: report accumulated CPU microseconds in the caller's a1,
    /// including the time spent getting here.
    fn get_cpu_time(&mut self) -> Dispatch {
        self.charge_current();
        let cur = self.current.expect("service request with no current process");
        self.pcbs[cur].state.a1 = self.pcbs[cur].cpu_time;
        self.resume()
    }

    /// SYS 7: sleep until the next pseudo-clock tick.
    fn wait_clock(&mut self) -> Dispatch {
        self.device_sem[CLOCK_INDEX] -= 1;
        if self.device_sem[CLOCK_INDEX] < 0 {
            self.charge_current();
            let key = self.device_sem_key(CLOCK_INDEX);
            self.block_current(key);
            self.soft_block_count += 1;
            return self.schedule();
        }
        // The counter starts at 0, every waiter decrements it, and the
        // tick resets it to 0: it can never be found positive here.
        unreachable!("pseudo-clock semaphore went positive")
    }

    /// SYS 8: wait for the device named by (line, device), the terminal
    /// transmitter when `wait_for_read` is false. If the interrupt beat
    /// the request, the captured status is returned at once in a1.
    fn wait_io(&mut self, line: u32, device: u32, wait_for_read: u32) -> Dispatch {
        let mut index = device_sem_index(line as usize, device as usize);
        if line as usize == TERMINAL_LINE && wait_for_read == 0 {
            index += DEVICES_PER_LINE;
        }

        self.device_sem[index] -= 1;
        if self.device_sem[index] < 0 {
            self.charge_current();
            let key = self.device_sem_key(index);
            self.block_current(key);
            self.soft_block_count += 1;
            return self.schedule();
        }

        // The interrupt outran the request; no blocking, hand over the
        // status it left behind.
        let cur = self.current.expect("service request with no current process");
        self.pcbs[cur].state.a1 = self.device_status[index];
        self.resume()
    }

    /// Transfer a trap to the process's installed second-level handler:
    /// the machine state moves into the registered old area and the
    /// registered new state becomes the current state. Without a
    /// registration the process and its subtree die.
    pub fn pass_up_or_die(&mut self, kind: TrapKind) -> Dispatch {
        let cur = self.current.expect("trap with no current process");
        match self.pcbs[cur].trap_vectors[kind as usize] {
            None => self.terminate_process(),
            Some(vector) => {
                let old = unsafe { core::ptr::read(uarm::phys::<State>(kind.old_area())) };
                unsafe { core::ptr::write(uarm::phys::<State>(vector.old_area), old) };
                let new = unsafe { core::ptr::read(uarm::phys::<State>(vector.new_area)) };
                self.pcbs[cur].state = new;
                Dispatch::Load(new)
            }
        }
    }
}
