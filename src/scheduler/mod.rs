//! Round-robin dispatch. The scheduler runs only when no process owns
//! the CPU; it is the sole path by which a ready process becomes
//! current.

use crate::kernel::{Dispatch, Kernel, INTERVAL, QUANTUM};
use crate::uarm;

impl Kernel {
    /// Pick the next process, or decide that the machine halts, idles or
    /// is deadlocked. Programs the quantum timer so the pseudo-clock
    /// still ticks on time when only part of an interval remains.
    pub fn schedule(&mut self) -> Dispatch {
        if self.ready_queue.is_none() {
            if self.proc_count == 0 {
                return Dispatch::Halt;
            }
            if self.soft_block_count == 0 {
                return Dispatch::Deadlock;
            }
            // Everyone is waiting on a device or the pseudo-clock; sleep
            // with interrupts live until one of them comes back.
            uarm::set_status(uarm::MODE_SYS);
            self.end_of_interval = uarm::get_tod_lo().wrapping_add(INTERVAL);
            uarm::set_timer(self.end_of_interval.wrapping_sub(uarm::get_tod_lo()));
            return Dispatch::Idle;
        }

        let next = self
            .dequeue_ready()
            .expect("ready queue emptied underneath the scheduler");
        self.current = Some(next);

        let remaining = self.end_of_interval.wrapping_sub(uarm::get_tod_lo()) as i32;
        if remaining < 0 || remaining >= QUANTUM as i32 {
            uarm::set_timer(QUANTUM);
        } else {
            // Only part of an interval left: no refills.
            uarm::set_timer(remaining as u32);
        }

        self.tod_start = uarm::get_tod_lo();
        Dispatch::Load(self.pcbs[next].state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uarm::mock;

    #[test]
    fn halts_when_no_process_is_left() {
        mock::reset();
        let mut k = Kernel::new();
        assert_eq!(k.schedule(), Dispatch::Halt);
    }

    #[test]
    fn declares_deadlock_when_nobody_waits_on_a_device() {
        mock::reset();
        let mut k = Kernel::new();
        let p = k.pcbs.alloc().unwrap();
        k.proc_count = 1;
        // p is blocked on a user semaphore nobody will ever V.
        k.asl.insert_blocked(&mut k.pcbs, 0x9000, p).unwrap();
        assert_eq!(k.soft_block_count, 0);
        assert_eq!(k.schedule(), Dispatch::Deadlock);
    }

    #[test]
    fn idles_with_the_timer_armed_for_the_next_tick() {
        mock::reset();
        mock::set_tod(40_000);
        let mut k = Kernel::new();
        let p = k.pcbs.alloc().unwrap();
        k.proc_count = 1;
        let key = k.device_sem_key(crate::kernel::CLOCK_INDEX);
        k.asl.insert_blocked(&mut k.pcbs, key, p).unwrap();
        k.soft_block_count = 1;

        assert_eq!(k.schedule(), Dispatch::Idle);
        assert_eq!(k.end_of_interval, 40_000 + INTERVAL);
        assert_eq!(mock::last_timer(), Some(INTERVAL));
        // The wait state runs with interrupts unmasked.
        assert_eq!(mock::last_status(), Some(uarm::MODE_SYS));
    }

    #[test]
    fn grants_a_full_quantum_when_the_interval_allows() {
        mock::reset();
        mock::set_tod(1_000);
        let mut k = Kernel::new();
        k.end_of_interval = 1_000 + INTERVAL;
        let p = k.pcbs.alloc().unwrap();
        k.pcbs[p].state.pc = 0xA000;
        k.proc_count = 1;
        k.ready(p);

        let next = k.schedule();
        assert_eq!(k.current, Some(p));
        assert_eq!(mock::last_timer(), Some(QUANTUM));
        assert_eq!(k.tod_start, 1_000);
        match next {
            Dispatch::Load(state) => assert_eq!(state.pc, 0xA000),
            other => panic!("expected a dispatch, got {:?}", other),
        }
    }

    #[test]
    fn grants_only_the_interval_remainder_near_a_tick() {
        mock::reset();
        let mut k = Kernel::new();
        mock::set_tod(99_000);
        k.end_of_interval = 100_000; // 1000 µs short of a full quantum
        let p = k.pcbs.alloc().unwrap();
        k.proc_count = 1;
        k.ready(p);

        k.schedule();
        assert_eq!(mock::last_timer(), Some(1_000));
    }

    #[test]
    fn grants_a_full_quantum_when_the_tick_is_overdue() {
        mock::reset();
        let mut k = Kernel::new();
        mock::set_tod(150_000);
        k.end_of_interval = 100_000; // already in the past
        let p = k.pcbs.alloc().unwrap();
        k.proc_count = 1;
        k.ready(p);

        k.schedule();
        assert_eq!(mock::last_timer(), Some(QUANTUM));
    }

    #[test]
    fn dispatches_in_arrival_order() {
        mock::reset();
        let mut k = Kernel::new();
        let a = k.pcbs.alloc().unwrap();
        let b = k.pcbs.alloc().unwrap();
        k.proc_count = 2;
        k.ready(a);
        k.ready(b);

        k.schedule();
        assert_eq!(k.current, Some(a));
    }
}
