//! Active Semaphore List: one descriptor per semaphore that currently has
//! blocked processes, kept strictly ascending by semaphore address between
//! two sentinel descriptors (keys 0 and the maximum address). The
//! sentinels give every real key a strict predecessor and successor, so
//! search and splice never meet a boundary case.

use crate::pcb::{PcbPool, Pid, MAX_PROC};

/// Descriptor pool size: every live process may block on a distinct
/// semaphore, plus the two sentinels.
pub const MAX_SEMD: usize = MAX_PROC + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SemIdx(usize);

#[derive(Debug, Clone, Copy)]
struct Semd {
    next: Option<SemIdx>,
    key: usize,
    queue: Option<Pid>,
}

const EMPTY: Semd = Semd {
    next: None,
    key: 0,
    queue: None,
};

/// A fresh descriptor was needed and the pool was empty. Unreachable with
/// the pool sized to MAX_PROC + 2; surfaced anyway so the caller decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemdPoolExhausted;

pub struct Asl {
    nodes: [Semd; MAX_SEMD],
    free: Option<SemIdx>,
    head: SemIdx,
}

impl Asl {
    pub fn new() -> Asl {
        let mut asl = Asl {
            nodes: [EMPTY; MAX_SEMD],
            free: None,
            head: SemIdx(0),
        };
        for i in 0..MAX_SEMD {
            asl.free_semd(SemIdx(i));
        }
        let top = asl.alloc_semd().expect("sentinel allocation cannot fail");
        let bottom = asl.alloc_semd().expect("sentinel allocation cannot fail");
        asl.nodes[top.0].key = 0;
        asl.nodes[bottom.0].key = usize::MAX;
        asl.nodes[top.0].next = Some(bottom);
        asl.head = top;
        asl
    }

    /// Descriptor with the greatest key strictly below `key`. The bottom
    /// sentinel's key is above every real key, so the walk always stops.
    fn find_prev(&self, key: usize) -> SemIdx {
        let mut cur = self.head;
        loop {
            let next = self.succ(cur);
            if self.nodes[next.0].key >= key {
                return cur;
            }
            cur = next;
        }
    }

    fn succ(&self, s: SemIdx) -> SemIdx {
        self.nodes[s.0].next.expect("ASL sentinel chain broken")
    }

    /// Append `p` to the blocked queue of semaphore `key`, activating a
    /// fresh descriptor if the semaphore has no waiters yet. Records the
    /// key in `p`.
    pub fn insert_blocked(
        &mut self,
        pool: &mut PcbPool,
        key: usize,
        p: Pid,
    ) -> Result<(), SemdPoolExhausted> {
        let prev = self.find_prev(key);
        let next = self.succ(prev);
        if self.nodes[next.0].key == key {
            let mut q = self.nodes[next.0].queue;
            pool.insert_q(&mut q, p);
            self.nodes[next.0].queue = q;
        } else {
            let fresh = self.alloc_semd().ok_or(SemdPoolExhausted)?;
            self.nodes[fresh.0].key = key;
            let mut q = None;
            pool.insert_q(&mut q, p);
            self.nodes[fresh.0].queue = q;
            self.nodes[fresh.0].next = Some(next);
            self.nodes[prev.0].next = Some(fresh);
        }
        pool[p].sem = Some(key);
        Ok(())
    }

    /// Detach and return the head waiter of semaphore `key`; the
    /// descriptor is recycled the moment its queue empties. None when no
    /// descriptor carries `key`. The waiter's recorded key is left for
    /// the caller to clear or inspect.
    pub fn remove_blocked(&mut self, pool: &mut PcbPool, key: usize) -> Option<Pid> {
        let prev = self.find_prev(key);
        let found = self.succ(prev);
        if self.nodes[found.0].key != key {
            return None;
        }
        let mut q = self.nodes[found.0].queue;
        let p = pool.remove_head(&mut q);
        self.nodes[found.0].queue = q;
        if q.is_none() {
            self.nodes[prev.0].next = self.nodes[found.0].next;
            self.free_semd(found);
        }
        p
    }

    /// Detach `p` from the queue of the semaphore it is recorded against.
    /// None when the record and the list disagree.
    pub fn out_blocked(&mut self, pool: &mut PcbPool, p: Pid) -> Option<Pid> {
        let key = pool[p].sem?;
        let prev = self.find_prev(key);
        let found = self.succ(prev);
        if self.nodes[found.0].key != key {
            return None;
        }
        let mut q = self.nodes[found.0].queue;
        let removed = pool.out_q(&mut q, p);
        self.nodes[found.0].queue = q;
        removed?;
        if q.is_none() {
            self.nodes[prev.0].next = self.nodes[found.0].next;
            self.free_semd(found);
        }
        removed
    }

    /// Head waiter of semaphore `key` without removal.
    pub fn head_blocked(&self, pool: &PcbPool, key: usize) -> Option<Pid> {
        let prev = self.find_prev(key);
        let found = self.succ(prev);
        if self.nodes[found.0].key != key {
            return None;
        }
        pool.head(self.nodes[found.0].queue)
    }

    fn alloc_semd(&mut self) -> Option<SemIdx> {
        let s = self.free?;
        self.free = self.nodes[s.0].next;
        self.nodes[s.0] = EMPTY;
        Some(s)
    }

    fn free_semd(&mut self, s: SemIdx) {
        self.nodes[s.0].next = self.free;
        self.free = Some(s);
    }

    /// Keys of the active descriptors, sentinels excluded, in list order.
    #[cfg(test)]
    pub fn active_keys(&self) -> Vec<usize> {
        let mut keys = Vec::new();
        let mut cur = self.succ(self.head);
        while self.nodes[cur.0].key != usize::MAX {
            keys.push(self.nodes[cur.0].key);
            cur = self.succ(cur);
        }
        keys
    }
}
