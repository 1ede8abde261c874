//! Process control blocks. A fixed pool of MAX_PROC records, circular
//! doubly-linked process queues identified by their tail, and the
//! parent/child/sibling tree.
//!
//! Records never move: every link is a slot index into the pool, and a
//! "freed" PCB just sits on the free queue until the next allocation.

use crate::uarm::State;

/// Hard cap on concurrently live processes.
pub const MAX_PROC: usize = 20;

/// Index of a PCB slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pid(usize);

impl Pid {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Old/new area pair registered for one trap class (SpecTrapVec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapVector {
    pub old_area: u32,
    pub new_area: u32,
}

/// One process record.
#[derive(Debug, Clone, Default)]
pub struct Pcb {
    next: Option<Pid>,
    prev: Option<Pid>,
    parent: Option<Pid>,
    child: Option<Pid>,
    next_sib: Option<Pid>,
    prev_sib: Option<Pid>,
    /// Processor snapshot restored when the process is dispatched.
    pub state: State,
    /// CPU microseconds charged to this process so far.
    pub cpu_time: u32,
    /// Key of the semaphore this process is blocked on, if any.
    pub sem: Option<usize>,
    /// Per-trap-class second-level handler registrations.
    pub trap_vectors: [Option<TrapVector>; 3],
}

/// The PCB pool. The free list is itself a process queue.
pub struct PcbPool {
    slots: [Pcb; MAX_PROC],
    free: Option<Pid>,
}

impl PcbPool {
    pub fn new() -> PcbPool {
        let mut pool = PcbPool {
            slots: Default::default(),
            free: None,
        };
        for i in 0..MAX_PROC {
            pool.free(Pid(i));
        }
        pool
    }

    /// Take a PCB off the free queue with every field cleared, or None
    /// when all MAX_PROC records are live.
    pub fn alloc(&mut self) -> Option<Pid> {
        let mut tail = self.free;
        let p = self.remove_head(&mut tail);
        self.free = tail;
        let p = p?;
        // Records get reused; nothing from a previous life may survive.
        self.slots[p.0] = Pcb::default();
        Some(p)
    }

    /// Return `p` to the free queue. The caller guarantees `p` is no
    /// longer reachable from any queue or from the tree.
    pub fn free(&mut self, p: Pid) {
        let mut tail = self.free;
        self.insert_q(&mut tail, p);
        self.free = tail;
    }

    fn next_of(&self, p: Pid) -> Pid {
        self.slots[p.0].next.expect("broken process queue link")
    }

    fn prev_of(&self, p: Pid) -> Pid {
        self.slots[p.0].prev.expect("broken process queue link")
    }

    /// First PCB of the queue whose tail is `tail`, without removal.
    pub fn head(&self, tail: Option<Pid>) -> Option<Pid> {
        tail.map(|t| self.next_of(t))
    }

    /// Append `p` at the tail of the queue; `tail` is updated to `p`.
    pub fn insert_q(&mut self, tail: &mut Option<Pid>, p: Pid) {
        match *tail {
            None => {
                self.slots[p.0].next = Some(p);
                self.slots[p.0].prev = Some(p);
            }
            Some(t) => {
                let head = self.next_of(t);
                self.slots[p.0].next = Some(head);
                self.slots[head.0].prev = Some(p);
                self.slots[t.0].next = Some(p);
                self.slots[p.0].prev = Some(t);
            }
        }
        *tail = Some(p);
    }

    /// Detach and return the head of the queue; `tail` becomes None when
    /// the queue empties.
    pub fn remove_head(&mut self, tail: &mut Option<Pid>) -> Option<Pid> {
        let t = (*tail)?;
        let head = self.next_of(t);
        if head == t {
            *tail = None;
        } else {
            let new_head = self.next_of(head);
            self.slots[t.0].next = Some(new_head);
            self.slots[new_head.0].prev = Some(t);
        }
        self.slots[head.0].next = None;
        self.slots[head.0].prev = None;
        Some(head)
    }

    /// Detach `p` from anywhere in the queue, traversing from the head.
    /// Returns None when `p` is not on this queue.
    pub fn out_q(&mut self, tail: &mut Option<Pid>, p: Pid) -> Option<Pid> {
        let t = (*tail)?;
        if p == t {
            if self.next_of(t) == t {
                *tail = None;
            } else {
                let prev = self.prev_of(t);
                let next = self.next_of(t);
                self.slots[next.0].prev = Some(prev);
                self.slots[prev.0].next = Some(next);
                *tail = Some(prev);
            }
            self.slots[p.0].next = None;
            self.slots[p.0].prev = None;
            return Some(p);
        }
        let mut cur = self.next_of(t);
        while cur != t {
            if cur == p {
                let prev = self.prev_of(cur);
                let next = self.next_of(cur);
                self.slots[next.0].prev = Some(prev);
                self.slots[prev.0].next = Some(next);
                self.slots[cur.0].next = None;
                self.slots[cur.0].prev = None;
                return Some(cur);
            }
            cur = self.next_of(cur);
        }
        None
    }

    pub fn empty_child(&self, p: Pid) -> bool {
        self.slots[p.0].child.is_none()
    }

    /// Make `p` the newest child of `parent`. The previous newest child
    /// becomes `p`'s previous sibling.
    pub fn insert_child(&mut self, parent: Pid, p: Pid) {
        match self.slots[parent.0].child {
            None => self.slots[p.0].prev_sib = None,
            Some(first) => {
                self.slots[first.0].next_sib = Some(p);
                self.slots[p.0].prev_sib = Some(first);
            }
        }
        // No next sibling: most recently born.
        self.slots[p.0].next_sib = None;
        self.slots[parent.0].child = Some(p);
        self.slots[p.0].parent = Some(parent);
    }

    /// Detach and return the newest child of `parent`, promoting its
    /// previous sibling. None when `parent` has no children.
    pub fn remove_child(&mut self, parent: Pid) -> Option<Pid> {
        let first = self.slots[parent.0].child?;
        match self.slots[first.0].prev_sib {
            None => {
                self.slots[first.0].parent = None;
                self.slots[parent.0].child = None;
            }
            Some(prev) => {
                self.slots[parent.0].child = Some(prev);
                self.slots[prev.0].next_sib = None;
                self.slots[first.0].prev_sib = None;
                self.slots[first.0].parent = None;
            }
        }
        Some(first)
    }

    /// Detach `p` from its parent's child list wherever it sits, splicing
    /// its siblings across the gap. None when `p` has no parent.
    pub fn out_child(&mut self, p: Pid) -> Option<Pid> {
        let parent = self.slots[p.0].parent?;
        if self.slots[parent.0].child == Some(p) {
            return self.remove_child(parent);
        }
        // p is older than the newest child, so a next sibling exists.
        let next = self.slots[p.0].next_sib.expect("broken sibling list");
        match self.slots[p.0].prev_sib {
            None => self.slots[next.0].prev_sib = None,
            Some(prev) => {
                self.slots[next.0].prev_sib = Some(prev);
                self.slots[prev.0].next_sib = Some(next);
                self.slots[p.0].prev_sib = None;
            }
        }
        self.slots[p.0].next_sib = None;
        self.slots[p.0].parent = None;
        Some(p)
    }

    #[cfg(test)]
    pub fn queue_len(&self, tail: Option<Pid>) -> usize {
        let Some(t) = tail else { return 0 };
        let mut n = 1;
        let mut cur = self.next_of(t);
        while cur != t {
            n += 1;
            cur = self.next_of(cur);
        }
        n
    }

    #[cfg(test)]
    pub fn queue_contains(&self, tail: Option<Pid>, p: Pid) -> bool {
        let Some(t) = tail else { return false };
        let mut cur = t;
        loop {
            if cur == p {
                return true;
            }
            cur = self.next_of(cur);
            if cur == t {
                return false;
            }
        }
    }
}

impl core::ops::Index<Pid> for PcbPool {
    type Output = Pcb;

    fn index(&self, p: Pid) -> &Pcb {
        &self.slots[p.0]
    }
}

impl core::ops::IndexMut<Pid> for PcbPool {
    fn index_mut(&mut self, p: Pid) -> &mut Pcb {
        &mut self.slots[p.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhausts_at_max_proc_and_recycles() {
        let mut pool = PcbPool::new();
        let mut taken = Vec::new();
        for _ in 0..MAX_PROC {
            taken.push(pool.alloc().expect("pool emptied early"));
        }
        assert!(pool.alloc().is_none());
        pool.free(taken.pop().unwrap());
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn alloc_clears_every_field() {
        let mut pool = PcbPool::new();
        let p = pool.alloc().unwrap();
        pool[p].cpu_time = 1234;
        pool[p].sem = Some(0xdead);
        pool[p].trap_vectors[2] = Some(TrapVector {
            old_area: 1,
            new_area: 2,
        });
        pool[p].state.pc = 0x8000;
        pool.free(p);

        // The same slot comes back eventually; drain until it does.
        loop {
            let q = pool.alloc().unwrap();
            if q == p {
                assert_eq!(pool[q].cpu_time, 0);
                assert_eq!(pool[q].sem, None);
                assert_eq!(pool[q].trap_vectors, [None; 3]);
                assert_eq!(pool[q].state.pc, 0);
                break;
            }
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut pool = PcbPool::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        let mut q = None;
        pool.insert_q(&mut q, a);
        pool.insert_q(&mut q, b);
        pool.insert_q(&mut q, c);
        assert_eq!(pool.head(q), Some(a));
        assert_eq!(pool.remove_head(&mut q), Some(a));
        assert_eq!(pool.remove_head(&mut q), Some(b));
        assert_eq!(pool.remove_head(&mut q), Some(c));
        assert_eq!(pool.remove_head(&mut q), None);
        assert!(q.is_none());
    }

    #[test]
    fn out_q_removes_head_middle_and_tail() {
        let mut pool = PcbPool::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        let mut q = None;
        for p in [a, b, c] {
            pool.insert_q(&mut q, p);
        }

        assert_eq!(pool.out_q(&mut q, b), Some(b));
        assert_eq!(pool.queue_len(q), 2);

        // Removing the tail must move the tail back to its predecessor.
        assert_eq!(pool.out_q(&mut q, c), Some(c));
        assert_eq!(q, Some(a));

        assert_eq!(pool.out_q(&mut q, a), Some(a));
        assert!(q.is_none());
    }

    #[test]
    fn out_q_on_foreign_pcb_is_none_and_queue_survives() {
        let mut pool = PcbPool::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let stranger = pool.alloc().unwrap();
        let mut q = None;
        pool.insert_q(&mut q, a);
        pool.insert_q(&mut q, b);

        assert_eq!(pool.out_q(&mut q, stranger), None);
        assert_eq!(pool.queue_len(q), 2);
        assert_eq!(pool.head(q), Some(a));
    }

    #[test]
    fn insert_then_out_restores_queue() {
        let mut pool = PcbPool::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let x = pool.alloc().unwrap();
        let mut q = None;
        pool.insert_q(&mut q, a);
        pool.insert_q(&mut q, b);

        pool.insert_q(&mut q, x);
        assert_eq!(pool.out_q(&mut q, x), Some(x));

        assert_eq!(pool.queue_len(q), 2);
        assert_eq!(pool.remove_head(&mut q), Some(a));
        assert_eq!(pool.remove_head(&mut q), Some(b));
    }

    #[test]
    fn children_pop_newest_first() {
        let mut pool = PcbPool::new();
        let parent = pool.alloc().unwrap();
        let old = pool.alloc().unwrap();
        let young = pool.alloc().unwrap();
        pool.insert_child(parent, old);
        pool.insert_child(parent, young);

        assert!(!pool.empty_child(parent));
        assert_eq!(pool.remove_child(parent), Some(young));
        assert_eq!(pool.remove_child(parent), Some(old));
        assert_eq!(pool.remove_child(parent), None);
        assert!(pool.empty_child(parent));
    }

    #[test]
    fn out_child_splices_a_middle_sibling() {
        let mut pool = PcbPool::new();
        let parent = pool.alloc().unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        pool.insert_child(parent, a);
        pool.insert_child(parent, b);
        pool.insert_child(parent, c);

        assert_eq!(pool.out_child(b), Some(b));
        assert_eq!(pool.out_child(b), None); // no longer anyone's child

        assert_eq!(pool.remove_child(parent), Some(c));
        assert_eq!(pool.remove_child(parent), Some(a));
        assert!(pool.empty_child(parent));
    }

    #[test]
    fn out_child_of_oldest_sibling() {
        let mut pool = PcbPool::new();
        let parent = pool.alloc().unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.insert_child(parent, a);
        pool.insert_child(parent, b);

        assert_eq!(pool.out_child(a), Some(a));
        assert_eq!(pool.remove_child(parent), Some(b));
        assert!(pool.empty_child(parent));
    }

    #[test]
    fn orphan_has_no_parent_to_leave() {
        let mut pool = PcbPool::new();
        let p = pool.alloc().unwrap();
        assert_eq!(pool.out_child(p), None);
    }
}
