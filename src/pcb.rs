//! Fixed-capacity process control block allocator plus the queue and
//! process-tree primitives built on top of it.
//!
//! PCBs live in one static array (the arena); every pointer in the original
//! design (`p_next`, `p_prev`, `p_prnt`, `p_child`, `p_lsib`, `p_rsib`)
//! becomes a small integer handle into that array. The pool owns every slot;
//! queues and the process tree hold non-owning handles into it.

use crate::konst::MAX_PROC;
use crate::types::ProcessorState;

/// A handle to a PCB slot. `None` plays the role of a null pointer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PcbId(pub u8);

#[derive(Clone)]
pub struct Pcb {
    next: Option<PcbId>,
    prev: Option<PcbId>,
    parent: Option<PcbId>,
    child: Option<PcbId>,
    lsib: Option<PcbId>,
    rsib: Option<PcbId>,
    pub state: ProcessorState,
    pub time: u32,
    /// Address of the semaphore this PCB is blocked on, if any.
    pub sem_addr: Option<u32>,
    /// Index into the support-structure pool, if this PCB backs a u-proc.
    pub support: Option<usize>,
}

impl Pcb {
    const fn empty() -> Self {
        Pcb {
            next: None,
            prev: None,
            parent: None,
            child: None,
            lsib: None,
            rsib: None,
            state: ProcessorState::zeroed(),
            time: 0,
            sem_addr: None,
            support: None,
        }
    }
}

/// Tail handle for a circular doubly-linked process queue. `None` is empty.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ProcQueue(pub Option<PcbId>);

impl ProcQueue {
    pub const fn empty() -> Self {
        ProcQueue(None)
    }
}

pub struct PcbPool {
    slots: [Pcb; MAX_PROC],
    free_head: Option<PcbId>,
}

impl PcbPool {
    pub const fn new() -> Self {
        PcbPool {
            slots: [const { Pcb::empty() }; MAX_PROC],
            free_head: None,
        }
    }

    /// Rebuild the free list from scratch, chaining every slot.
    pub fn init(&mut self) {
        for i in 0..MAX_PROC {
            self.slots[i] = Pcb::empty();
            self.slots[i].next = if i + 1 < MAX_PROC {
                Some(PcbId((i + 1) as u8))
            } else {
                None
            };
        }
        self.free_head = Some(PcbId(0));
    }

    fn get(&self, id: PcbId) -> &Pcb {
        &self.slots[id.0 as usize]
    }

    fn get_mut(&mut self, id: PcbId) -> &mut Pcb {
        &mut self.slots[id.0 as usize]
    }

    pub fn pcb(&self, id: PcbId) -> &Pcb {
        self.get(id)
    }

    pub fn pcb_mut(&mut self, id: PcbId) -> &mut Pcb {
        self.get_mut(id)
    }

    // ---- allocator ----

    /// Remove the head of the free list, reset its fields, and return it.
    pub fn alloc(&mut self) -> Option<PcbId> {
        let id = self.free_head?;
        let next_free = self.get(id).next;
        self.free_head = next_free;
        let slot = self.get_mut(id);
        *slot = Pcb::empty();
        Some(id)
    }

    /// Return a PCB to the head of the free list.
    pub fn free(&mut self, id: PcbId) {
        self.get_mut(id).next = self.free_head;
        self.free_head = Some(id);
    }

    // ---- process queue (ready queue / ASL blocked queues) ----

    pub fn mk_empty_queue(&self) -> ProcQueue {
        ProcQueue::empty()
    }

    pub fn empty_queue(&self, q: ProcQueue) -> bool {
        q.0.is_none()
    }

    pub fn head_queue(&self, q: ProcQueue) -> Option<PcbId> {
        let tail = q.0?;
        Some(self.get(tail).next.unwrap())
    }

    pub fn insert_queue(&mut self, q: &mut ProcQueue, p: PcbId) {
        match q.0 {
            None => {
                self.get_mut(p).next = Some(p);
                self.get_mut(p).prev = Some(p);
            }
            Some(tail) => {
                let head = self.get(tail).next.unwrap();
                self.get_mut(p).prev = Some(tail);
                self.get_mut(p).next = Some(head);
                self.get_mut(tail).next = Some(p);
                self.get_mut(head).prev = Some(p);
            }
        }
        q.0 = Some(p);
    }

    pub fn remove_queue(&mut self, q: &mut ProcQueue) -> Option<PcbId> {
        let tail = q.0?;
        let head = self.get(tail).next.unwrap();
        if head == tail {
            q.0 = None;
        } else {
            let new_head = self.get(head).next.unwrap();
            self.get_mut(tail).next = Some(new_head);
            self.get_mut(new_head).prev = Some(tail);
        }
        self.get_mut(head).next = None;
        self.get_mut(head).prev = None;
        Some(head)
    }

    /// Remove an arbitrary element from the queue by walking it.
    pub fn out_queue(&mut self, q: &mut ProcQueue, p: PcbId) -> Option<PcbId> {
        let tail = q.0?;
        let head = self.get(tail).next.unwrap();
        let mut cursor = head;
        loop {
            if cursor == p {
                let prev = self.get(cursor).prev.unwrap();
                let next = self.get(cursor).next.unwrap();
                if prev == cursor {
                    // sole element
                    q.0 = None;
                } else {
                    self.get_mut(prev).next = Some(next);
                    self.get_mut(next).prev = Some(prev);
                    if tail == cursor {
                        q.0 = Some(prev);
                    }
                }
                self.get_mut(cursor).next = None;
                self.get_mut(cursor).prev = None;
                return Some(cursor);
            }
            if cursor == tail {
                return None;
            }
            cursor = self.get(cursor).next.unwrap();
        }
    }

    // ---- process tree (parent/child/sibling) ----

    pub fn empty_child(&self, p: PcbId) -> bool {
        self.get(p).child.is_none()
    }

    pub fn insert_child(&mut self, parent: PcbId, child: PcbId) {
        self.get_mut(child).parent = Some(parent);
        self.get_mut(child).lsib = None;
        let old_head = self.get(parent).child;
        self.get_mut(child).rsib = old_head;
        if let Some(h) = old_head {
            self.get_mut(h).lsib = Some(child);
        }
        self.get_mut(parent).child = Some(child);
    }

    pub fn remove_child(&mut self, parent: PcbId) -> Option<PcbId> {
        let child = self.get(parent).child?;
        let next_sib = self.get(child).rsib;
        self.get_mut(parent).child = next_sib;
        if let Some(s) = next_sib {
            self.get_mut(s).lsib = None;
        }
        self.get_mut(child).parent = None;
        self.get_mut(child).rsib = None;
        Some(child)
    }

    /// Detach an arbitrary PCB from its parent's child list, wherever it
    /// sits in the sibling chain.
    pub fn out_child(&mut self, p: PcbId) -> Option<PcbId> {
        let parent = self.get(p).parent?;
        if self.get(parent).child == Some(p) {
            let next_sib = self.get(p).rsib;
            self.get_mut(parent).child = next_sib;
            if let Some(s) = next_sib {
                self.get_mut(s).lsib = None;
            }
        } else {
            let lsib = self.get(p).lsib;
            let rsib = self.get(p).rsib;
            if let Some(l) = lsib {
                self.get_mut(l).rsib = rsib;
            }
            if let Some(r) = rsib {
                self.get_mut(r).lsib = lsib;
            }
        }
        self.get_mut(p).parent = None;
        self.get_mut(p).lsib = None;
        self.get_mut(p).rsib = None;
        Some(p)
    }

    pub fn parent_of(&self, p: PcbId) -> Option<PcbId> {
        self.get(p).parent
    }

    pub fn first_child(&self, p: PcbId) -> Option<PcbId> {
        self.get(p).child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_exhausts_at_capacity() {
        let mut pool = PcbPool::new();
        pool.init();
        let mut allocated = Vec::new();
        for _ in 0..MAX_PROC {
            allocated.push(pool.alloc().expect("pool should not be exhausted yet"));
        }
        assert!(pool.alloc().is_none());
        pool.free(allocated.pop().unwrap());
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn queue_insert_then_out_restores_tail() {
        let mut pool = PcbPool::new();
        pool.init();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let mut q = pool.mk_empty_queue();
        pool.insert_queue(&mut q, a);
        let before = q;
        pool.insert_queue(&mut q, b);
        assert_eq!(pool.out_queue(&mut q, b), Some(b));
        assert_eq!(q, before);
    }

    #[test]
    fn queue_is_fifo() {
        let mut pool = PcbPool::new();
        pool.init();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        let mut q = pool.mk_empty_queue();
        pool.insert_queue(&mut q, a);
        pool.insert_queue(&mut q, b);
        pool.insert_queue(&mut q, c);
        assert_eq!(pool.remove_queue(&mut q), Some(a));
        assert_eq!(pool.remove_queue(&mut q), Some(b));
        assert_eq!(pool.remove_queue(&mut q), Some(c));
        assert!(pool.empty_queue(q));
    }

    #[test]
    fn child_insert_then_out_clears_parent_pointer() {
        let mut pool = PcbPool::new();
        pool.init();
        let parent = pool.alloc().unwrap();
        let child = pool.alloc().unwrap();
        assert!(pool.empty_child(parent));
        pool.insert_child(parent, child);
        assert_eq!(pool.out_child(child), Some(child));
        assert!(pool.empty_child(parent));
        assert_eq!(pool.parent_of(child), None);
    }

    #[test]
    fn out_child_detaches_middle_sibling() {
        let mut pool = PcbPool::new();
        pool.init();
        let parent = pool.alloc().unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        pool.insert_child(parent, a);
        pool.insert_child(parent, b);
        pool.insert_child(parent, c);
        // child list head is c -> b -> a
        assert_eq!(pool.out_child(b), Some(b));
        assert_eq!(pool.first_child(parent), Some(c));
        assert_eq!(pool.out_child(c), Some(c));
        assert_eq!(pool.first_child(parent), Some(a));
    }
}
