//! Active semaphore list: a sorted, free-list-backed pool of semaphore
//! descriptors keyed by the numeric address of the semaphore cell they
//! describe.
//!
//! Two sentinel descriptors (addresses `0x00000000` and `0x0FFFFFFF`) bound
//! the list so insertion and search never need an explicit end-of-list
//! check. A descriptor exists on the list if and only if its blocked-process
//! queue is non-empty.

use crate::konst::{LARGEST_SEM_ADDR, MAX_SEMD, SMALLEST_SEM_ADDR};
use crate::pcb::{PcbId, PcbPool, ProcQueue};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct SemdId(u8);

#[derive(Clone, Copy)]
struct Semd {
    next: Option<SemdId>,
    sem_addr: u32,
    queue: ProcQueue,
}

impl Semd {
    const fn empty() -> Self {
        Semd {
            next: None,
            sem_addr: 0,
            queue: ProcQueue::empty(),
        }
    }
}

pub struct Asl {
    slots: [Semd; MAX_SEMD],
    free_head: Option<SemdId>,
    head: SemdId,
}

impl Asl {
    pub const fn new() -> Self {
        Asl {
            slots: [Semd::empty(); MAX_SEMD],
            free_head: None,
            head: SemdId(0),
        }
    }

    pub fn init(&mut self) {
        for i in 0..MAX_SEMD {
            self.slots[i] = Semd::empty();
        }
        // Slots 0 and 1 are the two sentinels; the rest form the free list.
        self.slots[0].sem_addr = SMALLEST_SEM_ADDR;
        self.slots[0].next = Some(SemdId(1));
        self.slots[1].sem_addr = LARGEST_SEM_ADDR;
        self.slots[1].next = None;
        self.head = SemdId(0);

        for i in 2..MAX_SEMD {
            self.slots[i].next = if i + 1 < MAX_SEMD {
                Some(SemdId((i + 1) as u8))
            } else {
                None
            };
        }
        self.free_head = if MAX_SEMD > 2 {
            Some(SemdId(2))
        } else {
            None
        };
    }

    fn get(&self, id: SemdId) -> &Semd {
        &self.slots[id.0 as usize]
    }

    fn get_mut(&mut self, id: SemdId) -> &mut Semd {
        &mut self.slots[id.0 as usize]
    }

    fn alloc(&mut self) -> Option<SemdId> {
        let id = self.free_head?;
        self.free_head = self.get(id).next;
        Some(id)
    }

    fn release(&mut self, id: SemdId) {
        self.get_mut(id).next = self.free_head;
        self.free_head = Some(id);
    }

    /// Walk the sorted list, returning the descriptor that directly precedes
    /// (or matches) `sem_addr`.
    fn find_predecessor(&self, sem_addr: u32) -> SemdId {
        let mut prev = self.head;
        let mut cur = self.get(prev).next.unwrap();
        while self.get(cur).sem_addr < sem_addr {
            prev = cur;
            cur = self.get(cur).next.unwrap();
        }
        prev
    }

    /// Block `p` on `sem_addr`. Returns `false` if the descriptor pool is
    /// exhausted and a new descriptor was needed.
    pub fn insert_blocked(&mut self, pcbs: &mut PcbPool, sem_addr: u32, p: PcbId) -> bool {
        let prev = self.find_predecessor(sem_addr);
        let next = self.get(prev).next.unwrap();
        if self.get(next).sem_addr == sem_addr {
            pcbs.insert_queue(&mut self.get_mut(next).queue, p);
            pcbs.pcb_mut(p).sem_addr = Some(sem_addr);
            return true;
        }
        let Some(fresh) = self.alloc() else {
            return false;
        };
        {
            let slot = self.get_mut(fresh);
            slot.sem_addr = sem_addr;
            slot.queue = ProcQueue::empty();
            slot.next = Some(next);
        }
        self.get_mut(prev).next = Some(fresh);
        pcbs.insert_queue(&mut self.get_mut(fresh).queue, p);
        pcbs.pcb_mut(p).sem_addr = Some(sem_addr);
        true
    }

    /// Pop the head of the queue blocked on `sem_addr`, deleting the
    /// descriptor if the queue becomes empty.
    pub fn remove_blocked(&mut self, pcbs: &mut PcbPool, sem_addr: u32) -> Option<PcbId> {
        let prev = self.find_predecessor(sem_addr);
        let cur = self.get(prev).next.unwrap();
        if self.get(cur).sem_addr != sem_addr {
            return None;
        }
        let p = pcbs.remove_queue(&mut self.get_mut(cur).queue)?;
        pcbs.pcb_mut(p).sem_addr = None;
        if pcbs.empty_queue(self.get(cur).queue) {
            self.get_mut(prev).next = self.get(cur).next;
            self.release(cur);
        }
        Some(p)
    }

    pub fn head_blocked(&self, pcbs: &PcbPool, sem_addr: u32) -> Option<PcbId> {
        let prev = self.find_predecessor(sem_addr);
        let cur = self.get(prev).next.unwrap();
        if self.get(cur).sem_addr != sem_addr {
            return None;
        }
        pcbs.head_queue(self.get(cur).queue)
    }

    /// Remove `p` from whichever queue currently holds it (used by
    /// terminateProcess to cancel an arbitrary blocked victim).
    pub fn out_blocked(&mut self, pcbs: &mut PcbPool, p: PcbId) -> Option<u32> {
        let sem_addr = pcbs.pcb(p).sem_addr?;
        let prev = self.find_predecessor(sem_addr);
        let cur = self.get(prev).next.unwrap();
        if self.get(cur).sem_addr != sem_addr {
            return None;
        }
        pcbs.out_queue(&mut self.get_mut(cur).queue, p)?;
        pcbs.pcb_mut(p).sem_addr = None;
        if pcbs.empty_queue(self.get(cur).queue) {
            self.get_mut(prev).next = self.get(cur).next;
            self.release(cur);
        }
        Some(sem_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_semaphore_p_then_v_is_noop() {
        let mut pcbs = PcbPool::new();
        pcbs.init();
        let mut asl = Asl::new();
        asl.init();
        let p = pcbs.alloc().unwrap();
        assert!(asl.insert_blocked(&mut pcbs, 0x1000, p));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x1000), Some(p));
        assert_eq!(asl.head_blocked(&pcbs, 0x1000), None);
    }

    #[test]
    fn asl_stays_sorted_by_address() {
        let mut pcbs = PcbPool::new();
        pcbs.init();
        let mut asl = Asl::new();
        asl.init();
        let a = pcbs.alloc().unwrap();
        let b = pcbs.alloc().unwrap();
        let c = pcbs.alloc().unwrap();
        asl.insert_blocked(&mut pcbs, 0x3000, a);
        asl.insert_blocked(&mut pcbs, 0x1000, b);
        asl.insert_blocked(&mut pcbs, 0x2000, c);
        assert_eq!(asl.head_blocked(&pcbs, 0x1000), Some(b));
        assert_eq!(asl.head_blocked(&pcbs, 0x2000), Some(c));
        assert_eq!(asl.head_blocked(&pcbs, 0x3000), Some(a));
    }

    #[test]
    fn out_blocked_deletes_descriptor_when_queue_empties() {
        let mut pcbs = PcbPool::new();
        pcbs.init();
        let mut asl = Asl::new();
        asl.init();
        let p = pcbs.alloc().unwrap();
        asl.insert_blocked(&mut pcbs, 0x5000, p);
        assert_eq!(asl.out_blocked(&mut pcbs, p), Some(0x5000));
        assert_eq!(asl.head_blocked(&pcbs, 0x5000), None);
    }
}
