//! Concurrent binary heap over packed `(priority, slot)` entries.
//!
//! There is no teacher precedent for a shared-memory priority queue in this
//! codebase's lineage — `shm-primitives` only ships a Treiber slab and an
//! SPSC ring. This module borrows their idiom (a CAS loop claiming an index
//! in a header-held counter, entries stored as atomics in a flat array
//! immediately following the header) and applies it to heap-shape rather
//! than list- or ring-shape storage, exactly as spec.md section 4.5
//! describes: `pq_size` is the sole linearization point for both push and
//! pop; the sift performed after claiming an index is not itself atomic,
//! but since only one thread ever owns a given index between the CAS that
//! claims it and the sift that settles it, no other thread observes it mid-
//! sift in a way that violates the heap invariant at any index it can see
//! (entries other threads may be sifting past are only ever compared with
//! `Ordering::Acquire`-loaded snapshots).

use crate::header::PoolHeader;
use crate::region::Region;
use crate::sync::{spin_loop, Ordering};

#[cfg(feature = "std")]
use tracing::debug;

/// Errors returned by [`PriorityQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// `pq_size == capacity`.
    Full,
}

impl core::fmt::Display for HeapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "priority queue is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HeapError {}

/// Invert a priority so that "highest producer priority" sorts to the root
/// of a standard min-heap on the packed 64-bit value.
#[inline]
fn inverted_priority(priority: u32) -> u32 {
    u32::MAX - priority
}

#[inline]
fn pack(slot: u32, priority: u32) -> u64 {
    ((inverted_priority(priority) as u64) << 32) | slot as u64
}

#[inline]
fn unpack_slot(entry: u64) -> u32 {
    entry as u32
}

/// A view over the header and entry array of an initialized pool region's
/// priority queue. `pq_size` lives in the shared [`PoolHeader`]; the entry
/// array is a flat run of `capacity` atomic `u64`s at `pq_base_offset`.
pub struct PriorityQueue {
    region: Region,
    header_offset: usize,
    entries_offset: usize,
    capacity: u32,
}

unsafe impl Send for PriorityQueue {}
unsafe impl Sync for PriorityQueue {}

impl PriorityQueue {
    /// Build a view over an already-`init`ed region.
    ///
    /// # Safety
    ///
    /// `region` must contain a valid [`PoolHeader`] at `header_offset`.
    pub unsafe fn new(region: Region, header_offset: usize) -> Self {
        let header = unsafe { region.get::<PoolHeader>(header_offset) };
        Self {
            region,
            header_offset,
            entries_offset: header.pq_base_offset as usize,
            capacity: header.capacity(),
        }
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        unsafe { self.region.get::<PoolHeader>(self.header_offset) }
    }

    #[inline]
    fn entry(&self, index: u32) -> &crate::sync::AtomicU64 {
        unsafe {
            self.region
                .get::<crate::sync::AtomicU64>(self.entries_offset + index as usize * core::mem::size_of::<crate::sync::AtomicU64>())
        }
    }

    /// Push `(slot, priority)` into the queue.
    pub fn push(&self, slot: u32, priority: u32) -> Result<(), HeapError> {
        let header = self.header();
        let packed = pack(slot, priority);

        loop {
            let n = header.pq_size.load(Ordering::Acquire);
            if n == self.capacity {
                #[cfg(feature = "std")]
                debug!(capacity = self.capacity, "priority queue push found queue full");
                return Err(HeapError::Full);
            }

            match header.pq_size.compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.entry(n).store(packed, Ordering::Release);
                    self.sift_up(n);
                    return Ok(());
                }
                Err(_) => {
                    spin_loop();
                    continue;
                }
            }
        }
    }

    /// Pop the highest-priority slot.
    pub fn pop(&self) -> Option<u32> {
        let header = self.header();

        loop {
            let n = header.pq_size.load(Ordering::Acquire);
            if n == 0 {
                return None;
            }

            match header.pq_size.compare_exchange(n, n - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    let root = self.entry(0).load(Ordering::Acquire);
                    let last = self.entry(n - 1).load(Ordering::Acquire);
                    self.entry(0).store(last, Ordering::Release);
                    self.entry(n - 1).store(0, Ordering::Release);
                    if n > 1 {
                        self.sift_down(0, n - 1);
                    }
                    return Some(unpack_slot(root));
                }
                Err(_) => {
                    spin_loop();
                    continue;
                }
            }
        }
    }

    /// The highest-priority slot without removing it, or `None` if empty.
    pub fn peek(&self) -> Option<u32> {
        let header = self.header();
        if header.pq_size.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(unpack_slot(self.entry(0).load(Ordering::Acquire)))
    }

    /// The priority of the highest-priority slot, or `None` if empty.
    pub fn peek_priority(&self) -> Option<u32> {
        let header = self.header();
        if header.pq_size.load(Ordering::Acquire) == 0 {
            return None;
        }
        let packed = self.entry(0).load(Ordering::Acquire);
        Some(u32::MAX - (packed >> 32) as u32)
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.header().pq_size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reset the queue to empty. **Not concurrency-safe.**
    pub fn clear(&self) {
        let header = self.header();
        header.pq_size.store(0, Ordering::Release);
        for i in 0..self.capacity {
            self.entry(i).store(0, Ordering::Release);
        }
    }

    fn sift_up(&self, mut index: u32) {
        while index > 0 {
            let parent = (index - 1) / 2;
            let current = self.entry(index).load(Ordering::Acquire);
            let parent_val = self.entry(parent).load(Ordering::Acquire);
            if current < parent_val {
                self.entry(index).store(parent_val, Ordering::Release);
                self.entry(parent).store(current, Ordering::Release);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&self, mut index: u32, len: u32) {
        loop {
            let left = index * 2 + 1;
            let right = left + 1;
            let mut smallest = index;
            let mut smallest_val = self.entry(index).load(Ordering::Acquire);

            if left < len {
                let left_val = self.entry(left).load(Ordering::Acquire);
                if left_val < smallest_val {
                    smallest = left;
                    smallest_val = left_val;
                }
            }
            if right < len {
                let right_val = self.entry(right).load(Ordering::Acquire);
                if right_val < smallest_val {
                    smallest = right;
                }
            }

            if smallest == index {
                break;
            }

            let current = self.entry(index).load(Ordering::Acquire);
            let child = self.entry(smallest).load(Ordering::Acquire);
            self.entry(index).store(child, Ordering::Release);
            self.entry(smallest).store(current, Ordering::Release);
            index = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::compute_size;
    use crate::region::HeapRegion;

    fn new_heap(capacity: u32) -> (HeapRegion, PriorityQueue) {
        let region = HeapRegion::new_zeroed(compute_size(capacity));
        let view = region.region();
        let header = unsafe { view.get_mut::<PoolHeader>(0) };
        unsafe { header.init(capacity, view.len()).unwrap() };
        let heap = unsafe { PriorityQueue::new(view, 0) };
        (region, heap)
    }

    #[test]
    fn pops_in_descending_priority_order() {
        let (_region, heap) = new_heap(8);
        heap.push(1, 5).unwrap();
        heap.push(2, 10).unwrap();
        heap.push(3, 1).unwrap();
        heap.push(4, 7).unwrap();

        assert_eq!(heap.pop(), Some(2));
        assert_eq!(heap.pop(), Some(4));
        assert_eq!(heap.pop(), Some(1));
        assert_eq!(heap.pop(), Some(3));
        assert_eq!(heap.pop(), None);
    }

    #[test]
    fn push_fails_when_full() {
        let (_region, heap) = new_heap(2);
        heap.push(1, 1).unwrap();
        heap.push(2, 2).unwrap();
        assert_eq!(heap.push(3, 3), Err(HeapError::Full));
    }

    #[test]
    fn peek_does_not_remove() {
        let (_region, heap) = new_heap(4);
        heap.push(1, 3).unwrap();
        heap.push(2, 9).unwrap();
        assert_eq!(heap.peek(), Some(2));
        assert_eq!(heap.peek_priority(), Some(9));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn ties_are_resolved_deterministically_by_heap_shape() {
        let (_region, heap) = new_heap(4);
        heap.push(1, 5).unwrap();
        heap.push(2, 5).unwrap();
        let first = heap.pop().unwrap();
        let second = heap.pop().unwrap();
        assert!((first == 1 && second == 2) || (first == 2 && second == 1));
    }

    #[test]
    fn clear_empties_queue() {
        let (_region, heap) = new_heap(4);
        heap.push(1, 1).unwrap();
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.pop(), None);
    }
}
