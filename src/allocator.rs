//! Lock-free slot allocator: a Treiber free list threaded through the slot
//! array itself, with the list head living in the pool header rather than a
//! separate tagged word.
//!
//! Unlike a classic Treiber stack, the head carries no generation tag. A
//! slot index is reused only after a full allocate/free cycle driven by the
//! caller's own refcounting (`add_ref`/`release`), so the ABA window a tag
//! would close is one the surrounding protocol already closes by construction
//! — ABA on `free_list_head` itself is harmless here because the CAS that
//! would be fooled by it changes what it observes (the freed slot), not what
//! it mutates.

use crate::header::{PoolHeader, FREE_END, MAX_CAS_RETRIES};
use crate::region::Region;
use crate::slot::{SlotState, TaskSlot};
use crate::sync::{spin_loop, Ordering};

#[cfg(feature = "std")]
use tracing::warn;

/// Outcome of [`SlotAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The free list was empty, or the CAS retry budget was exhausted.
    NoFreeSlots,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoFreeSlots => write!(f, "no free slots available"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

/// A view over the header and slot array of an initialized pool region.
///
/// Like `TreiberSlab`, this type owns no memory — it is a typed lens onto a
/// [`Region`] that some other owner (a `HeapRegion`, an mmap, the `TaskPool`
/// wrapper) keeps alive.
pub struct SlotAllocator {
    region: Region,
    header_offset: usize,
    slots_offset: usize,
    capacity: u32,
}

unsafe impl Send for SlotAllocator {}
unsafe impl Sync for SlotAllocator {}

impl SlotAllocator {
    /// Build a view over an already-`init`ed region.
    ///
    /// # Safety
    ///
    /// `region` must contain a valid [`PoolHeader`] at `header_offset`
    /// (`validate()` returning `true`) whose `slots_base` matches
    /// `slots_offset`.
    pub unsafe fn new(region: Region, header_offset: usize) -> Self {
        let header = unsafe { region.get::<PoolHeader>(header_offset) };
        Self {
            region,
            header_offset,
            slots_offset: header.slots_base as usize,
            capacity: header.capacity(),
        }
    }

    /// Populate the free list of a freshly `init`ed header, threading every
    /// slot onto it in ascending index order.
    ///
    /// # Safety
    ///
    /// Must run once, with exclusive access, immediately after
    /// [`PoolHeader::init`] and before any `allocate`/`free` call.
    pub unsafe fn init_free_list(region: Region, header_offset: usize) {
        let header = unsafe { region.get::<PoolHeader>(header_offset) };
        let capacity = header.capacity();
        let slots_offset = header.slots_base as usize;

        for i in 0..capacity {
            let slot = unsafe { region.get_mut::<TaskSlot>(slots_offset + i as usize * core::mem::size_of::<TaskSlot>()) };
            let next = if i + 1 < capacity { i + 1 } else { FREE_END };
            slot.init_free(next);
        }

        header.free_list_head.store(0, Ordering::Release);
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        unsafe { self.region.get::<PoolHeader>(self.header_offset) }
    }

    #[inline]
    fn slot(&self, index: u32) -> &TaskSlot {
        debug_assert!(index < self.capacity, "slot index out of bounds");
        unsafe {
            self.region
                .get::<TaskSlot>(self.slots_offset + index as usize * core::mem::size_of::<TaskSlot>())
        }
    }

    /// Claim a free slot, returning its index.
    ///
    /// Bounded to [`MAX_CAS_RETRIES`] attempts; exhaustion (as well as an
    /// observed-empty list) reports [`AllocError::NoFreeSlots`].
    pub fn allocate(&self) -> Result<u32, AllocError> {
        let header = self.header();

        for _ in 0..MAX_CAS_RETRIES {
            let head = header.free_list_head.load(Ordering::Acquire);
            if head == FREE_END {
                return Err(AllocError::NoFreeSlots);
            }

            let candidate = self.slot(head);
            let next = candidate.free_next();

            match header.free_list_head.compare_exchange(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    candidate.set_state(SlotState::Allocated);
                    candidate.refcount.store(1, Ordering::Release);
                    header.allocated_count.fetch_add(1, Ordering::AcqRel);
                    return Ok(head);
                }
                Err(_) => {
                    spin_loop();
                    continue;
                }
            }
        }

        #[cfg(feature = "std")]
        warn!("slot allocator exhausted CAS retry budget");

        Err(AllocError::NoFreeSlots)
    }

    /// Return `slot` to the free list.
    ///
    /// Silently does nothing if `slot` is out of range or already `Free` —
    /// per spec, `free` is infallible from the caller's perspective.
    pub fn free(&self, slot: u32) {
        if slot >= self.capacity {
            return;
        }
        let header = self.header();
        let target = self.slot(slot);

        if target.state() != SlotState::Allocated {
            return;
        }

        for _ in 0..MAX_CAS_RETRIES {
            let head = header.free_list_head.load(Ordering::Acquire);
            target.set_free_next(head);
            target.set_state(SlotState::Free);

            match header.free_list_head.compare_exchange(
                head,
                slot,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    header.allocated_count.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                Err(_) => {
                    spin_loop();
                    continue;
                }
            }
        }

        #[cfg(feature = "std")]
        warn!(slot, "slot free exhausted CAS retry budget");
    }

    /// Increment `slot`'s refcount, returning the post-increment value.
    pub fn add_ref(&self, slot: u32) -> u32 {
        self.slot(slot).refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement `slot`'s refcount, freeing it automatically if it reaches
    /// zero. Returns the post-decrement value.
    ///
    /// Out of range or already at refcount 0, this is a no-op returning `0`
    /// (same OutOfRange/idempotence contract as `free`, spec.md section 4.3).
    pub fn release(&self, slot: u32) -> u32 {
        if slot >= self.capacity {
            return 0;
        }
        let refcount = &self.slot(slot).refcount;
        loop {
            let current = refcount.load(Ordering::Acquire);
            if current == 0 {
                return 0;
            }
            let new_count = current - 1;
            match refcount.compare_exchange(current, new_count, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    if new_count == 0 {
                        self.free(slot);
                    }
                    return new_count;
                }
                Err(_) => {
                    spin_loop();
                    continue;
                }
            }
        }
    }

    #[inline]
    pub fn is_allocated(&self, slot: u32) -> bool {
        slot < self.capacity && self.slot(slot).is_allocated()
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.header().allocated_count()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn task_id(&self, slot: u32) -> u32 {
        self.slot(slot).task_id()
    }

    #[inline]
    pub fn set_task_id(&self, slot: u32, id: u32) {
        self.slot(slot).set_task_id(id);
    }

    #[inline]
    pub fn priority(&self, slot: u32) -> u32 {
        self.slot(slot).priority()
    }

    #[inline]
    pub fn set_priority(&self, slot: u32, priority: u32) {
        self.slot(slot).set_priority(priority);
    }

    #[inline]
    pub fn timestamp(&self, slot: u32) -> u64 {
        self.slot(slot).timestamp()
    }

    #[inline]
    pub fn set_timestamp(&self, slot: u32, ts: u64) {
        self.slot(slot).set_timestamp(ts);
    }

    #[inline]
    pub fn method_id(&self, slot: u32) -> u32 {
        self.slot(slot).method_id()
    }

    #[inline]
    pub fn set_method_id(&self, slot: u32, id: u32) {
        self.slot(slot).set_method_id(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::compute_size;
    use crate::region::HeapRegion;

    fn new_pool(capacity: u32) -> (HeapRegion, u32) {
        let region = HeapRegion::new_zeroed(compute_size(capacity));
        let view = region.region();
        let header = unsafe { view.get_mut::<PoolHeader>(0) };
        let rounded = unsafe { header.init(capacity, view.len()).unwrap() };
        unsafe { SlotAllocator::init_free_list(view, 0) };
        (region, rounded)
    }

    #[test]
    fn allocate_then_free_round_trips() {
        let (region, capacity) = new_pool(4);
        let allocator = unsafe { SlotAllocator::new(region.region(), 0) };

        let mut allocated = alloc::vec::Vec::new();
        for _ in 0..capacity {
            allocated.push(allocator.allocate().unwrap());
        }
        assert_eq!(allocator.allocate(), Err(AllocError::NoFreeSlots));
        assert_eq!(allocator.allocated_count(), capacity);

        for slot in allocated {
            allocator.release(slot);
        }
        assert_eq!(allocator.allocated_count(), 0);
        assert!(allocator.allocate().is_ok());
    }

    #[test]
    fn refcount_prevents_premature_free() {
        let (region, _) = new_pool(2);
        let allocator = unsafe { SlotAllocator::new(region.region(), 0) };

        let slot = allocator.allocate().unwrap();
        assert_eq!(allocator.add_ref(slot), 2);
        assert_eq!(allocator.release(slot), 1);
        assert!(allocator.is_allocated(slot));
        assert_eq!(allocator.release(slot), 0);
        assert!(!allocator.is_allocated(slot));
    }

    #[test]
    fn free_on_already_free_slot_is_silent() {
        let (region, _) = new_pool(2);
        let allocator = unsafe { SlotAllocator::new(region.region(), 0) };

        let slot = allocator.allocate().unwrap();
        allocator.free(slot);
        allocator.free(slot);
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn free_out_of_range_is_silent() {
        let (region, _) = new_pool(2);
        let allocator = unsafe { SlotAllocator::new(region.region(), 0) };
        allocator.free(9999);
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn task_fields_round_trip() {
        let (region, _) = new_pool(2);
        let allocator = unsafe { SlotAllocator::new(region.region(), 0) };
        let slot = allocator.allocate().unwrap();

        allocator.set_task_id(slot, 77);
        allocator.set_priority(slot, 5);
        allocator.set_timestamp(slot, 123_456);
        allocator.set_method_id(slot, 3);

        assert_eq!(allocator.task_id(slot), 77);
        assert_eq!(allocator.priority(slot), 5);
        assert_eq!(allocator.timestamp(slot), 123_456);
        assert_eq!(allocator.method_id(slot), 3);
    }
}
