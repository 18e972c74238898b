//! Task slot descriptor: the 64-byte record a producer fills in and a
//! consumer reads back, plus the `state` discriminant that separates a
//! slot's free-list link from its allocated task id.

use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// A slot's lifecycle state.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free list, available for allocation.
    Free = 0,
    /// Allocated and owned by producer/consumer code.
    Allocated = 1,
}

impl SlotState {
    #[inline]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SlotState::Free),
            1 => Some(SlotState::Allocated),
            _ => None,
        }
    }
}

/// A task descriptor slot (64 bytes, cache-line aligned).
///
/// `next_or_id` is the field spec.md section 9 calls out as duck-typed in
/// the original design: while the slot is `Free` it holds the free-list
/// link (or [`crate::header::FREE_END`]); while `Allocated` it holds the
/// opaque task id the producer assigned. The two meanings are exposed
/// through distinct accessors ([`TaskSlot::free_next`]/[`TaskSlot::task_id`])
/// rather than a single untyped getter.
#[repr(C, align(64))]
pub struct TaskSlot {
    pub(crate) state: AtomicU32,
    pub(crate) next_or_id: AtomicU32,
    pub(crate) priority: AtomicU32,
    _pad0: u32,
    pub(crate) timestamp: AtomicU64,
    pub(crate) method_id: AtomicU32,
    pub(crate) refcount: AtomicU32,
    _pad1: [u8; 32],
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<TaskSlot>() == 64);

impl TaskSlot {
    /// Initialize as a free slot whose free-list link is `next_free`.
    pub fn init_free(&mut self, next_free: u32) {
        self.state = AtomicU32::new(SlotState::Free as u32);
        self.next_or_id = AtomicU32::new(next_free);
        self.priority = AtomicU32::new(0);
        self._pad0 = 0;
        self.timestamp = AtomicU64::new(0);
        self.method_id = AtomicU32::new(0);
        self.refcount = AtomicU32::new(0);
        self._pad1 = [0; 32];
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        SlotState::from_u32(self.state.load(Ordering::Acquire)).unwrap_or(SlotState::Free)
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state() == SlotState::Allocated
    }

    #[inline]
    pub fn set_state(&self, state: SlotState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// The free-list link. Only meaningful while `state() == Free`.
    #[inline]
    pub fn free_next(&self) -> u32 {
        self.next_or_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_free_next(&self, next: u32) {
        self.next_or_id.store(next, Ordering::Release);
    }

    /// The opaque task id. Only meaningful while `state() == Allocated`.
    #[inline]
    pub fn task_id(&self) -> u32 {
        self.next_or_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_task_id(&self, id: u32) {
        self.next_or_id.store(id, Ordering::Release);
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Release);
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_timestamp(&self, ts: u64) {
        self.timestamp.store(ts, Ordering::Release);
    }

    #[inline]
    pub fn method_id(&self) -> u32 {
        self.method_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_method_id(&self, id: u32) {
        self.method_id.store(id, Ordering::Release);
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }
}
