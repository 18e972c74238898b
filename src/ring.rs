//! FIFO ring buffer of packed `(priority, slot)` entries.
//!
//! Single-producer/single-consumer: the ring does not itself arbitrate
//! between multiple concurrent pushers or poppers, only between the one
//! producer and one consumer whose roles `head`/`tail` encode. The
//! zero-sentinel "is this entry slot still occupied by the previous lap"
//! check is what lets the producer and consumer share the entry array
//! without a 128-bit CAS on the packed value. Cells store `pack_entry(...) +
//! 1` rather than the raw packed value, so a legitimately pushed `(slot = 0,
//! priority = 0)` entry (which packs to `0`) never collides with the empty
//! sentinel; see `encode_cell`/`decode_cell`.

use crate::header::PoolHeader;
use crate::region::Region;
use crate::sync::Ordering;

#[cfg(feature = "std")]
use tracing::debug;

/// The packed representation of a ring entry: `(priority << 32) | slot`.
pub type RingEntryBits = u64;

/// Sentinel packed value meaning "this entry slot is empty".
pub const ENTRY_EMPTY: u64 = 0;

/// Errors returned by [`Ring::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// `tail - head >= capacity`: the ring is at capacity.
    Full,
    /// The entry slot the new tail would occupy hasn't been cleared by the
    /// consumer yet.
    SlotBusy,
}

impl core::fmt::Display for RingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "ring is full"),
            Self::SlotBusy => write!(f, "ring entry slot still occupied"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RingError {}

/// Pack a `(priority, slot)` pair into the ring's 64-bit entry format.
#[inline]
pub fn pack_entry(slot: u32, priority: u32) -> u64 {
    ((priority as u64) << 32) | slot as u64
}

/// Extract the slot index from a packed entry.
#[inline]
pub fn unpack_slot(entry: u64) -> u32 {
    entry as u32
}

/// Extract the priority from a packed entry.
#[inline]
pub fn unpack_priority(entry: u64) -> u32 {
    (entry >> 32) as u32
}

/// A legitimately pushed `(slot = 0, priority = 0)` packs to `0`, which is
/// indistinguishable from `ENTRY_EMPTY`. The ring stores `packed_entry + 1`
/// in its entry cells so the occupied/empty handshake stays unambiguous;
/// `pop`/`contains` undo the offset before handing a packed value back, so
/// `pack_entry`/`unpack_slot`/`unpack_priority` keep their documented
/// full-`u32`-range round trip for callers.
#[inline]
fn encode_cell(packed: u64) -> u64 {
    packed.wrapping_add(1)
}

#[inline]
fn decode_cell(stored: u64) -> u64 {
    stored.wrapping_sub(1)
}

/// A view over the header and entry array of an initialized pool region's
/// FIFO ring. `head` and `tail` live in the shared [`PoolHeader`]; the entry
/// array is a flat run of `capacity` atomic `u64`s immediately after it.
pub struct Ring {
    region: Region,
    header_offset: usize,
    entries_offset: usize,
    capacity: u32,
    mask: u32,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Build a view over an already-`init`ed region. The entry array is
    /// assumed to immediately follow the header, per `PoolOffsets`.
    ///
    /// # Safety
    ///
    /// `region` must contain a valid [`PoolHeader`] at `header_offset`.
    pub unsafe fn new(region: Region, header_offset: usize, entries_offset: usize) -> Self {
        let header = unsafe { region.get::<PoolHeader>(header_offset) };
        Self {
            region,
            header_offset,
            entries_offset,
            capacity: header.capacity(),
            mask: header.mask(),
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

    /// Push `(slot, priority)` onto the tail of the ring.
    pub fn push(&self, slot: u32, priority: u32) -> Result<(), RingError> {
        let header = self.header();
        let tail = header.tail.load(Ordering::Acquire);
        let head = header.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.capacity as u64 {
            #[cfg(feature = "std")]
            debug!(capacity = self.capacity, "ring push found queue full");
            return Err(RingError::Full);
        }

        let wrapped = (tail & self.mask as u64) as u32;
        let cell = self.entry(wrapped);

        if cell.load(Ordering::Acquire) != ENTRY_EMPTY {
            return Err(RingError::SlotBusy);
        }

        // Entry must be visible before the tail advances: a consumer that
        // observes the new tail must also observe this write.
        cell.store(encode_cell(pack_entry(slot, priority)), Ordering::Release);
        header.tail.store(tail.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Pop the oldest entry from the ring.
    pub fn pop(&self) -> Option<u64> {
        let header = self.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Acquire);

        if head >= tail {
            return None;
        }

        let wrapped = (head & self.mask as u64) as u32;
        let cell = self.entry(wrapped);
        let value = cell.load(Ordering::Acquire);

        if value == ENTRY_EMPTY {
            // Producer has reserved this index (by advancing tail already
            // observed above) but not yet published the entry.
            return None;
        }

        cell.store(ENTRY_EMPTY, Ordering::Release);
        header.head.store(head.wrapping_add(1), Ordering::Release);

        Some(decode_cell(value))
    }

    /// Number of entries currently queued.
    #[inline]
    pub fn size(&self) -> u32 {
        let header = self.header();
        let tail = header.tail.load(Ordering::Acquire);
        let head = header.head.load(Ordering::Acquire);
        tail.saturating_sub(head) as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Reset the ring to empty. **Not concurrency-safe** — intended for
    /// single-threaded shutdown only.
    pub fn clear(&self) {
        let header = self.header();
        header.head.store(0, Ordering::Release);
        header.tail.store(0, Ordering::Release);
        for i in 0..self.capacity {
            self.entry(i).store(ENTRY_EMPTY, Ordering::Release);
        }
    }

    /// Whether `slot` currently appears anywhere between `head` and `tail`.
    /// **Not concurrency-safe** — intended for tests.
    pub fn contains(&self, slot: u32) -> bool {
        let header = self.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Acquire);
        let mut i = head;
        while i < tail {
            let wrapped = (i & self.mask as u64) as u32;
            let entry = self.entry(wrapped).load(Ordering::Acquire);
            if entry != ENTRY_EMPTY && unpack_slot(decode_cell(entry)) == slot {
                return true;
            }
            i = i.wrapping_add(1);
        }
        false
    }
}
