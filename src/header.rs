//! Pool header: the 64-byte, cache-line-aligned record at the start of a
//! region that every other operation begins by validating.
//!
//! Layout (spec section 3.1), byte offsets fixed and little-endian:
//!
//! ```text
//! 0   magic            4
//! 4   version          4
//! 8   head             8   (ring consumer index)
//! 16  tail             8   (ring producer index)
//! 24  capacity         4
//! 28  mask             4
//! 32  allocated_count  4
//! 36  _reserved0       4
//! 40  slots_base       4
//! 44  _reserved1       4
//! 48  free_list_head   4
//! 52  pq_size          4
//! 56  pq_base_offset   4
//! 60  _reserved2       4
//! ```

use crate::slot::TaskSlot;
use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// Identifies an initialized pool region ("WPOL" as big-endian ASCII packed
/// into a little-endian u32, matching spec.md's `0x57504F4C`).
pub const MAGIC: u32 = 0x5750_4F4C;

/// Current on-disk/on-wire layout version.
pub const VERSION: u32 = 1;

/// Sentinel: no free slot / no valid slot.
pub const FREE_END: u32 = u32::MAX;

/// Sentinel: no ring entry.
pub const ENTRY_EMPTY: u64 = 0;

/// Sentinel returned by a heap pop against an empty heap.
pub const NO_SLOT: u32 = u32::MAX;

/// Bounded retry budget for every CAS loop in the core (spec.md section 5).
pub const MAX_CAS_RETRIES: u32 = 1000;

#[repr(C, align(64))]
pub struct PoolHeader {
    pub(crate) magic: AtomicU32,
    pub(crate) version: AtomicU32,
    pub(crate) head: AtomicU64,
    pub(crate) tail: AtomicU64,
    pub(crate) capacity: u32,
    pub(crate) mask: u32,
    pub(crate) allocated_count: AtomicU32,
    _reserved0: u32,
    pub(crate) slots_base: u32,
    _reserved1: u32,
    pub(crate) free_list_head: AtomicU32,
    pub(crate) pq_size: AtomicU32,
    pub(crate) pq_base_offset: u32,
    _reserved2: u32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<PoolHeader>() == 64);

/// Round `n` up to the next power of two; `n <= 1` rounds to `1`
/// (spec.md section 4.1).
#[inline]
pub fn next_pow2(n: u32) -> u32 {
    if n <= 1 {
        1
    } else {
        1u32 << (32 - (n - 1).leading_zeros())
    }
}

/// Result of a failed `init` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The region already carries a valid header.
    AlreadyInitialized,
    /// The region is smaller than [`compute_size`] for the requested capacity.
    RegionTooSmall { required: usize, found: usize },
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "region already initialized"),
            Self::RegionTooSmall { required, found } => {
                write!(f, "region too small: need {required} bytes, got {found}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InitError {}

/// Fixed sub-offsets of a pool region, computed once from its capacity.
#[derive(Debug, Clone, Copy)]
pub struct PoolOffsets {
    pub header: usize,
    pub ring: usize,
    pub slots: usize,
    pub heap: usize,
}

impl PoolOffsets {
    pub fn calculate(capacity: u32) -> Self {
        let header = 0usize;
        let ring = header + core::mem::size_of::<PoolHeader>();
        let slots = ring + capacity as usize * core::mem::size_of::<crate::sync::AtomicU64>();
        let heap = slots + capacity as usize * core::mem::size_of::<TaskSlot>();
        Self {
            header,
            ring,
            slots,
            heap,
        }
    }
}

/// Bytes required for a region of `requested_capacity` slots, after rounding
/// the capacity up to a power of two (spec.md section 4.1).
pub fn compute_size(requested_capacity: u32) -> usize {
    let capacity = next_pow2(requested_capacity);
    let offsets = PoolOffsets::calculate(capacity);
    offsets.heap + capacity as usize * core::mem::size_of::<crate::sync::AtomicU64>()
}

impl PoolHeader {
    /// Initialize a fresh header in place. Returns the rounded capacity.
    ///
    /// # Safety
    ///
    /// `self` must be the header sub-region of a zero-initialized, 64-byte
    /// aligned region at least `compute_size(requested_capacity)` bytes
    /// long, and must not be concurrently accessed during initialization.
    pub unsafe fn init(&mut self, requested_capacity: u32, region_len: usize) -> Result<u32, InitError> {
        if self.magic.load(Ordering::Acquire) == MAGIC {
            return Err(InitError::AlreadyInitialized);
        }

        let capacity = next_pow2(requested_capacity);
        let required = compute_size(capacity);
        if region_len < required {
            return Err(InitError::RegionTooSmall {
                required,
                found: region_len,
            });
        }

        let offsets = PoolOffsets::calculate(capacity);

        self.head = AtomicU64::new(0);
        self.tail = AtomicU64::new(0);
        self.capacity = capacity;
        self.mask = capacity - 1;
        self.allocated_count = AtomicU32::new(0);
        self._reserved0 = 0;
        self.slots_base = offsets.slots as u32;
        self._reserved1 = 0;
        self.free_list_head = AtomicU32::new(0);
        self.pq_size = AtomicU32::new(0);
        self.pq_base_offset = offsets.heap as u32;
        self._reserved2 = 0;
        self.version.store(VERSION, Ordering::Release);
        // Publish `magic` last: every other operation's `validate()` checks
        // magic with Acquire, so this release pairs with those loads.
        self.magic.store(MAGIC, Ordering::Release);

        Ok(capacity)
    }

    /// `true` iff `magic` and `version` both match, i.e. the header was
    /// produced by a compatible `init`.
    #[inline]
    pub fn validate(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC
            && self.version.load(Ordering::Acquire) == VERSION
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    #[test]
    fn next_pow2_boundaries() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(4), 4);
        assert_eq!(next_pow2(1024), 1024);
        assert_eq!(next_pow2(1023), 1024);
    }

    #[test]
    fn init_rejects_double_init() {
        let region = HeapRegion::new_zeroed(compute_size(4));
        let view = region.region();
        let header = unsafe { view.get_mut::<PoolHeader>(0) };
        assert_eq!(unsafe { header.init(4, view.len()) }, Ok(4));
        assert_eq!(
            unsafe { header.init(4, view.len()) },
            Err(InitError::AlreadyInitialized)
        );
    }

    #[test]
    fn init_rounds_capacity_up() {
        let region = HeapRegion::new_zeroed(compute_size(3));
        let view = region.region();
        let header = unsafe { view.get_mut::<PoolHeader>(0) };
        assert_eq!(unsafe { header.init(3, view.len()) }, Ok(4));
        assert_eq!(header.capacity(), 4);
        assert_eq!(header.mask(), 3);
    }

    #[test]
    fn validate_false_before_init() {
        let region = HeapRegion::new_zeroed(compute_size(4));
        let header = unsafe { region.region().get::<PoolHeader>(0) };
        assert!(!header.validate());
    }
}
