//! Typed atomic access to arbitrary byte offsets inside a [`Region`].
//!
//! Every mutation the core performs — to the header, a ring entry, a slot
//! field, or a heap entry — goes through one of these helpers rather than a
//! raw pointer dereference, so the ordering discipline lives in one place:
//! acquire for loads that guard reads of further fields, release for stores
//! that publish them, acquire-release for the compare-exchange loops that
//! serialize the free list, ring indices and heap size, and relaxed for pure
//! counters (see `stats.rs`).

use crate::region::Region;
use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// Load a `u32` at `offset` with acquire ordering.
///
/// # Safety
/// `offset` must be 4-byte aligned and `offset + 4 <= region.len()`.
#[inline]
pub unsafe fn load_u32(region: &Region, offset: usize) -> u32 {
    unsafe { region.get::<AtomicU32>(offset).load(Ordering::Acquire) }
}

/// Store a `u32` at `offset` with release ordering.
///
/// # Safety
/// Same preconditions as [`load_u32`].
#[inline]
pub unsafe fn store_u32(region: &Region, offset: usize, value: u32) {
    unsafe { region.get::<AtomicU32>(offset).store(value, Ordering::Release) };
}

/// Fetch-add a `u32` at `offset`, returning the pre-addition value.
///
/// # Safety
/// Same preconditions as [`load_u32`].
#[inline]
pub unsafe fn fetch_add_u32(region: &Region, offset: usize, delta: u32) -> u32 {
    unsafe { region.get::<AtomicU32>(offset).fetch_add(delta, Ordering::AcqRel) }
}

/// Fetch-sub a `u32` at `offset`, returning the pre-subtraction value.
///
/// # Safety
/// Same preconditions as [`load_u32`].
#[inline]
pub unsafe fn fetch_sub_u32(region: &Region, offset: usize, delta: u32) -> u32 {
    unsafe { region.get::<AtomicU32>(offset).fetch_sub(delta, Ordering::AcqRel) }
}

/// Compare-exchange a `u32` at `offset` from `current` to `new`.
///
/// # Safety
/// Same preconditions as [`load_u32`].
#[inline]
pub unsafe fn cas_u32(region: &Region, offset: usize, current: u32, new: u32) -> Result<u32, u32> {
    unsafe {
        region
            .get::<AtomicU32>(offset)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// Atomically raise the `u32` at `offset` to `candidate` if `candidate` is
/// larger than the current value, retrying under contention. Used for peak
/// counters (`stats.rs`); relaxed throughout since this only tracks a
/// watermark, never guards another field.
///
/// # Safety
/// Same preconditions as [`load_u32`].
#[inline]
pub unsafe fn fetch_max_u32(region: &Region, offset: usize, candidate: u32) {
    let cell = unsafe { region.get::<AtomicU32>(offset) };
    let mut current = cell.load(Ordering::Relaxed);
    while candidate > current {
        match cell.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Load a `u64` at `offset` with acquire ordering.
///
/// # Safety
/// `offset` must be 8-byte aligned and `offset + 8 <= region.len()`.
#[inline]
pub unsafe fn load_u64(region: &Region, offset: usize) -> u64 {
    unsafe { region.get::<AtomicU64>(offset).load(Ordering::Acquire) }
}

/// Store a `u64` at `offset` with release ordering.
///
/// # Safety
/// Same preconditions as [`load_u64`].
#[inline]
pub unsafe fn store_u64(region: &Region, offset: usize, value: u64) {
    unsafe { region.get::<AtomicU64>(offset).store(value, Ordering::Release) };
}

/// Compare-exchange a `u64` at `offset` from `current` to `new`.
///
/// # Safety
/// Same preconditions as [`load_u64`].
#[inline]
pub unsafe fn cas_u64(region: &Region, offset: usize, current: u64, new: u64) -> Result<u64, u64> {
    unsafe {
        region
            .get::<AtomicU64>(offset)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// A full fence, available for callers that need to order this thread's
/// prior atomic accesses against a later non-atomic read (e.g. before
/// handing a region to another process). Not used on any hot path in this
/// crate — every hot-path operation carries its own acquire/release pairing.
#[inline]
pub fn fence() {
    crate::sync::fence(Ordering::SeqCst);
}

/// A single-writer/multi-reader sequence lock over a `u64` word.
///
/// Not used by the allocator, ring or heap — those already establish their
/// own happens-before edges through CAS. This is offered as a lighter-weight
/// alternative for a future reader-heavy field (e.g. a snapshot counter) that
/// needs a consistent read without taking a CAS retry loop.
pub struct SeqLock<'a> {
    seq: &'a AtomicU32,
}

impl<'a> SeqLock<'a> {
    /// Wrap the `u32` sequence counter at `offset`.
    ///
    /// # Safety
    /// `offset` must be 4-byte aligned and in bounds of `region`; the caller
    /// must ensure only one writer ever calls [`SeqLock::write`] on this word.
    #[inline]
    pub unsafe fn new(region: &'a Region, offset: usize) -> Self {
        Self {
            seq: unsafe { region.get::<AtomicU32>(offset) },
        }
    }

    /// Run `read` in a retry loop until it observes a stable (even, unchanged)
    /// sequence number on both sides.
    pub fn read<T>(&self, mut read: impl FnMut() -> T) -> T {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let value = read();
            let after = self.seq.load(Ordering::Acquire);
            if before == after {
                return value;
            }
        }
    }

    /// Run `write` bracketed by odd/even sequence transitions, marking the
    /// word as "being written" for the duration.
    pub fn write(&self, mut write: impl FnMut()) {
        let start = self.seq.load(Ordering::Relaxed);
        self.seq.store(start.wrapping_add(1), Ordering::Release);
        write();
        self.seq.store(start.wrapping_add(2), Ordering::Release);
    }
}
