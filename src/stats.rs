//! Cumulative counters for ring/heap/allocator activity.
//!
//! These are process-local, not part of the shared region: `compute_size`
//! (spec.md section 4.1) fixes the region's byte count to header + ring +
//! slots + heap, with no stats term, so a `Stats` lives alongside a
//! `TaskPool` the way `GlobalTunnelMetrics` sits next to a tunnel rather than
//! inside its wire frames.

use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// Cumulative push/pop/allocation counters plus high-watermarks.
///
/// Every field uses relaxed ordering: these are independent counters, never
/// used to guard a subsequent read of another field.
#[derive(Default)]
pub struct Stats {
    push_count: AtomicU64,
    pop_count: AtomicU64,
    push_failures: AtomicU64,
    pop_failures: AtomicU64,
    cas_retries: AtomicU64,
    alloc_count: AtomicU64,
    free_count: AtomicU64,
    peak_size: AtomicU32,
    peak_allocated: AtomicU32,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_push(&self) {
        self.push_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pop(&self) {
        self.pop_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push_failure(&self) {
        self.push_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pop_failure(&self) {
        self.pop_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alloc(&self) {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise `peak_size` to `candidate` if it exceeds the current watermark.
    pub fn record_size(&self, candidate: u32) {
        raise_watermark(&self.peak_size, candidate);
    }

    /// Raise `peak_allocated` to `candidate` if it exceeds the current
    /// watermark.
    pub fn record_allocated(&self, candidate: u32) {
        raise_watermark(&self.peak_allocated, candidate);
    }

    pub fn get_push_count(&self) -> u64 {
        self.push_count.load(Ordering::Relaxed)
    }

    pub fn get_pop_count(&self) -> u64 {
        self.pop_count.load(Ordering::Relaxed)
    }

    pub fn get_push_failures(&self) -> u64 {
        self.push_failures.load(Ordering::Relaxed)
    }

    pub fn get_pop_failures(&self) -> u64 {
        self.pop_failures.load(Ordering::Relaxed)
    }

    pub fn get_cas_retries(&self) -> u64 {
        self.cas_retries.load(Ordering::Relaxed)
    }

    pub fn get_alloc_count(&self) -> u64 {
        self.alloc_count.load(Ordering::Relaxed)
    }

    pub fn get_free_count(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }

    pub fn get_peak_size(&self) -> u32 {
        self.peak_size.load(Ordering::Relaxed)
    }

    pub fn get_peak_allocated(&self) -> u32 {
        self.peak_allocated.load(Ordering::Relaxed)
    }

    /// Zero every counter. Intended for tests.
    pub fn reset(&self) {
        self.push_count.store(0, Ordering::Relaxed);
        self.pop_count.store(0, Ordering::Relaxed);
        self.push_failures.store(0, Ordering::Relaxed);
        self.pop_failures.store(0, Ordering::Relaxed);
        self.cas_retries.store(0, Ordering::Relaxed);
        self.alloc_count.store(0, Ordering::Relaxed);
        self.free_count.store(0, Ordering::Relaxed);
        self.peak_size.store(0, Ordering::Relaxed);
        self.peak_allocated.store(0, Ordering::Relaxed);
    }
}

fn raise_watermark(cell: &AtomicU32, candidate: u32) {
    let mut current = cell.load(Ordering::Relaxed);
    while candidate > current {
        match cell.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}
