//! `TaskPool`: the thin host-visible wrapper a caller actually holds.
//!
//! Grounded in `HubHost`/`HubPeer` (`hub_session.rs`): own the mapping,
//! compute offsets once, and hand out typed views over it. Unlike the hub,
//! there is no peer table, no extents, no size classes — those exist there
//! to multiplex many tenants over one segment; this crate maps exactly one
//! region for exactly one allocator/ring/heap triple.

use std::io;

use crate::allocator::SlotAllocator;
use crate::header::{compute_size, InitError, PoolHeader};
use crate::heap::PriorityQueue;
use crate::region::Region;
use crate::ring::Ring;
use crate::stats::Stats;

/// Construction parameters for a [`TaskPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Requested slot capacity, rounded up to a power of two by `init`.
    pub capacity: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// An anonymous, shared, zero-initialized mapping backing a pool.
///
/// Shared (`MAP_SHARED`) even though it is anonymous: a caller may `fork`
/// after creating a `TaskPool` and both processes will observe the same
/// region, which is the point of this crate's existence.
struct Mapping {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn anonymous(len: usize) -> io::Result<Self> {
        // SAFETY: requesting a fresh anonymous mapping; arguments are all
        // valid per mmap(2), and we check the MAP_FAILED sentinel below.
        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            base: base as *mut u8,
            len,
        })
    }

    fn region(&self) -> Region {
        // SAFETY: `base` is valid for `len` bytes for the lifetime of `self`;
        // mmap with PROT_READ|PROT_WRITE returns page-aligned memory, which
        // is always >= our required 64-byte alignment.
        unsafe { Region::from_raw_parts(self.base, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` came from a matching `mmap` call above.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

/// Errors returned by [`TaskPool::create`] / [`TaskPool::attach`].
#[derive(Debug)]
pub enum PoolError {
    /// The underlying `mmap` call failed.
    Io(io::Error),
    /// `init` reported a layout problem.
    Init(InitError),
    /// `attach` found no valid header at offset 0.
    NotInitialized,
}

impl core::fmt::Display for PoolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "mmap failed: {e}"),
            Self::Init(e) => write!(f, "pool init failed: {e}"),
            Self::NotInitialized => write!(f, "region has no valid pool header"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A pool mapped into this process: a slot allocator, FIFO ring and
/// priority queue sharing one region, plus process-local stats.
pub struct TaskPool {
    _mapping: Mapping,
    allocator: SlotAllocator,
    ring: Ring,
    heap: PriorityQueue,
    stats: Stats,
}

impl TaskPool {
    /// Map and initialize a fresh pool.
    pub fn create(config: PoolConfig) -> Result<Self, PoolError> {
        let len = compute_size(config.capacity);
        let mapping = Mapping::anonymous(len).map_err(PoolError::Io)?;
        let region = mapping.region();

        let header = unsafe { region.get_mut::<PoolHeader>(0) };
        unsafe { header.init(config.capacity, region.len()) }.map_err(PoolError::Init)?;
        unsafe { SlotAllocator::init_free_list(region, 0) };

        let entries_offset = core::mem::size_of::<PoolHeader>();
        let allocator = unsafe { SlotAllocator::new(region, 0) };
        let ring = unsafe { Ring::new(region, 0, entries_offset) };
        let heap = unsafe { PriorityQueue::new(region, 0) };

        Ok(Self {
            _mapping: mapping,
            allocator,
            ring,
            heap,
            stats: Stats::new(),
        })
    }

    /// Attach this process to a region another `TaskPool` in this process
    /// already `create`d (e.g. after a `fork`). Shared memory spanning
    /// distinct processes via a file descriptor is a host integration
    /// concern outside this crate's scope; `create` already maps memory a
    /// forked child inherits.
    ///
    /// # Safety
    ///
    /// `region` must contain a valid header produced by a prior `create`,
    /// and must outlive the returned `TaskPool`.
    pub unsafe fn attach(region: Region) -> Result<AttachedView, PoolError> {
        let header = unsafe { region.get::<PoolHeader>(0) };
        if !header.validate() {
            return Err(PoolError::NotInitialized);
        }
        let entries_offset = core::mem::size_of::<PoolHeader>();
        Ok(AttachedView {
            allocator: unsafe { SlotAllocator::new(region, 0) },
            ring: unsafe { Ring::new(region, 0, entries_offset) },
            heap: unsafe { PriorityQueue::new(region, 0) },
            stats: Stats::new(),
        })
    }

    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn heap(&self) -> &PriorityQueue {
        &self.heap
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// A view over a region this process does not own the mapping for — e.g.
/// one shared with a parent process across a `fork`, where the parent's
/// [`TaskPool`] keeps the `mmap` alive.
pub struct AttachedView {
    allocator: SlotAllocator,
    ring: Ring,
    heap: PriorityQueue,
    stats: Stats,
}

impl AttachedView {
    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn heap(&self) -> &PriorityQueue {
        &self.heap
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_use_round_trip() {
        let pool = TaskPool::create(PoolConfig { capacity: 8 }).unwrap();

        let slot = pool.allocator().allocate().unwrap();
        pool.allocator().set_priority(slot, 5);
        pool.ring().push(slot, 5).unwrap();
        pool.stats().record_push();

        let popped = pool.ring().pop().unwrap();
        assert_eq!(crate::ring::unpack_slot(popped), slot);
        pool.allocator().release(popped_slot_index(popped));
        assert_eq!(pool.stats().get_push_count(), 1);
    }

    fn popped_slot_index(entry: u64) -> u32 {
        crate::ring::unpack_slot(entry)
    }

    #[test]
    fn default_config_has_nonzero_capacity() {
        assert!(PoolConfig::default().capacity > 0);
    }
}
