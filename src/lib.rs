#![no_std]
#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod atomics;
pub mod header;
pub mod heap;
pub mod region;
pub mod ring;
pub mod slot;
pub mod sync;

pub mod allocator;
pub mod stats;

#[cfg(feature = "std")]
pub mod pool;

#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;

pub use header::{
    compute_size, InitError, PoolHeader, PoolOffsets, ENTRY_EMPTY, FREE_END, MAX_CAS_RETRIES,
    NO_SLOT,
};
pub use slot::{SlotState, TaskSlot};

pub use allocator::{AllocError, SlotAllocator};
pub use heap::{HeapError, PriorityQueue};
pub use ring::{pack_entry, unpack_priority, unpack_slot, Ring, RingError};
pub use stats::Stats;

#[cfg(feature = "std")]
pub use pool::{AttachedView, PoolConfig, PoolError, TaskPool};

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
