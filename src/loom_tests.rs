#![cfg(all(test, feature = "loom"))]

use crate::allocator::SlotAllocator;
use crate::header::{compute_size, PoolHeader};
use crate::heap::PriorityQueue;
use crate::region::HeapRegion;
use crate::ring::{unpack_slot, Ring};
use crate::sync::{thread, AtomicU32, Ordering};
use alloc::vec;
use loom::sync::Arc;

fn init_pool(owner: &HeapRegion, capacity: u32) {
    let region = owner.region();
    let header = unsafe { region.get_mut::<PoolHeader>(0) };
    unsafe { header.init(capacity, region.len()).unwrap() };
    unsafe { SlotAllocator::init_free_list(region, 0) };
}

#[test]
fn ring_concurrent_push_pop() {
    loom::model(|| {
        let owner = Arc::new(HeapRegion::new_zeroed(compute_size(4)));
        init_pool(&owner, 4);
        let region = owner.region();
        let entries_offset = core::mem::size_of::<PoolHeader>();
        let ring = Arc::new(unsafe { Ring::new(region, 0, entries_offset) });

        let producer_ring = ring.clone();
        let producer_owner = owner.clone();
        let producer = thread::spawn(move || {
            let _keep = producer_owner;
            for i in 0..3u32 {
                while producer_ring.push(i, 0).is_err() {
                    thread::yield_now();
                }
            }
        });

        let consumer_ring = ring.clone();
        let consumer_owner = owner.clone();
        let consumer = thread::spawn(move || {
            let _keep = consumer_owner;
            let mut received = alloc::vec::Vec::new();
            while received.len() < 3 {
                if let Some(entry) = consumer_ring.pop() {
                    received.push(unpack_slot(entry));
                } else {
                    thread::yield_now();
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert_eq!(received, vec![0, 1, 2]);
    });
}

#[test]
fn alloc_concurrent_alloc_free() {
    loom::model(|| {
        let owner = Arc::new(HeapRegion::new_zeroed(compute_size(4)));
        init_pool(&owner, 4);
        let region = owner.region();
        let allocator = Arc::new(unsafe { SlotAllocator::new(region, 0) });

        let a1 = allocator.clone();
        let o1 = owner.clone();
        let t1 = thread::spawn(move || {
            let _keep = o1;
            if let Ok(slot) = a1.allocate() {
                a1.free(slot);
            }
        });

        let a2 = allocator.clone();
        let o2 = owner.clone();
        let t2 = thread::spawn(move || {
            let _keep = o2;
            if let Ok(slot) = a2.allocate() {
                a2.free(slot);
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();
    });
}

#[test]
fn alloc_no_double_alloc() {
    loom::model(|| {
        let owner = Arc::new(HeapRegion::new_zeroed(compute_size(2)));
        init_pool(&owner, 2);
        let region = owner.region();
        let allocator = Arc::new(unsafe { SlotAllocator::new(region, 0) });
        let counter = Arc::new(AtomicU32::new(0));

        let run = |allocator: Arc<SlotAllocator>, counter: Arc<AtomicU32>, owner: Arc<HeapRegion>| {
            let _keep = owner;
            for _ in 0..2 {
                if allocator.allocate().is_ok() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        };

        let t1 = thread::spawn({
            let allocator = allocator.clone();
            let counter = counter.clone();
            let owner = owner.clone();
            move || run(allocator, counter, owner)
        });

        let t2 = thread::spawn({
            let allocator = allocator.clone();
            let counter = counter.clone();
            let owner = owner.clone();
            move || run(allocator, counter, owner)
        });

        t1.join().unwrap();
        t2.join().unwrap();

        assert!(counter.load(Ordering::SeqCst) <= 2);
    });
}

#[test]
fn heap_concurrent_push_pop() {
    loom::model(|| {
        let owner = Arc::new(HeapRegion::new_zeroed(compute_size(4)));
        init_pool(&owner, 4);
        let region = owner.region();
        let heap = Arc::new(unsafe { PriorityQueue::new(region, 0) });

        let h1 = heap.clone();
        let o1 = owner.clone();
        let pusher = thread::spawn(move || {
            let _keep = o1;
            let _ = h1.push(1, 5);
            let _ = h1.push(2, 9);
        });

        let h2 = heap.clone();
        let o2 = owner.clone();
        let popper = thread::spawn(move || {
            let _keep = o2;
            let mut popped = 0;
            for _ in 0..4 {
                if h2.pop().is_some() {
                    popped += 1;
                }
                thread::yield_now();
            }
            popped
        });

        pusher.join().unwrap();
        let popped = popper.join().unwrap();
        assert!(popped <= 2);
    });
}
