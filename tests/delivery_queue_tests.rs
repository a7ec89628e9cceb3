//! Concurrent delivery-queue tests against a real shared-memory arena

use std::sync::Arc;

use hermod::{
    chunk::ChunkRef,
    memory::{AccessPolicy, Segment, SegmentConfig},
    queue::{DeliveryQueue, QueueArena, QueuePolicy},
};

fn arena(tag: &str) -> Arc<QueueArena> {
    let segment = Arc::new(
        Segment::new(
            0,
            SegmentConfig::new(
                format!("/hermod_dq_{}_{}", tag, std::process::id()),
                256 * 1024,
                AccessPolicy::PurgeAndCreate,
            ),
        )
        .unwrap(),
    );
    Arc::new(QueueArena::new(segment))
}

fn queue_in(arena: &QueueArena, capacity: usize, policy: QueuePolicy) -> DeliveryQueue {
    let offset = arena.alloc(DeliveryQueue::required_size(capacity)).unwrap();
    unsafe { DeliveryQueue::init_at(arena.ptr_at(offset), capacity, policy) }.unwrap()
}

#[test]
fn test_queue_lives_in_the_segment() {
    let arena = arena("placement");
    let queue = queue_in(&arena, 16, QueuePolicy::Block);

    queue.push(ChunkRef::new(1, 64)).unwrap();
    assert_eq!(queue.len(), 1);
    assert!(arena.used() >= DeliveryQueue::required_size(16));
    assert_eq!(queue.pop(), Some(ChunkRef::new(1, 64)));
}

#[test]
fn test_arena_serves_many_queues_until_exhausted() {
    let arena = arena("exhaust");

    let mut queues = Vec::new();
    loop {
        match arena.alloc(DeliveryQueue::required_size(1024)) {
            Ok(offset) => queues.push(offset),
            Err(_) => break,
        }
    }
    assert!(!queues.is_empty());
    assert!(arena.available() < DeliveryQueue::required_size(1024) + 8);
}

#[test]
fn test_spsc_transfers_every_entry_in_order() {
    let arena = arena("spsc");
    let queue = queue_in(&arena, 64, QueuePolicy::Block);

    const COUNT: u32 = 100_000;

    let producer = std::thread::spawn(move || {
        for i in 0..COUNT {
            loop {
                match queue.push(ChunkRef::new(1, i * 8)) {
                    Ok(_) => break,
                    Err(_) => std::hint::spin_loop(),
                }
            }
        }
    });

    let consumer = std::thread::spawn(move || {
        let mut expected = 0u32;
        while expected < COUNT {
            match queue.pop() {
                Some(chunk) => {
                    assert_eq!(chunk, ChunkRef::new(1, expected * 8));
                    expected += 1;
                }
                None => std::hint::spin_loop(),
            }
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();
    assert!(queue.is_empty());
}

#[test]
fn test_concurrent_drop_oldest_never_reorders() {
    let arena = arena("evict");
    let queue = queue_in(&arena, 8, QueuePolicy::DropOldest);

    const COUNT: u32 = 50_000;
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let producer = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for i in 0..COUNT {
                queue.push(ChunkRef::new(1, i * 8)).unwrap();
            }
            done.store(true, std::sync::atomic::Ordering::Release);
        })
    };

    let consumer = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut last: Option<u32> = None;
            loop {
                match queue.pop() {
                    Some(chunk) => {
                        let offset = chunk.offset;
                        // drop-oldest may skip entries but never goes backwards
                        if let Some(last) = last {
                            assert!(offset > last, "saw {} after {}", offset, last);
                        }
                        last = Some(offset);
                    }
                    None if done.load(std::sync::atomic::Ordering::Acquire) => break,
                    None => std::hint::spin_loop(),
                }
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();

    // the window invariant held to the end
    assert!(queue.len() <= queue.capacity());
}
