//! Tests for chunk pools, size-class promotion, and reference counting

use std::sync::Arc;

use hermod::{
    chunk::{required_segment_size, ChunkAllocator, ChunkHeader, MempoolEntry},
    memory::{AccessPolicy, Segment, SegmentConfig},
    HermodError,
};

fn entries() -> Vec<MempoolEntry> {
    vec![
        MempoolEntry {
            payload_size: 128,
            chunk_count: 8,
        },
        MempoolEntry {
            payload_size: 1024,
            chunk_count: 4,
        },
    ]
}

fn allocator(tag: &str) -> Arc<ChunkAllocator> {
    let entries = entries();
    let config = SegmentConfig::new(
        format!("/hermod_pool_{}_{}", tag, std::process::id()),
        required_segment_size(&entries),
        AccessPolicy::PurgeAndCreate,
    );
    let segment = Arc::new(Segment::new(1, config).unwrap());
    Arc::new(ChunkAllocator::carve(segment, &entries).unwrap())
}

#[test]
fn test_acquire_release_restores_free_count() {
    let allocator = allocator("restore");
    let initial = allocator.free_chunks();
    assert_eq!(initial, 12);

    let chunk = allocator.acquire(64).unwrap();
    assert_eq!(allocator.free_chunks(), initial - 1);
    assert_eq!(allocator.header(chunk).unwrap().references(), 1);

    allocator.release(chunk).unwrap();
    assert_eq!(allocator.free_chunks(), initial);
}

#[test]
fn test_smallest_fit_and_promotion() {
    let allocator = allocator("promote");

    // fits the small class exactly
    let small = allocator.acquire(128).unwrap();
    assert_eq!(allocator.free_chunks_in(0).unwrap(), 7);
    assert_eq!(allocator.free_chunks_in(1).unwrap(), 4);

    // one byte more promotes to the next class
    let large = allocator.acquire(129).unwrap();
    assert_eq!(allocator.free_chunks_in(0).unwrap(), 7);
    assert_eq!(allocator.free_chunks_in(1).unwrap(), 3);

    allocator.release(small).unwrap();
    allocator.release(large).unwrap();
}

#[test]
fn test_exhausted_class_promotes() {
    let allocator = allocator("exhaust");

    let mut held = Vec::new();
    for _ in 0..8 {
        held.push(allocator.acquire(64).unwrap());
    }
    assert_eq!(allocator.free_chunks_in(0).unwrap(), 0);

    // the small class is dry, the request spills into the large one
    let spilled = allocator.acquire(64).unwrap();
    assert_eq!(allocator.free_chunks_in(1).unwrap(), 3);
    assert_eq!(
        allocator.header(spilled).unwrap().origin_pool_id,
        1,
        "spilled chunk must return to the pool it came from"
    );

    for chunk in held.drain(..) {
        allocator.release(chunk).unwrap();
    }
    allocator.release(spilled).unwrap();
    assert_eq!(allocator.free_chunks(), 12);
}

#[test]
fn test_oversized_request_fails_immediately() {
    let allocator = allocator("oversize");
    assert!(matches!(
        allocator.acquire(4096),
        Err(HermodError::OutOfChunks { requested: 4096 })
    ));
    assert_eq!(allocator.free_chunks(), 12);
}

#[test]
fn test_out_of_chunks_when_all_pools_dry() {
    let allocator = allocator("dry");

    let mut held = Vec::new();
    while let Ok(chunk) = allocator.acquire(64) {
        held.push(chunk);
    }
    assert_eq!(held.len(), 12);
    assert!(matches!(
        allocator.acquire(64),
        Err(HermodError::OutOfChunks { .. })
    ));

    for chunk in held {
        allocator.release(chunk).unwrap();
    }
    assert_eq!(allocator.free_chunks(), 12);
}

#[test]
fn test_retain_keeps_chunk_alive() {
    let allocator = allocator("retain");
    let initial = allocator.free_chunks();

    let chunk = allocator.acquire(32).unwrap();
    allocator.retain(chunk).unwrap();
    assert_eq!(allocator.header(chunk).unwrap().references(), 2);

    allocator.release(chunk).unwrap();
    // still one holder, not yet back in the pool
    assert_eq!(allocator.free_chunks(), initial - 1);

    allocator.release(chunk).unwrap();
    assert_eq!(allocator.free_chunks(), initial);
}

#[test]
fn test_release_on_dead_chunk_is_rejected() {
    let allocator = allocator("dead");
    let chunk = allocator.acquire(32).unwrap();
    allocator.release(chunk).unwrap();

    assert!(matches!(
        allocator.release(chunk),
        Err(HermodError::ChunkLogic { .. })
    ));
}

#[test]
fn test_foreign_chunk_is_rejected() {
    let allocator = allocator("foreign");
    let chunk = allocator.acquire(32).unwrap();

    let foreign = hermod::ChunkRef::new(chunk.segment_id + 1, chunk.offset);
    assert!(matches!(
        allocator.release(foreign),
        Err(HermodError::ChunkLogic { .. })
    ));
    let misaligned = hermod::ChunkRef::new(chunk.segment_id, chunk.offset + 1);
    assert!(matches!(
        allocator.retain(misaligned),
        Err(HermodError::ChunkLogic { .. })
    ));

    allocator.release(chunk).unwrap();
}

#[test]
fn test_payload_round_trip() {
    let allocator = allocator("payload");
    let chunk = allocator.acquire(16).unwrap();

    allocator.payload_mut(chunk).unwrap().copy_from_slice(b"0123456789abcdef");
    assert_eq!(allocator.payload(chunk).unwrap(), b"0123456789abcdef");

    let header = allocator.header(chunk).unwrap();
    assert_eq!(header.payload_size, 16);
    assert_eq!(header.user_header_size, 0);

    allocator.release(chunk).unwrap();
}

#[test]
fn test_header_size_constant_matches_layout() {
    assert_eq!(ChunkHeader::SIZE, std::mem::size_of::<ChunkHeader>());
}

#[test]
fn test_concurrent_acquire_release() {
    let allocator = allocator("stress");
    let initial = allocator.free_chunks();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    match allocator.acquire(64) {
                        Ok(chunk) => {
                            allocator.retain(chunk).unwrap();
                            allocator.release(chunk).unwrap();
                            allocator.release(chunk).unwrap();
                        }
                        Err(HermodError::OutOfChunks { .. }) => {
                            std::thread::yield_now();
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    // every chunk is either free or nowhere: the pools account for all of them
    assert_eq!(allocator.free_chunks(), initial);
}
