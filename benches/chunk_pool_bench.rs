use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hermod::{
    chunk::{required_segment_size, ChunkAllocator, MempoolEntry},
    memory::{AccessPolicy, Segment, SegmentConfig},
};
use std::sync::Arc;

fn allocator(payload_size: usize, chunk_count: u32) -> Arc<ChunkAllocator> {
    let entries = vec![MempoolEntry {
        payload_size,
        chunk_count,
    }];
    let segment = Arc::new(
        Segment::new(
            1,
            SegmentConfig::new(
                format!("/hermod_bench_pool_{}_{}", payload_size, std::process::id()),
                required_segment_size(&entries),
                AccessPolicy::PurgeAndCreate,
            ),
        )
        .unwrap(),
    );
    Arc::new(ChunkAllocator::carve(segment, &entries).unwrap())
}

fn benchmark_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("ChunkPool_AcquireRelease");

    for payload_size in [128usize, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("cycle", payload_size),
            payload_size,
            |b, &payload_size| {
                let allocator = allocator(payload_size, 64);
                b.iter(|| {
                    let chunk = allocator.acquire(payload_size).unwrap();
                    allocator.release(chunk).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_retain_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("ChunkPool_RefCount");
    group.throughput(Throughput::Elements(1));

    group.bench_function("retain_release", |b| {
        let allocator = allocator(256, 8);
        let chunk = allocator.acquire(256).unwrap();
        b.iter(|| {
            allocator.retain(chunk).unwrap();
            allocator.release(chunk).unwrap();
        });
        allocator.release(chunk).unwrap();
    });

    group.finish();
}

fn benchmark_contended_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("ChunkPool_Contended");
    group.throughput(Throughput::Elements(256));

    group.bench_function("four_threads", |b| {
        let allocator = allocator(128, 1024);
        b.iter(|| {
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    std::thread::spawn(move || {
                        for _ in 0..64 {
                            let chunk = allocator.acquire(64).unwrap();
                            allocator.release(chunk).unwrap();
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_acquire_release,
    benchmark_retain_release,
    benchmark_contended_acquire
);
criterion_main!(benches);
