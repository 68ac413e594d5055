//! Ring buffer throughput: one producer thread, one reader, varying chunk sizes.

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use channel_core::constants::{BLOCK_SIZE, DEFAULT_RING_CAPACITY};
use channel_core::ring::RingBuffer;

/// Bytes pushed through the ring per iteration.
const PAYLOAD: usize = 16 * BLOCK_SIZE;

const CHUNK_SIZES: &[usize] = &[
    4 * 1024,   // small writes
    64 * 1024,
    BLOCK_SIZE, // one block per write
];

fn pump(chunk: usize) -> usize {
    let ring = Arc::new(RingBuffer::new(DEFAULT_RING_CAPACITY).unwrap());
    let writer = ring.clone();
    let producer = thread::spawn(move || {
        let data = vec![0xA5u8; chunk];
        let mut sent = 0;
        while sent < PAYLOAD {
            let n = chunk.min(PAYLOAD - sent);
            writer.write(&data[..n]).unwrap();
            sent += n;
        }
        writer.stop();
    });

    let mut buf = vec![0u8; chunk];
    let mut total = 0;
    loop {
        let out = ring.read(&mut buf);
        total += out.bytes;
        if out.eof {
            break;
        }
    }
    producer.join().unwrap();
    total
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_throughput");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    for &chunk in CHUNK_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| black_box(pump(chunk)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ring);
criterion_main!(benches);
