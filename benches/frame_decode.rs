//! Criterion benchmarks for the decode and store hot paths.
//!
//! Key metrics:
//! - Frame validation cost
//! - Assembler throughput for clean streams cut into notification-sized chunks
//! - Assembler throughput when every frame is preceded by line noise
//! - Store append cost per flush policy
//!
//! Run with: cargo bench --bench frame_decode

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use footsole_daq::protocol::{
    validate, FrameBuilder, StepClock, StreamAssembler, FRAME_LEN, PAYLOAD_LEN,
};
use footsole_daq::storage::TimeSeriesStore;

const FRAMES: usize = 1_000;

fn frame(seed: u8) -> [u8; FRAME_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];
    for (i, b) in payload.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(7).wrapping_add(seed);
    }
    FrameBuilder::new().payload(&payload).build()
}

fn clean_stream() -> Vec<u8> {
    (0..FRAMES).flat_map(|i| frame(i as u8)).collect()
}

fn noisy_stream() -> Vec<u8> {
    (0..FRAMES)
        .flat_map(|i| {
            let mut bytes = vec![0x5A, 0x00, 0xD8, 0x00, 0x11];
            bytes.extend_from_slice(&frame(i as u8));
            bytes
        })
        .collect()
}

fn frame_validate(c: &mut Criterion) {
    let good = frame(1);
    let mut bad = good;
    bad[100] ^= 0xFF;

    let mut group = c.benchmark_group("frame_validate");
    group.throughput(Throughput::Bytes(FRAME_LEN as u64));
    group.bench_function("valid", |b| b.iter(|| validate(black_box(&good)).is_ok()));
    group.bench_function("bad_checksum", |b| {
        b.iter(|| validate(black_box(&bad)).is_err())
    });
    group.finish();
}

fn assembler_throughput(c: &mut Criterion) {
    let clean = clean_stream();
    let noisy = noisy_stream();

    let mut group = c.benchmark_group("assembler_ingest");
    for chunk in [20usize, 244, FRAME_LEN, 4096] {
        group.throughput(Throughput::Bytes(clean.len() as u64));
        group.bench_with_input(BenchmarkId::new("clean", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut assembler = StreamAssembler::with_clock(StepClock::new(0, 10_000_000));
                let mut decoded = 0;
                for piece in clean.chunks(chunk) {
                    decoded += assembler.ingest(black_box(piece)).len();
                }
                assert_eq!(decoded, FRAMES);
            });
        });
    }

    group.throughput(Throughput::Bytes(noisy.len() as u64));
    group.bench_function("noisy_244", |b| {
        b.iter(|| {
            let mut assembler = StreamAssembler::with_clock(StepClock::new(0, 10_000_000));
            let mut decoded = 0;
            for piece in noisy.chunks(244) {
                decoded += assembler.ingest(black_box(piece)).len();
            }
            assembler.drain_events();
            assert_eq!(decoded, FRAMES);
        });
    });
    group.finish();
}

fn store_append(c: &mut Criterion) {
    if !cfg!(feature = "storage_hdf5") {
        return;
    }
    let mut assembler = StreamAssembler::with_clock(StepClock::new(0, 10_000_000));
    let samples = assembler.ingest(&clean_stream());

    let mut group = c.benchmark_group("store_append");
    group.sample_size(10);
    group.throughput(Throughput::Elements(samples.len() as u64));
    for batch_rows in [1usize, 64] {
        group.bench_with_input(
            BenchmarkId::new("batch_rows", batch_rows),
            &batch_rows,
            |b, &batch_rows| {
                b.iter(|| {
                    let dir = tempfile::tempdir().unwrap();
                    let path = dir.path().join("bench.h5");
                    let mut store =
                        TimeSeriesStore::open_with(&path, "sensor_right", batch_rows).unwrap();
                    store.append(black_box(&samples)).unwrap();
                    store.close().unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, frame_validate, assembler_throughput, store_append);
criterion_main!(benches);
