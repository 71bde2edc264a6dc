//! Performance benchmarks for the wshive frame codec.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wshive::protocol::decoder::FrameDecoder;
use wshive::protocol::frame::format_message;
use wshive::protocol::mask::apply_mask;
use wshive::protocol::upgrade::compute_accept_key;
use wshive::{Hub, OpCode, Role};

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

fn masked_frame(payload_size: usize) -> Vec<u8> {
    let payload = vec![0xAB; payload_size];
    let mut wire = Vec::new();
    format_message(&mut wire, &payload, OpCode::Binary, false, Some(MASK));
    wire
}

fn decode_all(wire: &[u8]) -> usize {
    let mut decoder = FrameDecoder::new(Role::Server, false);
    let mut owned = wire.to_vec();
    let mut input: &mut [u8] = &mut owned;
    let mut total = 0;
    while let Some(slice) = decoder.next_slice(&mut input).unwrap() {
        total += slice.payload.len();
    }
    total
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (name, size) in [("small_10b", 10), ("medium_1kb", 1024), ("large_64kb", 65536)] {
        let wire = masked_frame(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| b.iter(|| decode_all(black_box(&wire))));
    }

    group.finish();
}

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");

    for (name, size) in [("small_10b", 10), ("medium_1kb", 1024), ("large_64kb", 65536)] {
        let payload = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut wire = Vec::with_capacity(size + 14);
                format_message(
                    black_box(&mut wire),
                    black_box(&payload),
                    OpCode::Binary,
                    false,
                    Some(MASK),
                );
                wire
            })
        });
    }

    group.finish();
}

fn bench_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");

    for (name, size) in [("1kb", 1024), ("64kb", 65536)] {
        let mut data = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter(|| apply_mask(black_box(&mut data), black_box(MASK)))
        });
    }

    group.finish();
}

fn bench_deflate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deflate");

    let message = b"The quick brown fox jumps over the lazy dog. ".repeat(100);
    group.throughput(Throughput::Bytes(message.len() as u64));
    group.bench_function("shared_roundtrip", |b| {
        let mut hub = Hub::new(6);
        b.iter(|| {
            let compressed = hub.deflate(black_box(&message), None).unwrap();
            hub.inflate(&compressed, 1 << 24).unwrap()
        })
    });

    group.finish();
}

fn bench_accept_key(c: &mut Criterion) {
    c.bench_function("accept_key", |b| {
        b.iter(|| compute_accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")))
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_format,
    bench_mask,
    bench_deflate,
    bench_accept_key
);
criterion_main!(benches);
