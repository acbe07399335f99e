//! Criterion benchmarks for the hot relay path: reading `recipientId` out of
//! an envelope frame.
//!
//! Run with: `cargo bench --package survcom-core --bench envelope_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use survcom_core::{encode_envelope, parse_recipient};

fn make_frame(ciphertext_len: usize) -> String {
    encode_envelope(&json!({
        "recipientId": "9f2c4e1ab37d4c55a1e0b0c7d2f61a88",
        "ciphertext": "A".repeat(ciphertext_len),
    }))
}

fn bench_parse_recipient(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_recipient");
    for size in [64usize, 1024, 16 * 1024] {
        let frame = make_frame(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| parse_recipient(black_box(frame)))
        });
    }
    group.finish();
}

fn bench_parse_rejects_garbage(c: &mut Criterion) {
    let garbage = "not base64 at all!".repeat(64);
    c.bench_function("parse_recipient_garbage", |b| {
        b.iter(|| parse_recipient(black_box(&garbage)))
    });
}

criterion_group!(benches, bench_parse_recipient, bench_parse_rejects_garbage);
criterion_main!(benches);
