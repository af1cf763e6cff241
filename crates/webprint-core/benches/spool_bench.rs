//! Criterion benchmarks for the auto-spool splitter and command buffer.
//!
//! Run with:
//! ```bash
//! cargo bench --package webprint-core --bench spool_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use webprint_core::{plan_jobs, split_at_marker, CommandBuffer, SpoolPolicy};

const MARKER: &[u8] = b"\x1DV\x41\x03";

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// A buffer of `tickets` receipts, each ~600 bytes and ending with a cut.
fn make_receipts(tickets: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for n in 0..tickets {
        bytes.extend_from_slice(b"\x1B@");
        for line in 0..20 {
            bytes.extend_from_slice(format!("ITEM {n:04}-{line:02} ........ 12.50\n").as_bytes());
        }
        bytes.extend_from_slice(MARKER);
    }
    bytes
}

/// Benchmarks `split_at_marker` for increasing document counts.
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_at_marker");
    for tickets in [1usize, 10, 100] {
        let bytes = make_receipts(tickets);
        group.bench_with_input(BenchmarkId::new("tickets", tickets), &bytes, |b, bytes| {
            b.iter(|| split_at_marker(black_box(bytes), black_box(MARKER), tickets))
        });
    }
    group.finish();
}

/// Benchmarks the full plan (activation check plus split) on a 100-ticket buffer.
fn bench_plan(c: &mut Criterion) {
    let mut buffer = CommandBuffer::with_charset("windows-1252").expect("known charset");
    buffer.append(&make_receipts(100));
    let policy = SpoolPolicy::new(100, "\u{1D}VA\u{3}");

    c.bench_function("plan_jobs/100_tickets", |b| {
        b.iter(|| plan_jobs(black_box(&buffer), black_box(&policy)).jobs().len())
    });
}

/// Benchmarks base64 appends of a 4 KiB payload.
fn bench_append_base64(c: &mut Criterion) {
    use base64::Engine as _;
    let payload = base64::engine::general_purpose::STANDARD.encode(make_receipts(7));

    c.bench_function("append_base64/4k", |b| {
        b.iter(|| {
            let mut buffer = CommandBuffer::new();
            buffer.append_base64(black_box(&payload)).expect("valid base64")
        })
    });
}

criterion_group!(benches, bench_split, bench_plan, bench_append_base64);
criterion_main!(benches);
