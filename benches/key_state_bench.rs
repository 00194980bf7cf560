//! Performance benchmarks for key-state edge detection.
//!
//! The poller diffs every key read against the last known state, up to sixty
//! times a second per session. These benchmarks measure that diff for each
//! panel size, both for the common case (nothing changed) and for a full
//! panel flipping at once.
//!
//! # Run Benchmarks
//!
//! ```sh
//! cargo bench --bench key_state_bench
//!
//! # Only the XL panel
//! cargo bench --bench key_state_bench -- xl
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use screamdeck::KeyStateTracker;
use std::hint::black_box;

/// Panel layouts of the shipped device families.
const LAYOUTS: [(&str, u32, u32); 3] = [("mini", 3, 2), ("mk2", 5, 3), ("xl", 8, 4)];

/// Diff a snapshot identical to the known state: the steady-state path.
fn bench_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_state_unchanged");

    for (name, columns, rows) in LAYOUTS {
        let keys = (columns * rows) as usize;
        group.throughput(Throughput::Elements(keys as u64));

        let mut tracker = KeyStateTracker::new(columns, rows);
        let snapshot = vec![0u8; keys];

        group.bench_with_input(BenchmarkId::from_parameter(name), &snapshot, |b, snapshot| {
            b.iter(|| {
                let mut count = 0usize;
                tracker.apply(black_box(snapshot), |_| count += 1);
                black_box(count)
            });
        });
    }

    group.finish();
}

/// Alternate between all-released and all-pressed, emitting one event per
/// key on every diff.
fn bench_all_keys_toggle(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_state_toggle");

    for (name, columns, rows) in LAYOUTS {
        let keys = (columns * rows) as usize;
        group.throughput(Throughput::Elements(keys as u64));

        let mut tracker = KeyStateTracker::new(columns, rows);
        let snapshots = [vec![0u8; keys], vec![1u8; keys]];

        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            let mut flip = 0usize;
            b.iter(|| {
                flip ^= 1;
                black_box(tracker.diff(black_box(&snapshots[flip])))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_unchanged, bench_all_keys_toggle);
criterion_main!(benches);
