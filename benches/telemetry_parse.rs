//! Criterion benchmarks for telemetry parsing.
//!
//! A full poll parses one dump per interval, so this is far from a bottleneck
//! at stock entity counts; the larger board sizes show how block walking
//! scales with descending-id attribution.
//!
//! Run with: cargo bench --bench telemetry_parse

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lfdi_tcb::tcb::{parse_dump, EntityCounts, EntityRegistry};

fn board(controllers: usize, compensators: usize) -> EntityCounts {
    EntityCounts {
        controllers,
        compensators,
        ..EntityCounts::default()
    }
}

fn parse_full_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_dump");

    for (name, counts) in [
        ("stock", EntityCounts::default()),
        ("12_compensators", board(3, 12)),
        ("64_compensators", board(16, 64)),
    ] {
        let dump = EntityRegistry::new(counts).dump();
        group.throughput(Throughput::Bytes(dump.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &dump, |b, dump| {
            let mut registry = EntityRegistry::new(counts);
            b.iter(|| parse_dump(black_box(dump), &mut registry));
        });
    }

    group.finish();
}

fn render_snapshot(c: &mut Criterion) {
    let registry = EntityRegistry::new(EntityCounts::default());
    c.bench_function("registry_rows", |b| b.iter(|| black_box(&registry).rows()));
}

criterion_group!(benches, parse_full_dump, render_snapshot);
criterion_main!(benches);
