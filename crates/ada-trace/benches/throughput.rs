//! Ring and lane throughput benchmarks.
//!
//! `cargo bench -p ada-trace`

use ada_trace::{Fabric, FabricConfig, LaneKind, WriteOutcome};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_index_ring_write(c: &mut Criterion) {
    let config = FabricConfig::default();
    let fabric = Fabric::create_anonymous(config).unwrap();
    let slot = fabric.registry().register(1).unwrap();

    let mut group = c.benchmark_group("index_lane");
    group.throughput(Throughput::Elements(1));
    group.bench_function("write_record", |b| {
        let record = [0u8; 32];
        let mut scratch = vec![0u8; 256 * 32];
        b.iter(|| {
            let lanes = fabric.lanes(slot);
            let pool = lanes.index_pool();
            let outcome = pool.write_record(&record);
            // Keep the pool from exhausting: play consumer in-line.
            if outcome == WriteOutcome::Dropped || pool.submit_queue().len() > 1 {
                while let Some(idx) = pool.take_submitted() {
                    let ring = pool.ring(idx);
                    while ring.read_batch(&mut scratch, 256) > 0 {}
                    pool.return_ring(idx);
                }
            }
            outcome
        });
    });
    group.finish();
}

fn bench_batch_drain(c: &mut Criterion) {
    let config = FabricConfig::default();
    let fabric = Fabric::create_anonymous(config).unwrap();
    let slot = fabric.registry().register(2).unwrap();
    let record = [0u8; 32];

    let mut group = c.benchmark_group("drain");
    for batch in [64usize, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("read_batch", batch), &batch, |b, &batch| {
            let mut scratch = vec![0u8; batch * 32];
            b.iter(|| {
                let lanes = fabric.lanes(slot);
                let pool = lanes.pool(LaneKind::Index);
                for _ in 0..batch {
                    pool.write_record(&record);
                }
                let ring = pool.ring(pool.active_index());
                ring.read_batch(&mut scratch, batch)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_index_ring_write, bench_batch_drain);
criterion_main!(benches);
