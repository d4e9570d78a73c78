use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rumbo::{NodeDescriptor, Shard, TopologySnapshot};

fn sample_snapshot() -> TopologySnapshot {
    let shards = (0..16u16)
        .map(|i| {
            let lo = i * 1024;
            let hi = if i == 15 { 16383 } else { lo + 1023 };
            Shard {
                upstream: NodeDescriptor::upstream(format!("10.0.{}.1", i), 6379),
                replicas: vec![
                    NodeDescriptor::replica(format!("10.0.{}.2", i), 6379),
                    NodeDescriptor::replica(format!("10.0.{}.3", i), 6379),
                ],
                slots: vec![(lo, hi)],
            }
        })
        .collect();
    TopologySnapshot::cluster(1, shards).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("slot_for_key", |b| {
        b.iter(|| rumbo::slot_for_key(black_box(b"user:1000:profile")))
    });

    c.bench_function("slot_for_key_hash_tag", |b| {
        b.iter(|| rumbo::slot_for_key(black_box(b"{user:1000}:followers")))
    });

    let snapshot = sample_snapshot();

    c.bench_function("upstream_for_slot", |b| {
        let mut slot = 0u16;
        b.iter(|| {
            slot = (slot + 7) % 16384;
            black_box(snapshot.upstream_for_slot(black_box(slot)))
        })
    });

    c.bench_function("read_candidates", |b| {
        let mut slot = 0u16;
        b.iter(|| {
            slot = (slot + 7) % 16384;
            black_box(snapshot.read_candidates(black_box(slot)))
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
