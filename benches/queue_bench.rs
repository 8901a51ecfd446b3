/*
Measures the hot path of the event pipeline: enqueueing a serialized event
against the accounted memory budget, and the conditional dequeue the message
serializer drives. Both run under the queue mutex in production, so the
numbers here bound the per-event overhead a collector pays.
*/

use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use iotguard::config::TwinConfiguration;
use iotguard::memory::MemoryMonitor;
use iotguard::queueing::SyncQueue;

fn queue_fixture() -> Arc<SyncQueue<Vec<u8>>> {
    let twin = Arc::new(TwinConfiguration::new("agentConfiguration", BTreeMap::new()));
    let monitor = Arc::new(MemoryMonitor::new(twin));
    Arc::new(SyncQueue::new(monitor, false))
}

fn push_pop_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_queue");

    for payload_size in [64usize, 512, 4096] {
        group.bench_with_input(
            BenchmarkId::new("push_pop", payload_size),
            &payload_size,
            |b, &size| {
                let queue = queue_fixture();
                let payload = vec![0u8; size];
                b.iter(|| {
                    queue.push_back(black_box(payload.clone())).unwrap();
                    black_box(queue.pop_front().unwrap());
                });
            },
        );
    }

    group.bench_function("pop_front_if_condition_failed", |b| {
        let queue = queue_fixture();
        queue.push_back(vec![0u8; 4096]).unwrap();
        b.iter(|| {
            // Head never satisfies the budget predicate; measures the
            // reject path the serializer hits on an oversized head.
            let result = queue.pop_front_if(|head| head.len() < 16);
            black_box(result).unwrap_err();
        });
    });

    group.finish();
}

criterion_group!(benches, push_pop_bench);
criterion_main!(benches);
