use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use tunnelport::{FairQueue, FairQueueConfig, NullSink};

fn bench_fair_queue(c: &mut Criterion) {
    c.bench_function("fairq_64_flows_drain", |b| {
        b.iter(|| {
            let mut queue = FairQueue::new(
                Box::new(NullSink::new(1500)),
                FairQueueConfig::default().with_packet_weight(32),
            );
            let flows: Vec<_> = (0..64).map(|_| queue.attach()).collect();
            for (idx, &flow) in flows.iter().enumerate() {
                queue.send(flow, Bytes::from(vec![0u8; 64 + idx * 16]));
            }
            let mut drained = 0;
            while drained < 64 {
                if queue.poll().is_some() {
                    drained += 1;
                }
            }
            queue.prepare_free();
            for flow in flows {
                queue.detach(flow);
            }
        });
    });
}

criterion_group!(benches, bench_fair_queue);
criterion_main!(benches);
