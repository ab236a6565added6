use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use moirai_network::Coordinator;
use moirai_types::{Event, ValidatorId};
use uuid::Uuid;

const VALIDATORS: [&str; 4] = ["A", "B", "C", "D"];

fn mesh(steps: u64) -> Vec<Event> {
    let mut events = Vec::new();
    let mut counter: u128 = 1;
    let mut previous: Vec<Uuid> = Vec::new();
    for t in 1..=steps {
        let mut level = Vec::new();
        for v in VALIDATORS {
            let event = Event::with_uuid(Uuid::from_u128(counter), v, t, t, 1, previous.clone());
            counter += 1;
            level.push(event);
        }
        previous = level.iter().map(|e| e.uuid).collect();
        events.extend(level);
    }
    events
}

fn bench_multi_instance(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip_timesteps");

    group.bench_function("mesh_4x20", |b| {
        b.iter_batched(
            || mesh(20),
            |events| {
                let mut coordinator = Coordinator::new(
                    VALIDATORS.map(|v| (ValidatorId::new(v), 1u64)),
                );
                coordinator.run(events);
                black_box(coordinator.time());
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_multi_instance);
criterion_main!(benches);
