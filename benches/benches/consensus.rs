use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use moirai_consensus::Lachesis;
use moirai_types::Event;
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

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus_ingest");

    group.bench_function("mesh_4x50", |b| {
        b.iter_batched(
            || mesh(50),
            |events| {
                let mut engine = Lachesis::new();
                engine.ingest_sorted(events).unwrap();
                black_box(engine.block());
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus_queries");

    let mut engine = Lachesis::new();
    engine.ingest_sorted(mesh(50)).unwrap();

    group.bench_function("root_set_lookup", |b| {
        b.iter(|| black_box(engine.root_set(black_box(10)).len()))
    });

    group.finish();
}

criterion_group!(benches, bench_ingest, bench_queries);
criterion_main!(benches);
