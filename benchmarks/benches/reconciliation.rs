use alert_triage::backend::{InMemoryBackend, TriageBackend};
use alert_triage::engine::event_view::filter_events;
use alert_triage::engine::merge;
use alert_triage::types::{AnalystAction, Event, Group};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

fn fixtures(size: usize) -> (Vec<Event>, Vec<Group>) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let backend = InMemoryBackend::new();
    for i in 0..size {
        backend.push_normal_event(&format!("n{i}"), &format!("Routine login from host-{i}"));
    }
    for i in 0..size / 10 {
        backend.inject_scenario(&format!("s{i}"), &format!("pattern_{i}"), "Execution", "Malware", 2);
    }

    rt.block_on(async {
        (
            backend.list_events().await.unwrap(),
            backend.list_groups().await.unwrap(),
        )
    })
}

/// Merge cost as collections grow; must stay linear
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.warm_up_time(Duration::from_millis(100));
    group.measurement_time(Duration::from_secs(3));

    for size in [100, 1_000, 10_000] {
        let (events, groups) = fixtures(size);

        // Unchanged poll: the common case
        group.bench_with_input(BenchmarkId::new("events_unchanged", size), &events, |b, events| {
            b.iter(|| merge(black_box(events), events.clone()))
        });

        // One new event at the head, as the event feed delivers them
        let mut grown = events.clone();
        grown.insert(0, events[0].clone());
        grown[0].id = "fresh".to_string();
        group.bench_with_input(BenchmarkId::new("events_one_new", size), &grown, |b, grown| {
            b.iter(|| merge(black_box(&events), grown.clone()))
        });

        // Groups with selections to carry forward
        let mut selected = groups.clone();
        for g in selected.iter_mut().step_by(2) {
            g.selected_action = AnalystAction::Escalate;
        }
        group.bench_with_input(BenchmarkId::new("groups_with_selection", size), &groups, |b, groups| {
            b.iter(|| merge(black_box(&selected), groups.clone()))
        });
    }

    group.finish();
}

/// Full-text filter over serialized events
fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_filter");
    group.warm_up_time(Duration::from_millis(100));
    group.measurement_time(Duration::from_secs(3));

    for size in [100, 1_000, 10_000] {
        let (events, _) = fixtures(size);
        for term in ["host-1", "no-such-term", ""] {
            group.bench_with_input(
                BenchmarkId::new(format!("term_{:?}", term), size),
                &events,
                |b, events| b.iter(|| filter_events(black_box(events), black_box(term)).len()),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_filter);
criterion_main!(benches);
