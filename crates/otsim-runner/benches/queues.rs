//! Micro-benchmarks for the scheduler's hot data structures.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use otsim_common::SimTime;
use otsim_event::{Event, EventType};
use otsim_runner::alarm::AlarmManager;
use otsim_runner::queue::SendQueue;

fn bench_alarm_manager(c: &mut Criterion) {
    c.bench_function("alarm_set_and_pop_256_nodes", |b| {
        let mut mgr = AlarmManager::new();
        for id in 1..=256 {
            mgr.add(id);
        }
        let mut t = 0u64;
        b.iter(|| {
            for id in 1..=256u32 {
                t = t.wrapping_add(2_654_435_761);
                mgr.set_timestamp(id, SimTime::from_micros(t % 1_000_000_000));
            }
            for _ in 0..256 {
                let (id, _) = black_box(mgr.next_alarm().unwrap());
                mgr.set_notified(id);
            }
        });
    });
}

fn bench_send_queue(c: &mut Criterion) {
    c.bench_function("send_queue_add_pop_1024", |b| {
        b.iter(|| {
            let mut q = SendQueue::new();
            let mut t = 0u64;
            for i in 0..1024u64 {
                t = t.wrapping_add(2_654_435_761);
                let mut event = Event {
                    event_type: EventType::RadioCommStart,
                    msg_id: i,
                    ..Default::default()
                };
                event.timestamp = SimTime::from_micros(t % 1_000_000);
                q.add(event);
            }
            while let Some(event) = q.pop_next() {
                black_box(event.msg_id);
            }
        });
    });
}

criterion_group!(benches, bench_alarm_manager, bench_send_queue);
criterion_main!(benches);
