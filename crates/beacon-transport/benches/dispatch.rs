//! Dispatch benchmarks for beacon-transport.

use beacon_transport::{Dispatcher, RawEvent};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Listeners filtering on their own channel, as channel bindings do.
fn channel_listeners(dispatcher: &Dispatcher, channels: usize, counter: &Arc<AtomicU64>) {
    for i in 0..channels {
        let name = format!("orders.{i}");
        let counter = Arc::clone(counter);
        dispatcher.on(
            "App\\Events\\OrderShipped",
            Arc::new(move |event: &RawEvent| {
                if event.is_for(&name) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }),
        );
    }
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fan_out");
    group.throughput(Throughput::Elements(1));

    for channels in [1usize, 16, 256] {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));
        channel_listeners(&dispatcher, channels, &counter);
        let event = RawEvent::new("App\\Events\\OrderShipped", "orders.0", json!({ "id": 1 }));

        group.bench_with_input(BenchmarkId::from_parameter(channels), &event, |b, event| {
            b.iter(|| dispatcher.dispatch(black_box(event)))
        });
    }
    group.finish();
}

fn bench_unmatched_event(c: &mut Criterion) {
    let dispatcher = Dispatcher::new();
    let counter = Arc::new(AtomicU64::new(0));
    channel_listeners(&dispatcher, 16, &counter);
    let event = RawEvent::new("App\\Events\\Unknown", "orders.0", json!(null));

    c.bench_function("dispatch_unmatched", |b| {
        b.iter(|| dispatcher.dispatch(black_box(&event)))
    });
}

criterion_group!(benches, bench_fan_out, bench_unmatched_event);
criterion_main!(benches);
