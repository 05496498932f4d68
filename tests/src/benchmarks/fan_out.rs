//! # Fan-Out Benchmarks
//!
//! Latency targets to validate:
//! - 50 near-instant handlers settle in under 50ms
//! - Handlers run concurrently: N handlers sleeping `d` take about `d`, not `N * d`
//! - A rejected publish (open circuit) costs no dispatch
//!
//! Brutal Conditions:
//! - Full topic (50 subscribers)
//! - Every handler failing
//! - Many topics published in parallel

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use event_bus::{handler_fn, BusConfig, EventBus, EventEnvelope, DEFAULT_MAX_SUBSCRIBERS};
use serde_json::json;
use tokio::runtime::Runtime;

/// Bus with `handlers` no-op subscribers on `topic`.
pub fn bus_with_noop_handlers(topic: &str, handlers: usize) -> EventBus {
    let bus = EventBus::new();
    for i in 0..handlers {
        bus.subscribe(topic, &format!("plugin-{i}"), handler_fn(|_env| async { Ok(()) }))
            .expect("topic has capacity");
    }
    bus
}

/// Bus with `handlers` subscribers on `topic` that always fail.
pub fn bus_with_failing_handlers(topic: &str, handlers: usize) -> EventBus {
    let config = BusConfig::default().with_failure_threshold(u32::MAX);
    let bus = EventBus::with_config(config).expect("valid config");
    for i in 0..handlers {
        bus.subscribe(
            topic,
            &format!("plugin-{i}"),
            handler_fn(|_env| async { Err(anyhow::anyhow!("downstream unavailable")) }),
        )
        .expect("topic has capacity");
    }
    bus
}

fn sample_envelope(topic: &str) -> EventEnvelope {
    EventEnvelope::new(topic, json!({ "id": "c-1", "title": "Hello", "tags": ["a", "b"] }))
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

pub fn brutal_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("event-bus-fan-out");
    group.measurement_time(Duration::from_secs(5));
    let rt = runtime();

    for handlers in [1, 10, 25, DEFAULT_MAX_SUBSCRIBERS] {
        let bus = bus_with_noop_handlers("content.published", handlers);
        group.throughput(Throughput::Elements(handlers as u64));
        group.bench_with_input(BenchmarkId::new("noop_handlers", handlers), &handlers, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(bus.publish(sample_envelope("content.published")).await)
                })
            })
        });
    }

    group.finish();
}

pub fn brutal_failure_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("event-bus-failures");
    let rt = runtime();

    for handlers in [1, 10, DEFAULT_MAX_SUBSCRIBERS] {
        let bus = bus_with_failing_handlers("content.published", handlers);
        group.bench_with_input(
            BenchmarkId::new("all_handlers_failing", handlers),
            &handlers,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        black_box(bus.publish(sample_envelope("content.published")).await)
                    })
                })
            },
        );
    }

    group.finish();
}

pub fn brutal_open_circuit_rejection(c: &mut Criterion) {
    let mut group = c.benchmark_group("event-bus-circuit");
    let rt = runtime();

    let bus = EventBus::with_config(BusConfig::default().with_failure_threshold(1))
        .expect("valid config");
    bus.subscribe(
        "content.published",
        "broken",
        handler_fn(|_env| async { Err(anyhow::anyhow!("broken")) }),
    )
    .expect("topic has capacity");
    let _ = rt.block_on(bus.publish(sample_envelope("content.published")));

    group.bench_function("rejected_publish", |b| {
        b.iter(|| rt.block_on(async { black_box(bus.publish(sample_envelope("content.published")).await) }))
    });

    group.finish();
}

pub fn brutal_parallel_topics(c: &mut Criterion) {
    let mut group = c.benchmark_group("event-bus-parallel-topics");
    let rt = runtime();

    let topics: Vec<String> = (0..16).map(|i| format!("topic-{i}")).collect();
    let bus = Arc::new(EventBus::new());
    for topic in &topics {
        for i in 0..10 {
            bus.subscribe(topic, &format!("plugin-{i}"), handler_fn(|_env| async { Ok(()) }))
                .expect("topic has capacity");
        }
    }

    group.throughput(Throughput::Elements(topics.len() as u64));
    group.bench_function("16_topics_x_10_handlers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let publishes = topics.iter().map(|topic| {
                    let bus = bus.clone();
                    let envelope = sample_envelope(topic);
                    tokio::spawn(async move { bus.publish(envelope).await.is_ok() })
                });
                black_box(futures::future::join_all(publishes).await)
            })
        })
    });

    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_fan_out(c);
    brutal_failure_aggregation(c);
    brutal_open_circuit_rejection(c);
    brutal_parallel_topics(c);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifty_handlers_settle_under_fifty_ms() {
        let bus = bus_with_noop_handlers("content.published", DEFAULT_MAX_SUBSCRIBERS);

        // Warm up allocator and runtime.
        bus.publish(sample_envelope("content.published")).await.unwrap();

        let started = Instant::now();
        let report = bus.publish(sample_envelope("content.published")).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.invoked, DEFAULT_MAX_SUBSCRIBERS);
        assert!(
            elapsed < Duration::from_millis(50),
            "fan-out to 50 handlers took {elapsed:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifty_failing_handlers_settle_under_fifty_ms() {
        let bus = bus_with_failing_handlers("content.published", DEFAULT_MAX_SUBSCRIBERS);

        let started = Instant::now();
        let err = bus.publish(sample_envelope("content.published")).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.failures().len(), DEFAULT_MAX_SUBSCRIBERS);
        assert!(elapsed < Duration::from_millis(50), "took {elapsed:?}");
    }

    /// Sequential dispatch would take 20 x 50ms = 1s.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handlers_run_concurrently() {
        let bus = EventBus::new();
        for i in 0..20 {
            bus.subscribe(
                "media.uploaded",
                &format!("plugin-{i}"),
                handler_fn(|_env| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }),
            )
            .unwrap();
        }

        let started = Instant::now();
        bus.publish(sample_envelope("media.uploaded")).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_slow_handler_bounds_the_publish_not_the_siblings() {
        let bus = EventBus::new();
        let fast_done = Arc::new(parking_lot::Mutex::new(None));

        bus.subscribe(
            "t",
            "slow",
            handler_fn(|_env| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }),
        )
        .unwrap();
        let started = Instant::now();
        let sink = fast_done.clone();
        bus.subscribe(
            "t",
            "fast",
            handler_fn(move |_env| {
                let sink = sink.clone();
                async move {
                    *sink.lock() = Some(Instant::now());
                    Ok(())
                }
            }),
        )
        .unwrap();

        bus.publish(sample_envelope("t")).await.unwrap();
        let total = started.elapsed();
        let fast = fast_done.lock().expect("fast handler ran") - started;

        assert!(fast < Duration::from_millis(50), "fast handler waited {fast:?}");
        assert!(total >= Duration::from_millis(100));
    }
}
