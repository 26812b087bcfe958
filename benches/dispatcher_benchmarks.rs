use async_dispatcher::{handler_fn, BoxError, Config, Dispatcher, TracingObserver};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::{hint::black_box, sync::Arc};

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

// submit + drain, trivial handler
fn bench_submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");
    let rt = create_runtime();

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));

        for workers in [1usize, 4, 16] {
            let dispatcher = rt
                .block_on(async {
                    Dispatcher::with_config(
                        handler_fn(|i: usize| async move {
                            black_box(i);
                            Ok::<(), BoxError>(())
                        }),
                        Config {
                            max_workers: workers,
                            max_pending: None,
                        },
                        Arc::new(TracingObserver),
                    )
                })
                .unwrap();

            group.bench_with_input(
                BenchmarkId::new(format!("{workers}_workers"), size),
                &size,
                |b, &size| {
                    let dispatcher = &dispatcher;
                    b.to_async(&rt).iter(|| async move {
                        for i in 0..size {
                            let _ = black_box(dispatcher.submit(i));
                        }
                        dispatcher.join_all().await;
                    });
                },
            );
        }
    }
    group.finish();
}

// yielding handler to keep every slot busy
fn bench_saturated_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("saturated_pool");
    let rt = create_runtime();
    let size = 5_000usize;
    group.throughput(Throughput::Elements(size as u64));

    let dispatcher = rt
        .block_on(async {
            Dispatcher::with_config(
                handler_fn(|i: usize| async move {
                    tokio::task::yield_now().await;
                    black_box(i);
                    Ok::<(), BoxError>(())
                }),
                Config::io_bound(),
                Arc::new(TracingObserver),
            )
        })
        .unwrap();

    group.bench_function("io_bound_yield", |b| {
        let dispatcher = &dispatcher;
        b.to_async(&rt).iter(|| async move {
            for i in 0..size {
                let _ = dispatcher.submit(i);
            }
            dispatcher.join_all().await;
        });
    });
    group.finish();
}

criterion_group!(benches, bench_submit_drain, bench_saturated_pool);
criterion_main!(benches);
