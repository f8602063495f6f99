#[macro_use]
extern crate criterion;

use criterion::{BatchSize, Criterion};
use futures::executor::{block_on, ThreadPool};
use futures::io;
use futures::prelude::*;
use sluicegate::{PipeBuilder, ThreadPoolScheduler};
use std::sync::Arc;

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("pipe_read_write", |b| {
        let data = [1; 0x1000];

        b.iter(move || {
            let (mut reader, mut writer) = sluicegate::pipe();

            let producer = async {
                for _ in 0..0x10 {
                    writer.write_all(&data).await.unwrap();
                }
                writer.close().await.unwrap();
            };

            let consumer = async {
                let mut sink = io::sink();
                io::copy(&mut reader, &mut sink).await.unwrap();
            };

            block_on(future::join(producer, consumer));
        })
    });

    c.bench_function("write 100 1K chunks across threads", |b| {
        let pool = ThreadPool::new().unwrap();
        let scheduler = Arc::new(ThreadPoolScheduler::from(pool.clone()));
        let data = [1; 1024];

        b.iter_batched(
            || {
                PipeBuilder::default()
                    .pause_writer_threshold(4096)
                    .reader_scheduler(scheduler.clone())
                    .writer_scheduler(scheduler.clone())
                    .build()
            },
            |(mut reader, mut writer)| {
                let (tx, rx) = futures::channel::oneshot::channel();

                pool.spawn_ok(async move {
                    let mut sink = io::sink();
                    io::copy(&mut reader, &mut sink).await.unwrap();
                    tx.send(()).unwrap();
                });

                block_on(async {
                    for _ in 0..100 {
                        writer.write_all(&data).await.unwrap();
                    }
                    writer.close().await.unwrap();
                    rx.await.unwrap();
                });
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
