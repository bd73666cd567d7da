//! Performance benchmarks for acton-worker
//!
//! These benchmarks measure the performance of:
//! - `JobQueue`: enqueue/dequeue hand-off
//! - `AgentSessionStore`: session round trips through the session agent
//! - `CommitProcessor`: read-modify-write cycles against the in-memory store
//!
//! Run with: `cargo bench --bench queue_benchmark`
#![allow(missing_docs)]

use acton_reactive::prelude::*;
use acton_worker::commits::{CommitProcessor, CommitQueue, CommitRequest, MemoryStore};
use acton_worker::config::{CommitsConfig, SessionsConfig};
use acton_worker::jobs::{job_fn, JobQueue, WorkItem};
use acton_worker::scope::ScopeId;
use acton_worker::sessions::{AgentSessionStore, SessionStore};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn noop() -> WorkItem {
    WorkItem::new(job_fn("noop", |_scope, _cancel| async { Ok(()) }), None)
}

/// Benchmark a single enqueue followed by a dequeue
fn bench_job_queue_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let (queue, mut receiver) = JobQueue::bounded(1024).unwrap();
    let cancel = CancellationToken::new();

    c.bench_function("job_queue/round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                queue.enqueue(noop()).await.unwrap();
                receiver.dequeue(&cancel).await.expect("Should dequeue")
            })
        });
    });
}

/// Benchmark draining a burst of queued jobs
fn bench_job_queue_burst(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("job_queue/burst");

    for burst in [16_u64, 256, 1024] {
        group.throughput(Throughput::Elements(burst));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            b.to_async(&rt).iter(|| async move {
                let capacity = usize::try_from(burst).unwrap();
                let (queue, mut receiver) = JobQueue::bounded(capacity).unwrap();
                let cancel = CancellationToken::new();
                for _ in 0..burst {
                    queue.enqueue(noop()).await.unwrap();
                }
                for _ in 0..burst {
                    receiver.dequeue(&cancel).await.expect("Should dequeue");
                }
            });
        });
    }

    group.finish();
}

/// Benchmark opening and ending a session through the session agent
fn bench_session_lifecycle(c: &mut Criterion) {
    let rt = runtime();

    let sessions = rt.block_on(async {
        let mut runtime = ActonApp::launch();
        AgentSessionStore::spawn(&mut runtime, &SessionsConfig::default())
            .await
            .unwrap()
    });

    c.bench_function("sessions/create_end", |b| {
        b.to_async(&rt).iter(|| async {
            let scope_id = ScopeId::generate();
            sessions.create_session(scope_id).await.unwrap();
            sessions
                .end_session(scope_id)
                .await
                .unwrap()
                .expect("Should finalize")
        });
    });
}

/// Benchmark one uncontended commit against the in-memory store
fn bench_commit_apply(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(MemoryStore::new("main"));
    let (_queue, receiver) = CommitQueue::unbounded();
    let processor = CommitProcessor::new(receiver, store, &CommitsConfig::default());
    let shutdown = CancellationToken::new();
    let request = CommitRequest::new(
        "transcript.md",
        b"user: hello\nassistant: hi".to_vec(),
        "transcripts",
        "Save transcript",
    );

    c.bench_function("commits/apply", |b| {
        b.to_async(&rt)
            .iter(|| async { processor.process(&request, &shutdown).await.unwrap() });
    });
}

criterion_group!(
    queue_benches,
    bench_job_queue_round_trip,
    bench_job_queue_burst,
);

criterion_group!(
    name = store_benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_session_lifecycle,
        bench_commit_apply,
);

criterion_main!(queue_benches, store_benches);
