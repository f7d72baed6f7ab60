//! Benchmarks for the per-hop fixed costs: rebuilding and validating the
//! DAG, and sealing and opening continuations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;

use hopflow::context::{Continuation, ExecutionPosition, PipelineState, Signer};
use hopflow::core::Operation;
use hopflow::pipeline::Dag;

fn wide_fan_in(width: usize) -> Dag {
    let mut dag = Dag::new();
    for i in 0..width {
        let id = format!("n{i}");
        let _ = dag.add_vertex(&id, vec![Operation::function(&id)]);
        let _ = dag.add_edge("start", &id);
        let _ = dag.add_edge(&id, "join");
    }
    let _ = dag.set_aggregator("join", |inputs| Ok(inputs.values().next().cloned()));
    dag
}

fn dag_benchmark(c: &mut Criterion) {
    c.bench_function("build_and_validate_fan_in_64", |b| {
        b.iter(|| {
            let dag = wide_fan_in(black_box(64));
            black_box(dag.validate())
        });
    });
}

fn continuation_benchmark(c: &mut Criterion) {
    let signer = Signer::new("bench-secret");
    let state = PipelineState::stored(
        ExecutionPosition::root("F").enter(Some("item-17".to_string()), "lower"),
        "F.item-17-branch-input",
    );
    let mut store = BTreeMap::new();
    for i in 0..32 {
        store.insert(format!("state:flow/req/n{i}-join-completion"), "1".to_string());
    }

    c.bench_function("seal_and_encode", |b| {
        b.iter(|| {
            let sealed = Continuation::seal(
                &signer,
                "req",
                "",
                black_box(&state),
                vec![0u8; 256],
                store.clone(),
            );
            black_box(sealed.and_then(|c| c.encode()))
        });
    });

    let body = Continuation::seal(&signer, "req", "", &state, vec![0u8; 256], store)
        .and_then(|c| c.encode())
        .unwrap_or_default();
    c.bench_function("decode_and_open", |b| {
        b.iter(|| {
            black_box(Continuation::decode(black_box(&body)).and_then(|c| c.open(&signer)))
        });
    });
}

criterion_group!(benches, dag_benchmark, continuation_benchmark);
criterion_main!(benches);
