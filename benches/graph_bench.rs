// Benchmarks for the similarity fallback and bounded graph traversal.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use headkey::operations::text;
use headkey::{
    create_in_memory_document_stores, AgentId, Belief, BeliefId, RelationshipType, StoreConfig,
};

fn bench_similarity(c: &mut Criterion) {
    let a = "the quick brown fox jumps over the lazy dog near the river bank";
    let b = "a quick brown fox jumped over a sleepy dog by the river shore";
    c.bench_function("jaccard_similarity", |bencher| {
        bencher.iter(|| text::jaccard_similarity(black_box(a), black_box(b)))
    });
    c.bench_function("statement_similarity", |bencher| {
        bencher.iter(|| text::statement_similarity(black_box(a), black_box(b)))
    });
}

fn bench_reachability(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let bundle = create_in_memory_document_stores(StoreConfig::default());
    let agent = AgentId::new("bench").unwrap();

    let chain: Vec<BeliefId> = runtime.block_on(async {
        let mut ids = Vec::new();
        for i in 0..64 {
            let belief = Belief::new(
                BeliefId::generate(),
                agent.clone(),
                format!("chain node {i}"),
                0.5,
            )
            .unwrap();
            ids.push(bundle.beliefs.put(belief).await.unwrap().id);
        }
        for pair in ids.windows(2) {
            bundle
                .relationships
                .create(
                    &pair[0],
                    &pair[1],
                    RelationshipType::RelatesTo,
                    0.5,
                    &agent,
                    None,
                )
                .await
                .unwrap();
        }
        ids
    });

    c.bench_function("reachable_depth_16", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                bundle
                    .graph
                    .reachable(black_box(&chain[0]), &agent, 16, None, None)
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(benches, bench_similarity, bench_reachability);
criterion_main!(benches);
