use criterion::{criterion_group, criterion_main, Criterion};
use quire_core::{DocumentStore, MemoryBackend, RecordPatch};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Store pre-filled with `n` records named `doc-0` … `doc-{n-1}`.
fn filled_store(rt: &Runtime, n: usize) -> DocumentStore<MemoryBackend> {
    let store = DocumentStore::new(Arc::new(MemoryBackend::new()));
    rt.block_on(async {
        for i in 0..n {
            store
                .create(Some(&format!("doc-{i}")), None)
                .await
                .expect("create");
        }
    });
    store
}

fn bench_get_by_slug(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    for n in [10usize, 100, 1_000] {
        let store = filled_store(&rt, n);
        let target = format!("doc-{}", n - 1);
        c.bench_function(&format!("get_by_slug_scan_{n}"), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(store.get_by_slug(black_box(&target)).await.unwrap()) })
        });
    }
}

fn bench_get_by_id(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let store = filled_store(&rt, 1_000);
    let id = rt.block_on(store.get_by_slug("doc-500")).expect("lookup").id;

    c.bench_function("get_by_id_1000", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(store.get_by_id(black_box(&id)).await.unwrap()) })
    });
}

fn bench_update_content(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let store = filled_store(&rt, 100);
    let id = rt.block_on(store.get_by_slug("doc-50")).expect("lookup").id;

    c.bench_function("update_content", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                store
                    .update(&id, RecordPatch::content("milk, eggs, bread"))
                    .await
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_get_by_slug, bench_get_by_id, bench_update_content);
criterion_main!(benches);
