use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use graphdb_storage::{FilesystemAdapter, MemoryAdapter, NounMetadataRecord, NounVectorRecord, StorageAdapter};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn noun_vector(id: Uuid, dims: usize) -> NounVectorRecord {
    NounVectorRecord {
        id,
        vector: vec![0.25; dims],
        connections: Default::default(),
        level: 0,
    }
}

fn noun_metadata() -> NounMetadataRecord {
    NounMetadataRecord {
        noun_type: graphdb_core::NounType::Document,
        created_at: 0,
        updated_at: 0,
        confidence: None,
        weight: None,
        service: None,
        data: Default::default(),
    }
}

fn bench_save_noun_vector_by_backend(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_noun_vector");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for dims in [128usize, 768, 1536] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("memory", dims), &dims, |b, &dims| {
            let adapter = Arc::new(MemoryAdapter::new());
            b.iter(|| {
                rt.block_on(async {
                    let record = noun_vector(Uuid::new_v4(), dims);
                    adapter.save_noun_vector(black_box(&record)).await.unwrap();
                });
            });
        });

        group.bench_with_input(BenchmarkId::new("filesystem", dims), &dims, |b, &dims| {
            let temp = TempDir::new().unwrap();
            let adapter = Arc::new(FilesystemAdapter::new(temp.path()));
            b.iter(|| {
                rt.block_on(async {
                    let record = noun_vector(Uuid::new_v4(), dims);
                    adapter.save_noun_vector(black_box(&record)).await.unwrap();
                });
            });
        });
    }

    group.finish();
}

fn bench_paginated_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("paginated_listing");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for entity_count in [100usize, 1000] {
        let adapter = Arc::new(MemoryAdapter::new());
        rt.block_on(async {
            for _ in 0..entity_count {
                adapter
                    .save_noun_metadata(&Uuid::new_v4(), &noun_metadata())
                    .await
                    .unwrap();
            }
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("first_page_of_50", entity_count),
            &entity_count,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        let page = adapter
                            .get_nouns_with_pagination(
                                graphdb_storage::PageRequest::first(50),
                                None,
                            )
                            .await
                            .unwrap();
                        black_box(page);
                    });
                });
            },
        );
    }

    group.finish();
}

fn bench_generation_cas_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_system_cas");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("memory_sequential_cas", |b| {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut generation = None;
        b.iter(|| {
            rt.block_on(async {
                let record = graphdb_storage::HnswSystemRecord {
                    entry_point_id: Some(Uuid::new_v4()),
                    max_level: 1,
                };
                generation = Some(
                    adapter
                        .save_hnsw_system(black_box(&record), generation)
                        .await
                        .unwrap(),
                );
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_save_noun_vector_by_backend,
    bench_paginated_listing,
    bench_generation_cas_write
);
criterion_main!(benches);
