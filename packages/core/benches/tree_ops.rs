//! Performance benchmarks for classtree core operations
//!
//! Run with: `cargo bench -p classtree-core`
//!
//! These benchmarks measure the structural hot paths:
//! - Node creation with incremental cache maintenance
//! - Moving a populated subtree between subjects
//! - Full path cache rebuild over a seeded tree

use classtree_core::db::{MemoryBackend, MemoryItemStore, TursoBackend};
use classtree_core::{Level, NewNode, Node, SubtreeDefinition, TreeService};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Service over a fresh libsql database
async fn setup_turso_service() -> (TreeService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(TursoBackend::new(temp_dir.path().join("bench.db")).await.unwrap());
    let service = TreeService::new(backend.clone(), backend, Arc::new(MemoryItemStore::new()));
    (service, temp_dir)
}

fn setup_memory_service() -> TreeService {
    let backend = Arc::new(MemoryBackend::new());
    TreeService::new(backend.clone(), backend, Arc::new(MemoryItemStore::new()))
}

/// Seed subjects, each filled with every built-in template
async fn seed(service: &TreeService, subjects: usize) -> Vec<Node> {
    let mut roots = Vec::with_capacity(subjects);
    for i in 0..subjects {
        let subject = service
            .create_node(NewNode::new(format!("Subject {}", i), Level::Subject))
            .await
            .unwrap();
        for template in ["math_high_school", "physics_high_school", "chemistry_high_school"] {
            service
                .apply_builtin_template(template, Some(subject.id))
                .await
                .unwrap();
        }
        roots.push(subject);
    }
    roots
}

/// Benchmark single-node creation
///
/// Each iteration validates the parent, writes one row and refreshes the
/// cached aggregates up the ancestor chain.
fn bench_create_node(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("create_node_turso", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (service, _temp) = setup_turso_service().await;
                let subject = service
                    .create_node(NewNode::new("Math", Level::Subject))
                    .await
                    .unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let _chapter = service
                        .create_node(
                            NewNode::new(format!("Chapter {}", i), Level::Chapter)
                                .with_parent(subject.id),
                        )
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark moving a chapter (with topics) back and forth between subjects
fn bench_move_subtree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("move_subtree_memory", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let service = setup_memory_service();
                let roots = seed(&service, 20).await;
                let roaming = SubtreeDefinition::new("Roaming", Level::Chapter).with_children(
                    (0..10)
                        .map(|t| SubtreeDefinition::new(format!("Topic {}", t), Level::Topic))
                        .collect(),
                );
                let chapter = service
                    .apply_template(&[roaming], Some(roots[0].id))
                    .await
                    .unwrap()
                    .remove(0);
                let targets = [roots[1].id, roots[0].id];

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let target = targets[(i % 2) as usize];
                    black_box(service.move_node(chapter.id, Some(target)).await.unwrap());
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark a full cache rebuild
fn bench_rebuild_all(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("rebuild_all");
    group.sample_size(20);

    for subjects in [10usize, 50] {
        let service = setup_memory_service();
        rt.block_on(seed(&service, subjects));

        group.bench_function(format!("{}_subjects", subjects), |b| {
            b.iter(|| rt.block_on(service.repair_cache()).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create_node,
    bench_move_subtree,
    bench_rebuild_all
);
criterion_main!(benches);
