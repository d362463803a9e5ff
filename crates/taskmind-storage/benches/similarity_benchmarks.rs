//! Benchmarks for lexical memory recall.
//!
//! `find_similar` loads every candidate row and scores it in process, so its
//! cost grows with the number of stored memories. These benchmarks measure
//! the pure tokenize + Jaccard cost and the full repository call over an
//! in-memory database holding 1000 memories.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use taskmind_core::types::{MemoryType, NewMemory};
use taskmind_storage::{text_similarity, SimilarityOptions, Storage};

const WORDS: &[&str] = &[
    "deployment", "issue", "urgent", "staging", "database", "migration", "review",
    "meeting", "customer", "release", "rollback", "latency", "alert", "backlog",
    "sprint", "planning", "incident", "budget", "design", "retro",
];

/// Generate a short memory text (~12 words) whose vocabulary varies by index.
fn generate_content(index: usize) -> String {
    (0..12)
        .map(|i| WORDS[(index * 7 + i * 3) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_text_similarity(c: &mut Criterion) {
    let contents: Vec<String> = (0..1000).map(generate_content).collect();
    let query = "urgent deployment issue in staging";

    let mut group = c.benchmark_group("text_similarity");
    group.sample_size(200);

    group.bench_function("single_pair", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let score = text_similarity(query, &contents[idx % contents.len()]);
            idx += 1;
            score
        });
    });

    group.bench_function("scan_1000", |b| {
        b.iter(|| {
            contents
                .iter()
                .filter(|content| text_similarity(query, content) >= 0.5)
                .count()
        });
    });

    group.finish();
}

fn bench_find_similar(c: &mut Criterion) {
    let storage = Storage::in_memory().unwrap();
    let drafts = (0..1000)
        .map(|i| NewMemory::new(MemoryType::Fact, generate_content(i)))
        .collect();
    storage.memories.create_many(drafts).unwrap();

    let options = SimilarityOptions {
        threshold: 0.2,
        ..SimilarityOptions::default()
    };

    let mut group = c.benchmark_group("find_similar");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("repository_1000_memories", |b| {
        b.iter(|| {
            storage
                .memories
                .find_similar("urgent deployment issue in staging", &options)
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_text_similarity, bench_find_similar);
criterion_main!(benches);
