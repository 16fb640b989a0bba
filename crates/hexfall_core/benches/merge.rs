//! Merge-engine benchmarks for hexfall_core.
//!
//! Run with: `cargo bench -p hexfall_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hexfall_core::prelude::*;
use hexfall_test_utils::fixtures::{sample_registry, sample_terrain, spawn};

/// Re-derive a traited unit's stats from scratch.
pub fn merge_benchmark(c: &mut Criterion) {
    let registry = sample_registry();
    let mut rng = SeededRng::new(1);
    let ty = registry.resolve("recruit").unwrap();
    let mut unit = Unit::from_type(&registry, ty, 1, true, None, "", Some(&mut rng)).unwrap();

    c.bench_function("reset_and_apply_modifications", |b| {
        b.iter(|| {
            unit.reset_modifications(&registry).unwrap();
            unit.apply_modifications(&registry, None).unwrap();
            black_box(unit.max_hitpoints())
        })
    });
}

/// Cold and warm terrain-cost lookups through an alias.
pub fn terrain_cache_benchmark(c: &mut Criterion) {
    let registry = sample_registry();
    let terrain = sample_terrain();
    let unit = spawn(&registry, "spearman", 1);
    let wooded_hills = TerrainId::new("Wh");

    c.bench_function("movement_cost_warm_cache", |b| {
        b.iter(|| black_box(unit.movement_cost(&wooded_hills, &terrain)))
    });
}

criterion_group!(benches, merge_benchmark, terrain_cache_benchmark);
criterion_main!(benches);
