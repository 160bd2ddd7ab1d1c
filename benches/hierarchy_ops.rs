#![forbid(unsafe_code)]

use canopy::{
    payload, AdjacencyList, Hierarchy, HierarchyError, MemoryStore, NestedSet, NodeId,
    PathEnumeration, TraversalOptions,
};
use criterion::{
    black_box, criterion_group, criterion_main, measurement::WallTime, BatchSize, BenchmarkGroup,
    BenchmarkId, Criterion, Throughput,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const READ_NODES: usize = 2_048;
const EDIT_NODES: usize = 256;
const MOVES_PER_BATCH: usize = 32;

/// Random forest: each node joins a random earlier node, a few start new trees.
fn seed_forest<H: Hierarchy>(h: &H, count: usize, rng: &mut ChaCha8Rng) -> Vec<NodeId> {
    let mut ids = Vec::with_capacity(count);
    for num in 0..count {
        let row = if ids.is_empty() || rng.gen_bool(0.02) {
            h.create_root(payload("num", num as i64))
        } else {
            let parent = ids[rng.gen_range(0..ids.len())];
            h.create_child(parent, payload("num", num as i64))
        }
        .expect("seed node");
        ids.push(row.id);
    }
    ids
}

fn bench_reads<H: Hierarchy>(group: &mut BenchmarkGroup<'_, WallTime>, label: &str, h: H) {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let ids = seed_forest(&h, READ_NODES, &mut rng);
    let probes: Vec<(NodeId, NodeId)> = (0..256)
        .map(|_| {
            (
                ids[rng.gen_range(0..ids.len())],
                ids[rng.gen_range(0..ids.len())],
            )
        })
        .collect();
    let bounded = TraversalOptions::unbounded().max_total(64);

    let mut cursor = 0usize;
    let mut next = move || {
        cursor = (cursor + 1) % probes.len();
        probes[cursor]
    };

    group.bench_function(BenchmarkId::new("ancestors", label), |b| {
        b.iter(|| black_box(h.ancestors(next().0, None).expect("ancestors")))
    });
    group.bench_function(BenchmarkId::new("is_child_of", label), |b| {
        b.iter(|| {
            let (node, candidate) = next();
            black_box(h.is_child_of(node, candidate).expect("is_child_of"))
        })
    });
    group.bench_function(BenchmarkId::new("direct_children", label), |b| {
        b.iter(|| black_box(h.direct_children(next().0).expect("direct_children")))
    });
    group.bench_function(BenchmarkId::new("children_max_64", label), |b| {
        b.iter(|| black_box(h.children(next().0, &bounded).expect("children")))
    });
}

fn bench_moves<H, F>(group: &mut BenchmarkGroup<'_, WallTime>, label: &str, make: F)
where
    H: Hierarchy,
    F: Fn() -> H,
{
    group.bench_function(BenchmarkId::new("set_parent", label), |b| {
        b.iter_batched(
            || {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                let h = make();
                let ids = seed_forest(&h, EDIT_NODES, &mut rng);
                (h, ids, rng)
            },
            |(h, ids, mut rng)| {
                for _ in 0..MOVES_PER_BATCH {
                    let child = ids[rng.gen_range(0..ids.len())];
                    let parent = rng.gen_bool(0.9).then(|| ids[rng.gen_range(0..ids.len())]);
                    match h.set_parent(child, parent) {
                        Ok(()) | Err(HierarchyError::Cycle { .. }) => {}
                        Err(other) => panic!("set_parent: {other}"),
                    }
                }
                h
            },
            BatchSize::LargeInput,
        )
    });
    group.bench_function(BenchmarkId::new("delete", label), |b| {
        b.iter_batched(
            || {
                let mut rng = ChaCha8Rng::seed_from_u64(7);
                let h = make();
                let ids = seed_forest(&h, EDIT_NODES, &mut rng);
                (h, ids)
            },
            |(h, ids)| {
                for id in ids.iter().step_by(EDIT_NODES / MOVES_PER_BATCH) {
                    h.delete(*id).expect("delete");
                }
                h
            },
            BatchSize::LargeInput,
        )
    });
}

fn hierarchy_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy/reads");
    group.sample_size(40);
    group.throughput(Throughput::Elements(1));
    bench_reads(&mut group, "adjacency-list", AdjacencyList::new(MemoryStore::new()));
    bench_reads(&mut group, "nested-set", NestedSet::new(MemoryStore::new()));
    bench_reads(
        &mut group,
        "path-enumeration",
        PathEnumeration::new(MemoryStore::new()).expect("path enumeration"),
    );
    group.finish();
}

fn hierarchy_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy/edits");
    group.sample_size(20);
    group.throughput(Throughput::Elements(MOVES_PER_BATCH as u64));
    bench_moves(&mut group, "adjacency-list", || AdjacencyList::new(MemoryStore::new()));
    bench_moves(&mut group, "nested-set", || NestedSet::new(MemoryStore::new()));
    bench_moves(&mut group, "path-enumeration", || {
        PathEnumeration::new(MemoryStore::new()).expect("path enumeration")
    });
    group.finish();
}

criterion_group!(benches, hierarchy_reads, hierarchy_edits);
criterion_main!(benches);
