use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mesh_sweep::graph::DirectedGraph;
use mesh_sweep::mesh::slab::slab_grid;
use mesh_sweep::spds::SweepPlaneStructure;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn bench_spds_build(c: &mut Criterion) {
    let grid = slab_grid(10_000, 1, 0);
    c.bench_function("spds_build_slab_10k", |b| {
        b.iter(|| {
            SweepPlaneStructure::build(black_box([1.0, 0.0, 0.0]), &grid, false).unwrap()
        })
    });
}

fn bench_feedback_removal(c: &mut Criterion) {
    // Fixed seed so every run removes the same edge set.
    let mut rng = SmallRng::seed_from_u64(0x5EED);
    let n = 2_000;
    let mut edges = Vec::with_capacity(n * 4);
    for _ in 0..n * 4 {
        edges.push((rng.gen_range(0..n), rng.gen_range(0..n), rng.r#gen::<f64>()));
    }
    c.bench_function("feedback_removal_2k_vertices", |b| {
        b.iter(|| {
            let mut g = DirectedGraph::with_vertices(n);
            for &(from, to, w) in &edges {
                g.add_edge(from, to, w);
            }
            black_box(g.remove_feedback_edges())
        })
    });
}

criterion_group!(benches, bench_spds_build, bench_feedback_removal);
criterion_main!(benches);
