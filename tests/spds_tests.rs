//! Sweep-ordering scenarios on slab meshes.

use mesh_sweep::comm::{LocalComm, NoComm};
use mesh_sweep::error::SweepError;
use mesh_sweep::mesh::SweepGrid;
use mesh_sweep::mesh::slab::{slab_grid, two_cell_ring};
use mesh_sweep::spds::{AahSweepStructure, FaceOrientation, SweepPlaneStructure};
use serial_test::serial;

const PLUS_X: [f64; 3] = [1.0, 0.0, 0.0];
const MINUS_X: [f64; 3] = [-1.0, 0.0, 0.0];

#[test]
fn slab_spls_follows_the_flow_both_ways() {
    let grid = slab_grid(5, 1, 0);
    let forward = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
    let backward = SweepPlaneStructure::build(MINUS_X, &grid, false).unwrap();
    assert_eq!(forward.spls(), &[0, 1, 2, 3, 4]);
    assert_eq!(backward.spls(), &[4, 3, 2, 1, 0]);
}

#[test]
fn every_cell_appears_exactly_once_in_spls() {
    let grid = slab_grid(7, 1, 0);
    let spds = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
    let mut seen = vec![0usize; grid.num_local_cells()];
    for &c in spds.spls() {
        seen[c] += 1;
    }
    assert!(seen.iter().all(|&n| n == 1));
}

#[test]
fn mirrored_orientations_agree_across_shared_faces() {
    let grid = slab_grid(4, 1, 0);
    let spds = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
    for ci in 0..4 {
        let cell = grid.cell(ci);
        for (fi, face) in cell.faces.iter().enumerate() {
            let Some((nbr, nfi)) = grid.associated_face(cell, face) else {
                continue;
            };
            let mine = spds.orientation(ci, fi);
            let theirs = spds.orientation(nbr, nfi);
            assert_eq!(mine, theirs.mirrored(), "faces {ci}/{fi} vs {nbr}/{nfi}");
        }
    }
}

#[test]
#[serial]
fn four_cell_two_partition_scenario() {
    let h = std::thread::spawn(|| {
        let grid = slab_grid(4, 2, 1);
        let comm = LocalComm::with_world(400, 1, 2);
        AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap()
    });
    let grid = slab_grid(4, 2, 0);
    let comm = LocalComm::with_world(400, 0, 2);
    let t0 = AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap();
    let t1 = h.join().unwrap();

    assert_eq!(t0.spds().spls(), &[0, 1]);
    assert!(t0.location_dependencies().is_empty());
    assert_eq!(t0.location_successors(), &[1]);
    assert_eq!(t0.depth(), 0);

    assert_eq!(t1.spds().spls(), &[0, 1]);
    assert_eq!(t1.location_dependencies(), &[0]);
    assert!(t1.location_successors().is_empty());
    assert_eq!(t1.depth(), 1);
}

#[test]
#[serial]
fn reversed_direction_swaps_partition_roles() {
    let h = std::thread::spawn(|| {
        let grid = slab_grid(4, 2, 1);
        let comm = LocalComm::with_world(401, 1, 2);
        AahSweepStructure::build(MINUS_X, &grid, false, &comm).unwrap()
    });
    let grid = slab_grid(4, 2, 0);
    let comm = LocalComm::with_world(401, 0, 2);
    let t0 = AahSweepStructure::build(MINUS_X, &grid, false, &comm).unwrap();
    let t1 = h.join().unwrap();

    assert_eq!(t0.location_dependencies(), &[1]);
    assert_eq!(t1.location_successors(), &[0]);
    assert_eq!(t0.spds().spls(), &[1, 0]);
    assert_eq!(t1.spds().spls(), &[1, 0]);
    assert_eq!(t0.depth(), 1);
    assert_eq!(t1.depth(), 0);
}

#[test]
fn disallowed_cycle_never_yields_a_structure() {
    let grid = two_cell_ring();
    match SweepPlaneStructure::build(PLUS_X, &grid, false) {
        Err(SweepError::CycleDetected { partition, cells }) => {
            assert_eq!(partition, 0);
            assert_eq!(cells, vec![1, 2]);
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn allowed_cycle_is_recorded_as_delayed() {
    let grid = two_cell_ring();
    let spds = SweepPlaneStructure::build(PLUS_X, &grid, true).unwrap();
    assert_eq!(spds.local_cyclic_edges().len(), 1);
    let e = spds.local_cyclic_edges()[0];
    assert!(spds.is_cyclic_edge(e.from, e.to));
    // The surviving graph is acyclic and the SPLS is complete.
    assert_eq!(spds.spls().len(), 2);
}

#[test]
fn grazing_faces_are_parallel_and_carry_no_edges() {
    let grid = slab_grid(3, 1, 0);
    let spds = SweepPlaneStructure::build([0.0, 0.0, 1.0], &grid, false).unwrap();
    for ci in 0..3 {
        for fi in 0..2 {
            assert_eq!(spds.orientation(ci, fi), FaceOrientation::Parallel);
        }
    }
    assert_eq!(spds.local_graph().num_edges(), 0);
}

#[test]
fn dot_export_names_every_cell() {
    let grid = slab_grid(3, 1, 0);
    let spds = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
    let mut buf = Vec::new();
    spds.write_dot(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("digraph sweep_dependencies"));
    assert!(text.contains("v0 -> v1"));
    assert!(text.contains("v1 -> v2"));
}

#[test]
fn single_partition_tdg_is_trivial() {
    let grid = slab_grid(4, 1, 0);
    let t = AahSweepStructure::build(PLUS_X, &grid, false, &NoComm).unwrap();
    assert_eq!(t.depth(), 0);
    assert_eq!(t.partition_levels(), &[0]);
    assert!(t.delayed_location_dependencies().is_empty());
    assert!(t.delayed_location_successors().is_empty());
}
