//! Deterministic scenario meshes.
//!
//! Slab meshes (1-D chains of cells along x) and a two-cell ring are the
//! canonical fixtures for sweep-ordering tests: every dependency pattern
//! the engine must handle — chains, partition cuts, genuine cycles —
//! shows up in one of them.

use super::{Cell, CellFace, FaceNeighbor, LocalMesh};

/// Left/right boundary ids of a slab.
pub const SLAB_LEFT_BOUNDARY: u64 = 0;
pub const SLAB_RIGHT_BOUNDARY: u64 = 1;

fn owner_of(global: usize, num_cells: usize, num_partitions: usize) -> usize {
    // Contiguous blocks; the first `num_cells % num_partitions` blocks get
    // one extra cell.
    let base = num_cells / num_partitions;
    let extra = num_cells % num_partitions;
    let mut start = 0usize;
    for p in 0..num_partitions {
        let len = base + usize::from(p < extra);
        if global < start + len {
            return p;
        }
        start += len;
    }
    num_partitions - 1
}

/// Partition `rank`'s piece of a 1-D slab of `num_cells` cells along x.
/// Cell `i` spans vertices `i` and `i + 1`; global ids are `i + 1`
/// (ids are nonzero). Face 0 is the left face (normal -x), face 1 the
/// right (normal +x).
pub fn slab_grid(num_cells: usize, num_partitions: usize, rank: usize) -> LocalMesh {
    assert!(num_cells >= 1 && num_partitions >= 1 && rank < num_partitions);

    let locals: Vec<usize> = (0..num_cells)
        .filter(|&i| owner_of(i, num_cells, num_partitions) == rank)
        .collect();
    let local_of = |global: usize| locals.iter().position(|&g| g == global);

    let mut cells = Vec::with_capacity(locals.len());
    for (local_id, &i) in locals.iter().enumerate() {
        let left_neighbor = (i > 0).then(|| {
            let p = owner_of(i - 1, num_cells, num_partitions);
            FaceNeighbor {
                partition: p,
                local_id: if p == rank { local_of(i - 1) } else { None },
                global_id: (i - 1) as u64 + 1,
            }
        });
        let right_neighbor = (i + 1 < num_cells).then(|| {
            let p = owner_of(i + 1, num_cells, num_partitions);
            FaceNeighbor {
                partition: p,
                local_id: if p == rank { local_of(i + 1) } else { None },
                global_id: (i + 1) as u64 + 1,
            }
        });
        let faces = vec![
            CellFace {
                normal: [-1.0, 0.0, 0.0],
                vertex_ids: vec![i as u64],
                boundary_id: left_neighbor.is_none().then_some(SLAB_LEFT_BOUNDARY),
                neighbor: left_neighbor,
            },
            CellFace {
                normal: [1.0, 0.0, 0.0],
                vertex_ids: vec![i as u64 + 1],
                boundary_id: right_neighbor.is_none().then_some(SLAB_RIGHT_BOUNDARY),
                neighbor: right_neighbor,
            },
        ];
        cells.push(Cell {
            local_id,
            global_id: i as u64 + 1,
            faces,
        });
    }

    LocalMesh {
        partition: rank,
        num_partitions,
        cells,
    }
}

/// Two cells forming a ring (a periodic 2-cell slab): the pair shares both
/// its faces, so any non-grazing direction produces a genuine 2-cell
/// dependency cycle.
pub fn two_cell_ring() -> LocalMesh {
    let nbr = |local_id: usize, global_id: u64| {
        Some(FaceNeighbor {
            partition: 0,
            local_id: Some(local_id),
            global_id,
        })
    };
    let cells = vec![
        Cell {
            local_id: 0,
            global_id: 1,
            faces: vec![
                CellFace {
                    normal: [-1.0, 0.0, 0.0],
                    vertex_ids: vec![0],
                    neighbor: nbr(1, 2),
                    boundary_id: None,
                },
                CellFace {
                    normal: [1.0, 0.0, 0.0],
                    vertex_ids: vec![1],
                    neighbor: nbr(1, 2),
                    boundary_id: None,
                },
            ],
        },
        Cell {
            local_id: 1,
            global_id: 2,
            faces: vec![
                CellFace {
                    normal: [-1.0, 0.0, 0.0],
                    vertex_ids: vec![1],
                    neighbor: nbr(0, 1),
                    boundary_id: None,
                },
                CellFace {
                    normal: [1.0, 0.0, 0.0],
                    vertex_ids: vec![0],
                    neighbor: nbr(0, 1),
                    boundary_id: None,
                },
            ],
        },
    ];
    LocalMesh {
        partition: 0,
        num_partitions: 1,
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SweepGrid;

    #[test]
    fn four_cells_two_partitions() {
        let g0 = slab_grid(4, 2, 0);
        let g1 = slab_grid(4, 2, 1);
        assert_eq!(g0.num_local_cells(), 2);
        assert_eq!(g1.num_local_cells(), 2);
        assert_eq!(g0.cell(0).global_id, 1);
        assert_eq!(g1.cell(0).global_id, 3);

        // Cut between global cells 1 and 2 (gids 2 and 3).
        let cut = &g0.cell(1).faces[1];
        let n = cut.neighbor.as_ref().unwrap();
        assert_eq!(n.partition, 1);
        assert_eq!(n.global_id, 3);
        assert_eq!(n.local_id, None);
    }

    #[test]
    fn uneven_split_spreads_remainder() {
        assert_eq!(owner_of(0, 5, 2), 0);
        assert_eq!(owner_of(2, 5, 2), 0);
        assert_eq!(owner_of(3, 5, 2), 1);
    }

    #[test]
    fn shared_faces_agree_on_vertices() {
        let g = slab_grid(3, 1, 0);
        let c0 = g.cell(0);
        let c1 = g.cell(1);
        assert_eq!(c0.faces[1].vertex_ids, c1.faces[0].vertex_ids);
    }

    #[test]
    fn ring_faces_pair_up() {
        let g = two_cell_ring();
        let c0 = g.cell(0);
        assert_eq!(
            g.associated_face(c0, &c0.faces[1]),
            Some((1, 0)),
            "cell 0 right face mirrors cell 1 left face"
        );
        assert_eq!(g.associated_face(c0, &c0.faces[0]), Some((1, 1)));
    }
}
