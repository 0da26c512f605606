//! Local sweep-plane construction: face classification, the weighted cell
//! dependency graph, cycle removal, and the SPLS ordering.

use super::{CyclicEdge, FaceOrientation, SweepPlaneStructure, classify};
use crate::error::SweepError;
use crate::graph::DirectedGraph;
use crate::mesh::{SweepGrid, direction_dot_normal};

impl SweepPlaneStructure {
    /// Build the per-direction ordering for this partition's cells.
    ///
    /// Shared local faces are classified once by the lower-global-id owner
    /// and mirrored to the neighbor; both sides must agree where their own
    /// normals speak clearly, else [`SweepError::OrientationMismatch`].
    /// Faces shared with remote cells are classified independently from
    /// this side's normal. With `allow_cycles`, local dependency cycles
    /// are broken by feedback-edge removal and recorded as delayed edges;
    /// without it, any cycle is a fatal configuration error.
    pub fn build<G: SweepGrid>(
        direction: [f64; 3],
        grid: &G,
        allow_cycles: bool,
    ) -> Result<Self, SweepError> {
        let partition = grid.partition();
        let cells = grid.cells();

        // 1) Classify every face.
        let mut orientations: Vec<Vec<FaceOrientation>> = Vec::with_capacity(cells.len());
        for cell in cells {
            if cell.faces.is_empty() {
                return Err(SweepError::UnsupportedCell {
                    partition,
                    cell: cell.global_id,
                    what: "cell has no faces",
                });
            }
            let mut cell_orients = Vec::with_capacity(cell.faces.len());
            for face in &cell.faces {
                let own = classify(direction_dot_normal(direction, face.normal));
                let orient = match &face.neighbor {
                    Some(nbr) if nbr.local_id.is_some() && nbr.global_id < cell.global_id => {
                        // The neighbor owns the classification; mirror it.
                        let (nbr_local, nbr_face) =
                            grid.associated_face(cell, face).ok_or({
                                SweepError::UnsupportedCell {
                                    partition,
                                    cell: cell.global_id,
                                    what: "shared face has no mirror on local neighbor",
                                }
                            })?;
                        let owner_normal = grid.cell(nbr_local).faces[nbr_face].normal;
                        let mirrored =
                            classify(direction_dot_normal(direction, owner_normal)).mirrored();
                        if own != FaceOrientation::Parallel && own != mirrored {
                            return Err(SweepError::OrientationMismatch {
                                cell_a: nbr.global_id,
                                cell_b: cell.global_id,
                            });
                        }
                        mirrored
                    }
                    // Owner side of a local face, remote faces, boundaries:
                    // classified from this side's own normal.
                    _ => own,
                };
                cell_orients.push(orient);
            }
            orientations.push(cell_orients);
        }

        // 2) Weighted local dependency graph: one edge per locally-outgoing
        //    face toward a local neighbor.
        let mut graph = DirectedGraph::with_vertices(cells.len());
        for (ci, cell) in cells.iter().enumerate() {
            for (fi, face) in cell.faces.iter().enumerate() {
                if orientations[ci][fi] != FaceOrientation::Outgoing {
                    continue;
                }
                if let Some(nbr) = &face.neighbor {
                    if let Some(nbr_local) = nbr.local_id {
                        let mu = direction_dot_normal(direction, face.normal).abs();
                        graph.add_edge(ci, nbr_local, mu);
                    }
                }
            }
        }

        // 3) Cycles: break and record, or fail.
        let local_cyclic_edges: Vec<CyclicEdge> = if allow_cycles {
            let removed = graph.remove_feedback_edges();
            if !removed.is_empty() {
                log::debug!(
                    "partition {partition}: removed {} local cycle edge(s) for direction {direction:?}",
                    removed.len()
                );
            }
            removed
                .into_iter()
                .map(|e| CyclicEdge {
                    from: e.from,
                    to: e.to,
                })
                .collect()
        } else {
            if let Err(stuck) = graph.topological_sort() {
                return Err(SweepError::CycleDetected {
                    partition,
                    cells: stuck.iter().map(|&c| cells[c].global_id).collect(),
                });
            }
            Vec::new()
        };

        // 4) SPLS via topological sort of the (now acyclic) graph.
        let spls = graph.topological_sort().map_err(|stuck| SweepError::SortFailed {
            partition,
            ordered: cells.len() - stuck.len(),
            total: cells.len(),
        })?;
        let mut spls_position = vec![0usize; spls.len()];
        for (pos, &c) in spls.iter().enumerate() {
            spls_position[c] = pos;
        }

        // 5) Partition-level dependency/successor sets from non-local faces.
        let mut deps: Vec<usize> = Vec::new();
        let mut succs: Vec<usize> = Vec::new();
        for (ci, cell) in cells.iter().enumerate() {
            for (fi, face) in cell.faces.iter().enumerate() {
                let Some(nbr) = &face.neighbor else { continue };
                if nbr.partition == partition {
                    continue;
                }
                match orientations[ci][fi] {
                    FaceOrientation::Incoming => deps.push(nbr.partition),
                    FaceOrientation::Outgoing => succs.push(nbr.partition),
                    FaceOrientation::Parallel => {}
                }
            }
        }
        deps.sort_unstable();
        deps.dedup();
        succs.sort_unstable();
        succs.dedup();

        Ok(Self {
            direction,
            partition,
            spls,
            spls_position,
            orientations,
            local_graph: graph,
            local_cyclic_edges,
            location_dependencies: deps,
            location_successors: succs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::slab::{slab_grid, two_cell_ring};

    const PLUS_X: [f64; 3] = [1.0, 0.0, 0.0];
    const MINUS_X: [f64; 3] = [-1.0, 0.0, 0.0];

    #[test]
    fn slab_orders_with_the_flow() {
        let grid = slab_grid(4, 1, 0);
        let spds = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
        assert_eq!(spds.spls(), &[0, 1, 2, 3]);
        assert!(spds.location_dependencies().is_empty());
        assert!(spds.location_successors().is_empty());
    }

    #[test]
    fn slab_reversed_direction_reverses_order() {
        let grid = slab_grid(4, 1, 0);
        let spds = SweepPlaneStructure::build(MINUS_X, &grid, false).unwrap();
        assert_eq!(spds.spls(), &[3, 2, 1, 0]);
    }

    #[test]
    fn spls_is_topological_for_every_surviving_edge() {
        let grid = slab_grid(6, 1, 0);
        let spds = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap();
        for v in 0..6 {
            for w in spds.local_graph().successors(v) {
                assert!(spds.sweep_position(v) < spds.sweep_position(w));
            }
        }
    }

    #[test]
    fn partitioned_slab_sees_neighbor_partition() {
        let g0 = slab_grid(4, 2, 0);
        let g1 = slab_grid(4, 2, 1);
        let s0 = SweepPlaneStructure::build(PLUS_X, &g0, false).unwrap();
        let s1 = SweepPlaneStructure::build(PLUS_X, &g1, false).unwrap();

        assert_eq!(s0.spls(), &[0, 1]);
        assert!(s0.location_dependencies().is_empty());
        assert_eq!(s0.location_successors(), &[1]);

        assert_eq!(s1.spls(), &[0, 1]);
        assert_eq!(s1.location_dependencies(), &[0]);
        assert!(s1.location_successors().is_empty());
    }

    #[test]
    fn partitioned_slab_reversed_swaps_roles() {
        let g0 = slab_grid(4, 2, 0);
        let g1 = slab_grid(4, 2, 1);
        let s0 = SweepPlaneStructure::build(MINUS_X, &g0, false).unwrap();
        let s1 = SweepPlaneStructure::build(MINUS_X, &g1, false).unwrap();

        assert_eq!(s0.location_dependencies(), &[1]);
        assert!(s0.location_successors().is_empty());
        assert_eq!(s0.spls(), &[1, 0]);
        assert_eq!(s1.location_successors(), &[0]);
        assert_eq!(s1.spls(), &[1, 0]);
    }

    #[test]
    fn ring_cycle_is_fatal_without_allowance() {
        let grid = two_cell_ring();
        let err = SweepPlaneStructure::build(PLUS_X, &grid, false).unwrap_err();
        match err {
            SweepError::CycleDetected { partition, cells } => {
                assert_eq!(partition, 0);
                assert_eq!(cells, vec![1, 2]);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn ring_cycle_is_broken_when_allowed() {
        let grid = two_cell_ring();
        let spds = SweepPlaneStructure::build(PLUS_X, &grid, true).unwrap();
        assert_eq!(spds.local_cyclic_edges().len(), 1);
        assert_eq!(spds.spls().len(), 2);
        // The surviving edge respects the order.
        for v in 0..2 {
            for w in spds.local_graph().successors(v) {
                assert!(spds.sweep_position(v) < spds.sweep_position(w));
            }
        }
    }

    #[test]
    fn grazing_direction_is_parallel() {
        let grid = slab_grid(2, 1, 0);
        let spds = SweepPlaneStructure::build([0.0, 1.0, 0.0], &grid, false).unwrap();
        for c in 0..2 {
            for f in 0..2 {
                assert_eq!(spds.orientation(c, f), FaceOrientation::Parallel);
            }
        }
        assert_eq!(spds.local_graph().num_edges(), 0);
    }
}
