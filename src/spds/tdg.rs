//! Partition-level task dependency graph for the AAH sweep model.
//!
//! Every partition contributes its dependency list once; the merged graph
//! is cleaned of cross-partition cycles, sorted, and leveled. All ranks
//! run the identical deterministic computation on identically allgathered
//! input, so every partition holds the same schedule view without a
//! broadcast step or per-iteration negotiation.

use super::SweepPlaneStructure;
use crate::comm::Communicator;
use crate::comm::wire::cast_slice;
use crate::error::SweepError;
use crate::graph::DirectedGraph;
use crate::mesh::SweepGrid;

/// Sentinel padding entry in the fixed-width dependency exchange.
const NO_DEP: u32 = u32::MAX;

/// [`SweepPlaneStructure`] plus the global task dependency graph view:
/// regular/delayed partition dependency sets and the leveled schedule.
#[derive(Debug, Clone)]
pub struct AahSweepStructure {
    spds: SweepPlaneStructure,
    location_dependencies: Vec<usize>,
    location_successors: Vec<usize>,
    delayed_location_dependencies: Vec<usize>,
    delayed_location_successors: Vec<usize>,
    /// TDG depth of every partition (longest dependency path).
    partition_levels: Vec<u32>,
    /// Partitions grouped by depth, in depth order.
    schedule: Vec<Vec<usize>>,
}

impl AahSweepStructure {
    /// Build the local ordering, then negotiate the global task graph.
    pub fn build<G: SweepGrid, C: Communicator>(
        direction: [f64; 3],
        grid: &G,
        allow_cycles: bool,
        comm: &C,
    ) -> Result<Self, SweepError> {
        let spds = SweepPlaneStructure::build(direction, grid, allow_cycles)?;
        let me = grid.partition();
        let nparts = grid.num_partitions();

        // 1) Allgather every partition's dependency list (fixed-width,
        //    sentinel-padded, two rounds: counts then entries).
        let my_deps: Vec<u32> = spds
            .location_dependencies()
            .iter()
            .map(|&p| p as u32)
            .collect();
        let count = my_deps.len() as u32;
        let mut counts = vec![0u32; nparts];
        comm.allgather(
            cast_slice(std::slice::from_ref(&count)),
            cast_slice_mut_u32(&mut counts),
        );
        let max_count = counts.iter().copied().max().unwrap_or(0) as usize;

        let mut dep_lists: Vec<Vec<usize>> = vec![Vec::new(); nparts];
        if max_count > 0 {
            let mut padded = vec![NO_DEP; max_count];
            padded[..my_deps.len()].copy_from_slice(&my_deps);
            let mut gathered = vec![0u32; nparts * max_count];
            comm.allgather(cast_slice(padded.as_slice()), cast_slice_mut_u32(&mut gathered));
            for (p, chunk) in gathered.chunks_exact(max_count).enumerate() {
                dep_lists[p] = chunk
                    .iter()
                    .take_while(|&&d| d != NO_DEP)
                    .map(|&d| d as usize)
                    .collect();
            }
        }

        // 2) Merge into the partition graph: dep -> p for every listed
        //    dependency.
        let mut graph = DirectedGraph::with_vertices(nparts);
        for (p, deps) in dep_lists.iter().enumerate() {
            for &d in deps {
                graph.add_edge(d, p, 1.0);
            }
        }

        // 3) Cross-partition cycles: break and record, or fail.
        let removed = if allow_cycles {
            let removed = graph.remove_feedback_edges();
            if !removed.is_empty() {
                log::debug!(
                    "direction {direction:?}: removed {} cross-partition cycle edge(s)",
                    removed.len()
                );
            }
            removed
        } else {
            if graph.topological_sort().is_err() {
                return Err(SweepError::CyclicTaskGraph);
            }
            Vec::new()
        };

        let mut delayed_deps: Vec<usize> = removed
            .iter()
            .filter(|e| e.to == me)
            .map(|e| e.from)
            .collect();
        let mut delayed_succs: Vec<usize> = removed
            .iter()
            .filter(|e| e.from == me)
            .map(|e| e.to)
            .collect();
        delayed_deps.sort_unstable();
        delayed_deps.dedup();
        delayed_succs.sort_unstable();
        delayed_succs.dedup();

        let location_dependencies: Vec<usize> = spds
            .location_dependencies()
            .iter()
            .copied()
            .filter(|p| !delayed_deps.contains(p))
            .collect();
        let location_successors: Vec<usize> = spds
            .location_successors()
            .iter()
            .copied()
            .filter(|p| !delayed_succs.contains(p))
            .collect();

        // 4) Sort the cleaned graph and level it; the level of a partition
        //    is its scheduling depth.
        let order = graph
            .topological_sort()
            .map_err(|_| SweepError::CyclicTaskGraph)?;
        let partition_levels = graph.levels(&order);
        let max_level = partition_levels.iter().copied().max().unwrap_or(0);
        let mut schedule: Vec<Vec<usize>> = vec![Vec::new(); max_level as usize + 1];
        for (p, &lvl) in partition_levels.iter().enumerate() {
            schedule[lvl as usize].push(p);
        }
        log::debug!(
            "direction {direction:?}: partition {me} at depth {} of {}",
            partition_levels[me],
            max_level
        );

        Ok(Self {
            spds,
            location_dependencies,
            location_successors,
            delayed_location_dependencies: delayed_deps,
            delayed_location_successors: delayed_succs,
            partition_levels,
            schedule,
        })
    }

    /// The local per-direction structure.
    pub fn spds(&self) -> &SweepPlaneStructure {
        &self.spds
    }

    pub fn direction(&self) -> [f64; 3] {
        self.spds.direction()
    }

    pub fn partition(&self) -> usize {
        self.spds.partition()
    }

    /// Regular (non-delayed) predecessor partitions.
    pub fn location_dependencies(&self) -> &[usize] {
        &self.location_dependencies
    }

    /// Regular (non-delayed) successor partitions.
    pub fn location_successors(&self) -> &[usize] {
        &self.location_successors
    }

    pub fn delayed_location_dependencies(&self) -> &[usize] {
        &self.delayed_location_dependencies
    }

    pub fn delayed_location_successors(&self) -> &[usize] {
        &self.delayed_location_successors
    }

    /// This partition's depth in the task dependency graph.
    pub fn depth(&self) -> u32 {
        self.partition_levels[self.spds.partition()]
    }

    pub fn partition_levels(&self) -> &[u32] {
        &self.partition_levels
    }

    /// Partitions grouped by depth.
    pub fn schedule(&self) -> &[Vec<usize>] {
        &self.schedule
    }
}

fn cast_slice_mut_u32(v: &mut [u32]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, NoComm};
    use crate::mesh::slab::slab_grid;

    const PLUS_X: [f64; 3] = [1.0, 0.0, 0.0];
    const MINUS_X: [f64; 3] = [-1.0, 0.0, 0.0];

    #[test]
    fn single_partition_is_depth_zero() {
        let grid = slab_grid(4, 1, 0);
        let tdg = AahSweepStructure::build(PLUS_X, &grid, false, &NoComm).unwrap();
        assert_eq!(tdg.depth(), 0);
        assert_eq!(tdg.schedule(), &[vec![0]]);
        assert!(tdg.location_dependencies().is_empty());
    }

    #[test]
    fn two_partition_slab_levels() {
        let h = std::thread::spawn(|| {
            let grid = slab_grid(4, 2, 1);
            let comm = LocalComm::with_world(200, 1, 2);
            AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap()
        });
        let grid = slab_grid(4, 2, 0);
        let comm = LocalComm::with_world(200, 0, 2);
        let t0 = AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap();
        let t1 = h.join().unwrap();

        assert_eq!(t0.depth(), 0);
        assert_eq!(t1.depth(), 1);
        assert_eq!(t0.location_successors(), &[1]);
        assert_eq!(t1.location_dependencies(), &[0]);
        assert_eq!(t0.schedule(), t1.schedule());
        assert_eq!(t0.schedule(), &[vec![0], vec![1]]);
    }

    #[test]
    fn two_partition_slab_reversed_swaps_depths() {
        let h = std::thread::spawn(|| {
            let grid = slab_grid(4, 2, 1);
            let comm = LocalComm::with_world(201, 1, 2);
            AahSweepStructure::build(MINUS_X, &grid, false, &comm).unwrap()
        });
        let grid = slab_grid(4, 2, 0);
        let comm = LocalComm::with_world(201, 0, 2);
        let t0 = AahSweepStructure::build(MINUS_X, &grid, false, &comm).unwrap();
        let t1 = h.join().unwrap();

        assert_eq!(t0.depth(), 1);
        assert_eq!(t1.depth(), 0);
        assert_eq!(t0.location_dependencies(), &[1]);
        assert_eq!(t1.location_successors(), &[0]);
    }
}
