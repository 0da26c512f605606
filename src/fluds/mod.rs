//! Flux data structures: fixed buffer addressing for every face a sweep
//! touches.
//!
//! Faces are bucketed into categories by node count so each category's
//! buffer is a contiguous slab with one stride — low padding, O(1)
//! addressing. The addressing itself ([`common_data::FludsCommonData`]) is
//! computed once per direction-family; the runtime buffers
//! ([`aah::AahFluds`], [`cbc::CbcFluds`]) scale it by the angle/group
//! counts of whichever angle set is scheduled, and are allocated only
//! when that angle set first executes.

pub mod aah;
pub mod cbc;
pub mod common_data;

pub use aah::AahFluds;
pub use cbc::{CbcFaceInfo, CbcFluds, build_cbc_face_info};
pub use common_data::{FaceSlot, FludsCommonData};

use crate::comm::Communicator;
use crate::comm::wire::cast_slice;
use crate::mesh::SweepGrid;
use itertools::Itertools;

/// Face-size buckets, fixed once from a face-size histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSizeHistogram {
    /// Sorted, distinct face dof counts; index = category id.
    sizes: Vec<usize>,
}

impl FaceSizeHistogram {
    /// Histogram of this partition's faces.
    pub fn from_grid<G: SweepGrid>(grid: &G) -> Self {
        let sizes: Vec<usize> = grid
            .cells()
            .iter()
            .flat_map(|c| c.faces.iter().map(|f| f.num_dofs()))
            .sorted_unstable()
            .dedup()
            .collect();
        Self { sizes }
    }

    /// Histogram of every partition's faces, identical on all ranks.
    pub fn global<G: SweepGrid, C: Communicator>(grid: &G, comm: &C) -> Self {
        let local = Self::from_grid(grid);
        let nparts = comm.size();
        if nparts <= 1 {
            return local;
        }
        // Fixed-width exchange: counts, then zero-padded size lists.
        let count = local.sizes.len() as u32;
        let mut counts = vec![0u32; nparts];
        comm.allgather(
            cast_slice(std::slice::from_ref(&count)),
            bytemuck::cast_slice_mut(counts.as_mut_slice()),
        );
        let max_count = counts.iter().copied().max().unwrap_or(0) as usize;
        if max_count == 0 {
            return local;
        }
        let mut padded = vec![0u32; max_count];
        for (dst, &s) in padded.iter_mut().zip(local.sizes.iter()) {
            *dst = s as u32;
        }
        let mut gathered = vec![0u32; nparts * max_count];
        comm.allgather(
            cast_slice(padded.as_slice()),
            bytemuck::cast_slice_mut(gathered.as_mut_slice()),
        );
        let mut sizes: Vec<usize> = gathered
            .iter()
            .filter(|&&s| s != 0)
            .map(|&s| s as usize)
            .collect();
        sizes.sort_unstable();
        sizes.dedup();
        Self { sizes }
    }

    pub fn num_categories(&self) -> usize {
        self.sizes.len()
    }

    /// Category of a face with `num_dofs` nodes.
    pub fn category_of(&self, num_dofs: usize) -> Option<usize> {
        self.sizes.binary_search(&num_dofs).ok()
    }

    /// Dof count of faces in category `cat`.
    pub fn category_dofs(&self, cat: usize) -> usize {
        self.sizes[cat]
    }
}

/// Lifecycle every flux data structure offers, independent of the
/// scheduling strategy that owns it.
pub trait Fluds {
    /// Materialize the runtime buffers. Idempotent; deferred until the
    /// owning angle set first executes.
    fn allocate(&mut self);

    /// Clear sweep state for the next iteration. Idempotent; only the
    /// delayed old/new pair survives (swapped, not cleared).
    fn reset_sweep_buffers(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::slab::slab_grid;

    #[test]
    fn slab_has_one_category() {
        let grid = slab_grid(4, 1, 0);
        let h = FaceSizeHistogram::from_grid(&grid);
        assert_eq!(h.num_categories(), 1);
        assert_eq!(h.category_dofs(0), 1);
        assert_eq!(h.category_of(1), Some(0));
        assert_eq!(h.category_of(3), None);
    }

    #[test]
    fn global_on_one_rank_is_local() {
        let grid = slab_grid(4, 1, 0);
        assert_eq!(
            FaceSizeHistogram::global(&grid, &NoComm),
            FaceSizeHistogram::from_grid(&grid)
        );
    }
}
