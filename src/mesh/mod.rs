//! The mesh view the sweep engine consumes.
//!
//! The finite-element mesh itself lives outside this crate; the engine only
//! needs, per cell, an ordered face list, each face's neighbor identity
//! (local id, global id, partition) and vertex ids, and an orientation test
//! against a direction vector. [`SweepGrid`] is that contract, and
//! [`LocalMesh`] is the plain in-memory carrier solvers hand over.

pub mod slab;

use serde::{Deserialize, Serialize};

/// Identity of the cell on the other side of a face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceNeighbor {
    /// Partition owning the neighbor cell.
    pub partition: usize,
    /// Local id on this partition, when the neighbor is local.
    pub local_id: Option<usize>,
    /// Global cell id, valid on every partition.
    pub global_id: u64,
}

/// One face of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellFace {
    /// Outward unit normal.
    pub normal: [f64; 3],
    /// Global vertex ids in the face's dof order.
    pub vertex_ids: Vec<u64>,
    /// `None` on domain-boundary faces.
    pub neighbor: Option<FaceNeighbor>,
    /// Boundary id on domain-boundary faces.
    pub boundary_id: Option<u64>,
}

impl CellFace {
    /// Face shared with a cell on this partition.
    pub fn is_local(&self, partition: usize) -> bool {
        self.neighbor
            .as_ref()
            .is_some_and(|n| n.partition == partition)
    }

    /// Face shared with a cell on another partition.
    pub fn is_nonlocal(&self, partition: usize) -> bool {
        self.neighbor
            .as_ref()
            .is_some_and(|n| n.partition != partition)
    }

    pub fn is_boundary(&self) -> bool {
        self.neighbor.is_none()
    }

    /// Number of face dofs (one per vertex).
    pub fn num_dofs(&self) -> usize {
        self.vertex_ids.len()
    }
}

/// A mesh cell: ordered face list plus local/global identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub local_id: usize,
    pub global_id: u64,
    pub faces: Vec<CellFace>,
}

/// Mesh contract consumed by the sweep engine.
pub trait SweepGrid: Send + Sync {
    /// This partition's id (one rank per partition).
    fn partition(&self) -> usize;
    fn num_partitions(&self) -> usize;
    /// Local cells, indexed by local id.
    fn cells(&self) -> &[Cell];

    fn num_local_cells(&self) -> usize {
        self.cells().len()
    }

    fn cell(&self, local_id: usize) -> &Cell {
        &self.cells()[local_id]
    }

    /// The neighbor cell's face mirroring `face` of `cell`, matched by
    /// vertex-id set (never by coordinates). `None` for boundary or
    /// non-local faces, or if the meshes disagree about the interface.
    fn associated_face(&self, cell: &Cell, face: &CellFace) -> Option<(usize, usize)> {
        let nbr = face.neighbor.as_ref()?;
        let nbr_local = nbr.local_id?;
        let mut mine: Vec<u64> = face.vertex_ids.clone();
        mine.sort_unstable();
        let nbr_cell = self.cell(nbr_local);
        for (fi, nf) in nbr_cell.faces.iter().enumerate() {
            let points_back = nf
                .neighbor
                .as_ref()
                .is_some_and(|n| n.global_id == cell.global_id);
            if !points_back {
                continue;
            }
            let mut theirs: Vec<u64> = nf.vertex_ids.clone();
            theirs.sort_unstable();
            if theirs == mine {
                return Some((nbr_local, fi));
            }
        }
        None
    }
}

/// Plain in-memory grid: the simplest `SweepGrid` carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMesh {
    pub partition: usize,
    pub num_partitions: usize,
    pub cells: Vec<Cell>,
}

impl SweepGrid for LocalMesh {
    fn partition(&self) -> usize {
        self.partition
    }
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }
    fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// ω·n for the orientation test.
#[inline]
pub fn direction_dot_normal(omega: [f64; 3], normal: [f64; 3]) -> f64 {
    omega[0] * normal[0] + omega[1] * normal[1] + omega[2] * normal[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associated_face_matches_by_vertex_ids() {
        let grid = slab::slab_grid(2, 1, 0);
        let c0 = grid.cell(0);
        let right = &c0.faces[1];
        let (nbr, fi) = grid.associated_face(c0, right).unwrap();
        assert_eq!(nbr, 1);
        assert_eq!(fi, 0); // cell 1's left face
    }

    #[test]
    fn boundary_face_has_no_associate() {
        let grid = slab::slab_grid(2, 1, 0);
        let c0 = grid.cell(0);
        assert!(grid.associated_face(c0, &c0.faces[0]).is_none());
        assert!(c0.faces[0].is_boundary());
    }

    #[test]
    fn dot_is_plain_inner_product() {
        let d = direction_dot_normal([1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        assert_eq!(d, -1.0);
    }
}
