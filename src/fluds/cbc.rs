//! Keyed flux storage for the cell-by-cell sweep model.
//!
//! CBC trades the AAH model's precomputed flat addressing for
//! self-describing per-face storage: produced faces are keyed by
//! (cell, face), arrived non-local faces are resolved against their
//! consuming face when the message is drained and stored with the dof
//! map already applied-to-be. Group slices use the same
//! `(angle·dofs + dof)·groups` layout as the wire payload.

use super::Fluds;
use crate::error::SweepError;
use crate::mesh::SweepGrid;
use crate::spds::{FaceOrientation, SweepPlaneStructure};
use hashbrown::HashMap;

/// Per-face routing for the CBC model, computed once per direction-family
/// from the local sweep structure and the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbcFaceInfo {
    Boundary { boundary_id: u64 },
    Parallel,
    /// Locally outgoing; `downwind` is the consuming local cell.
    LocalOutgoing { downwind: usize },
    LocalIncoming {
        up_cell: usize,
        up_face: usize,
        /// `dof_map[i]` = producer-side dof for this face's dof `i`.
        dof_map: Vec<usize>,
    },
    /// Outgoing on a broken cycle edge; lands in the delayed new buffer.
    DelayedLocalOutgoing,
    DelayedLocalIncoming {
        up_cell: usize,
        up_face: usize,
        dof_map: Vec<usize>,
    },
    /// Outgoing across a partition cut; flushed as a message on task
    /// completion.
    NonLocalOutgoing { peer: usize },
    /// Incoming across a partition cut; satisfied by a drained message.
    NonLocalIncoming { peer: usize },
}

/// Classify every face of every local cell for the CBC model.
pub fn build_cbc_face_info<G: SweepGrid>(
    spds: &SweepPlaneStructure,
    grid: &G,
) -> Result<Vec<Vec<CbcFaceInfo>>, SweepError> {
    let partition = grid.partition();
    let mut out = Vec::with_capacity(grid.num_local_cells());
    for (ci, cell) in grid.cells().iter().enumerate() {
        let mut infos = Vec::with_capacity(cell.faces.len());
        for (fi, face) in cell.faces.iter().enumerate() {
            let orientation = spds.orientation(ci, fi);
            let info = match (&face.neighbor, orientation) {
                (_, FaceOrientation::Parallel) => CbcFaceInfo::Parallel,
                (None, _) => CbcFaceInfo::Boundary {
                    boundary_id: face.boundary_id.unwrap_or(0),
                },
                (Some(nbr), FaceOrientation::Outgoing) if nbr.partition == partition => {
                    let downwind = nbr.local_id.ok_or(SweepError::MissingSlot {
                        cell: cell.global_id,
                        face: fi,
                    })?;
                    if spds.is_cyclic_edge(ci, downwind) {
                        CbcFaceInfo::DelayedLocalOutgoing
                    } else {
                        CbcFaceInfo::LocalOutgoing { downwind }
                    }
                }
                (Some(nbr), FaceOrientation::Incoming) if nbr.partition == partition => {
                    let (up_cell, up_face) =
                        grid.associated_face(cell, face).ok_or(SweepError::MissingSlot {
                            cell: cell.global_id,
                            face: fi,
                        })?;
                    let up_verts = &grid.cells()[up_cell].faces[up_face].vertex_ids;
                    let dof_map = face
                        .vertex_ids
                        .iter()
                        .map(|v| up_verts.iter().position(|w| w == v))
                        .collect::<Option<Vec<usize>>>()
                        .ok_or(SweepError::MissingVertexMapping {
                            cell: cell.global_id,
                            face: fi,
                            neighbor: partition,
                        })?;
                    if spds.is_cyclic_edge(up_cell, ci) {
                        CbcFaceInfo::DelayedLocalIncoming {
                            up_cell,
                            up_face,
                            dof_map,
                        }
                    } else {
                        CbcFaceInfo::LocalIncoming {
                            up_cell,
                            up_face,
                            dof_map,
                        }
                    }
                }
                (Some(nbr), FaceOrientation::Outgoing) => CbcFaceInfo::NonLocalOutgoing {
                    peer: nbr.partition,
                },
                (Some(nbr), FaceOrientation::Incoming) => CbcFaceInfo::NonLocalIncoming {
                    peer: nbr.partition,
                },
            };
            infos.push(info);
        }
        out.push(infos);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct CbcFluds {
    num_groups: usize,
    num_angles: usize,
    /// Flux produced on local outgoing faces, keyed by (cell, face).
    local_psi: HashMap<(usize, usize), Vec<f64>>,
    /// Arrived non-local flux, keyed by the consuming (cell, face):
    /// (dof map into the payload, payload).
    nonlocal_psi: HashMap<(usize, usize), (Vec<usize>, Vec<f64>)>,
    /// Delayed producer buffers (new), keyed by producing (cell, face).
    delayed_psi: HashMap<(usize, usize), Vec<f64>>,
    /// Previous iteration's delayed buffers (old).
    delayed_psi_old: HashMap<(usize, usize), Vec<f64>>,
    /// Zero group returned for not-yet-seen delayed reads.
    zeros: Vec<f64>,
}

impl CbcFluds {
    pub fn new(num_groups: usize, num_angles: usize) -> Self {
        Self {
            num_groups,
            num_angles,
            local_psi: HashMap::new(),
            nonlocal_psi: HashMap::new(),
            delayed_psi: HashMap::new(),
            delayed_psi_old: HashMap::new(),
            zeros: vec![0.0; num_groups],
        }
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_angles(&self) -> usize {
        self.num_angles
    }

    #[inline]
    fn index(&self, ndofs: usize, dof: usize, angle: usize) -> usize {
        (angle * ndofs + dof) * self.num_groups
    }

    fn face_len(&self, ndofs: usize) -> usize {
        ndofs * self.num_angles * self.num_groups
    }

    /// Writable group slice of a local outgoing face (created on first use).
    pub fn outgoing_mut(
        &mut self,
        cell: usize,
        face: usize,
        ndofs: usize,
        dof: usize,
        angle: usize,
    ) -> &mut [f64] {
        let len = self.face_len(ndofs);
        let i = self.index(ndofs, dof, angle);
        let buf = self
            .local_psi
            .entry((cell, face))
            .or_insert_with(|| vec![0.0; len]);
        &mut buf[i..i + self.num_groups]
    }

    /// Group slice of an upwind local face; zeros if never produced.
    pub fn upwind(&self, cell: usize, face: usize, ndofs: usize, dof: usize, angle: usize) -> &[f64] {
        match self.local_psi.get(&(cell, face)) {
            Some(buf) => {
                let i = self.index(ndofs, dof, angle);
                &buf[i..i + self.num_groups]
            }
            None => &self.zeros,
        }
    }

    /// Full payload of a produced face, for message assembly.
    pub fn face_payload(&self, cell: usize, face: usize) -> Option<&[f64]> {
        self.local_psi.get(&(cell, face)).map(|v| v.as_slice())
    }

    /// Attach an arrived non-local payload to its consuming face.
    pub fn store_nonlocal(
        &mut self,
        cell: usize,
        face: usize,
        dof_map: Vec<usize>,
        payload: Vec<f64>,
    ) {
        self.nonlocal_psi.insert((cell, face), (dof_map, payload));
    }

    pub fn has_nonlocal(&self, cell: usize, face: usize) -> bool {
        self.nonlocal_psi.contains_key(&(cell, face))
    }

    /// Group slice of an arrived non-local face, dof-mapped to this side.
    pub fn nonlocal_upwind(&self, cell: usize, face: usize, dof: usize, angle: usize) -> &[f64] {
        match self.nonlocal_psi.get(&(cell, face)) {
            Some((dof_map, payload)) => {
                let i = self.index(dof_map.len(), dof_map[dof], angle);
                &payload[i..i + self.num_groups]
            }
            None => &self.zeros,
        }
    }

    /// Writable delayed (cyclic) producer slice; lands in the new buffer.
    pub fn delayed_outgoing_mut(
        &mut self,
        cell: usize,
        face: usize,
        ndofs: usize,
        dof: usize,
        angle: usize,
    ) -> &mut [f64] {
        let len = self.face_len(ndofs);
        let i = self.index(ndofs, dof, angle);
        let buf = self
            .delayed_psi
            .entry((cell, face))
            .or_insert_with(|| vec![0.0; len]);
        &mut buf[i..i + self.num_groups]
    }

    /// Delayed consumer slice from the previous iteration; zeros on the
    /// first iteration.
    pub fn delayed_upwind(&self, cell: usize, face: usize, ndofs: usize, dof: usize, angle: usize) -> &[f64] {
        match self.delayed_psi_old.get(&(cell, face)) {
            Some(buf) => {
                let i = self.index(ndofs, dof, angle);
                &buf[i..i + self.num_groups]
            }
            None => &self.zeros,
        }
    }

    /// Promote new delayed buffers to old for the next iteration.
    pub fn swap_delayed_psi(&mut self) {
        std::mem::swap(&mut self.delayed_psi, &mut self.delayed_psi_old);
        self.delayed_psi.clear();
    }
}

impl Fluds for CbcFluds {
    fn allocate(&mut self) {
        // Storage grows on demand; nothing to preallocate.
    }

    fn reset_sweep_buffers(&mut self) {
        self.local_psi.clear();
        self.nonlocal_psi.clear();
        // Delayed old/new pairs persist deliberately.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upwind_reads_what_outgoing_wrote() {
        let mut fluds = CbcFluds::new(2, 1);
        fluds.outgoing_mut(0, 1, 1, 0, 0).copy_from_slice(&[3.0, 4.0]);
        assert_eq!(fluds.upwind(0, 1, 1, 0, 0), &[3.0, 4.0]);
        assert_eq!(fluds.upwind(0, 0, 1, 0, 0), &[0.0, 0.0]);
    }

    #[test]
    fn nonlocal_is_dof_mapped() {
        let mut fluds = CbcFluds::new(1, 1);
        // Two dofs, payload in sender order [a, b]; my dof 0 maps to
        // sender dof 1.
        fluds.store_nonlocal(2, 0, vec![1, 0], vec![10.0, 20.0]);
        assert_eq!(fluds.nonlocal_upwind(2, 0, 0, 0), &[20.0]);
        assert_eq!(fluds.nonlocal_upwind(2, 0, 1, 0), &[10.0]);
    }

    #[test]
    fn reset_keeps_delayed_pair() {
        let mut fluds = CbcFluds::new(1, 1);
        fluds.outgoing_mut(0, 0, 1, 0, 0)[0] = 1.0;
        fluds.delayed_outgoing_mut(1, 1, 1, 0, 0)[0] = 5.0;
        fluds.swap_delayed_psi();
        fluds.reset_sweep_buffers();
        assert_eq!(fluds.upwind(0, 0, 1, 0, 0), &[0.0]);
        assert_eq!(fluds.delayed_upwind(1, 1, 1, 0, 0), &[5.0]);
        // Idempotent.
        fluds.reset_sweep_buffers();
        assert_eq!(fluds.delayed_upwind(1, 1, 1, 0, 0), &[5.0]);
    }
}
