//! The sweep-kernel contract.
//!
//! The physics lives outside this crate. The engine invokes the kernel
//! once per (angle set, cell) in SPLS order and hands it a
//! [`CellSweepContext`] that routes upwind reads and downwind writes to
//! whichever storage the face actually uses — local slots, non-local
//! streams, delayed old/new pairs, or boundary objects — so the kernel
//! never sees the difference.

use super::boundary::BoundaryMap;
use crate::error::SweepError;
use crate::fluds::{AahFluds, CbcFaceInfo, CbcFluds, FaceSlot};
use crate::mesh::Cell;

/// Per-cell transport update, supplied by the solver.
pub trait SweepKernel {
    /// Solve one cell from its upwind data, writing downwind flux through
    /// the context.
    fn sweep_cell(&mut self, ctx: &mut CellSweepContext<'_>) -> Result<(), SweepError>;
}

enum PsiAccess<'a> {
    Aah {
        fluds: &'a mut AahFluds,
        slots: &'a [FaceSlot],
    },
    Cbc {
        fluds: &'a mut CbcFluds,
        info: &'a [CbcFaceInfo],
    },
}

/// One cell's flux access for one angle set.
pub struct CellSweepContext<'a> {
    cell: &'a Cell,
    angles: &'a [usize],
    num_groups: usize,
    boundaries: &'a mut BoundaryMap,
    zeros: &'a [f64],
    access: PsiAccess<'a>,
}

impl<'a> CellSweepContext<'a> {
    pub(crate) fn aah(
        cell: &'a Cell,
        angles: &'a [usize],
        num_groups: usize,
        fluds: &'a mut AahFluds,
        slots: &'a [FaceSlot],
        boundaries: &'a mut BoundaryMap,
        zeros: &'a [f64],
    ) -> Self {
        Self {
            cell,
            angles,
            num_groups,
            boundaries,
            zeros,
            access: PsiAccess::Aah { fluds, slots },
        }
    }

    pub(crate) fn cbc(
        cell: &'a Cell,
        angles: &'a [usize],
        num_groups: usize,
        fluds: &'a mut CbcFluds,
        info: &'a [CbcFaceInfo],
        boundaries: &'a mut BoundaryMap,
        zeros: &'a [f64],
    ) -> Self {
        Self {
            cell,
            angles,
            num_groups,
            boundaries,
            zeros,
            access: PsiAccess::Cbc { fluds, info },
        }
    }

    /// The cell being swept. Returned at the context's full lifetime so a
    /// kernel can hold it across mutable flux accesses.
    pub fn cell(&self) -> &'a Cell {
        self.cell
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Angle-set-local angle count; `angle` arguments below index into it.
    pub fn num_angles(&self) -> usize {
        self.angles.len()
    }

    /// Global angle index of set-local `angle`.
    pub fn global_angle(&self, angle: usize) -> usize {
        self.angles[angle]
    }

    /// Upwind group flux of face `face`, dof `dof`, set-local `angle`.
    /// Zeros for faces that carry no inflow (outgoing, grazing).
    pub fn upwind_psi(&self, face: usize, dof: usize, angle: usize) -> &[f64] {
        let global_angle = self.angles[angle];
        match &self.access {
            PsiAccess::Aah { fluds, slots } => match &slots[face] {
                FaceSlot::Boundary { boundary_id } => self
                    .boundaries
                    .get(boundary_id)
                    .map(|b| b.incoming_psi(self.cell.global_id, face, dof, global_angle))
                    .unwrap_or(self.zeros),
                FaceSlot::LocalIncoming {
                    category,
                    slot,
                    dof_map,
                } => fluds.local_upwind(*category, *slot, dof_map[dof], angle),
                FaceSlot::DelayedLocalIncoming {
                    category,
                    slot,
                    dof_map,
                } => fluds.delayed_local_upwind(*category, *slot, dof_map[dof], angle),
                FaceSlot::NonLocalIncoming {
                    predecessor,
                    record,
                    dof_map,
                } => {
                    let base = fluds.common().preloc_record_offset(*predecessor, *record);
                    fluds.nl_upwind(*predecessor, base + dof_map[dof], angle)
                }
                FaceSlot::DelayedNonLocalIncoming {
                    predecessor,
                    record,
                    dof_map,
                } => {
                    let base = fluds
                        .common()
                        .delayed_preloc_record_offset(*predecessor, *record);
                    fluds.delayed_nl_upwind(*predecessor, base + dof_map[dof], angle)
                }
                _ => self.zeros,
            },
            PsiAccess::Cbc { fluds, info } => match &info[face] {
                CbcFaceInfo::Boundary { boundary_id } => self
                    .boundaries
                    .get(boundary_id)
                    .map(|b| b.incoming_psi(self.cell.global_id, face, dof, global_angle))
                    .unwrap_or(self.zeros),
                CbcFaceInfo::LocalIncoming {
                    up_cell,
                    up_face,
                    dof_map,
                } => {
                    let ndofs = dof_map.len();
                    fluds.upwind(*up_cell, *up_face, ndofs, dof_map[dof], angle)
                }
                CbcFaceInfo::DelayedLocalIncoming {
                    up_cell,
                    up_face,
                    dof_map,
                } => {
                    let ndofs = dof_map.len();
                    fluds.delayed_upwind(*up_cell, *up_face, ndofs, dof_map[dof], angle)
                }
                CbcFaceInfo::NonLocalIncoming { .. } => {
                    fluds.nonlocal_upwind(self.cell.local_id, face, dof, angle)
                }
                _ => self.zeros,
            },
        }
    }

    /// Downwind group flux of face `face`, dof `dof`, set-local `angle`.
    /// `None` for faces that store no outflow (incoming, grazing, or a
    /// discarding boundary).
    pub fn downwind_psi_mut(
        &mut self,
        face: usize,
        dof: usize,
        angle: usize,
    ) -> Option<&mut [f64]> {
        let global_angle = self.angles[angle];
        let cell_gid = self.cell.global_id;
        let cell_local = self.cell.local_id;
        let ndofs = self.cell.faces[face].num_dofs();
        match &mut self.access {
            PsiAccess::Aah { fluds, slots } => match &slots[face] {
                FaceSlot::Boundary { boundary_id } => self
                    .boundaries
                    .get_mut(boundary_id)
                    .and_then(|b| b.outgoing_psi_mut(cell_gid, face, dof, global_angle)),
                FaceSlot::LocalOutgoing { category, slot } => {
                    Some(fluds.local_outgoing(*category, *slot, dof, angle))
                }
                FaceSlot::DelayedLocalOutgoing { category, slot } => {
                    Some(fluds.delayed_local_outgoing(*category, *slot, dof, angle))
                }
                FaceSlot::NonLocalOutgoing { successor, record } => {
                    let base = fluds.common().deploc_record_offset(*successor, *record);
                    Some(fluds.nl_outgoing(*successor, base + dof, angle))
                }
                FaceSlot::DelayedNonLocalOutgoing { successor, record } => {
                    let base = fluds
                        .common()
                        .delayed_deploc_record_offset(*successor, *record);
                    Some(fluds.delayed_nl_outgoing(*successor, base + dof, angle))
                }
                _ => None,
            },
            PsiAccess::Cbc { fluds, info } => match &info[face] {
                CbcFaceInfo::Boundary { boundary_id } => self
                    .boundaries
                    .get_mut(boundary_id)
                    .and_then(|b| b.outgoing_psi_mut(cell_gid, face, dof, global_angle)),
                CbcFaceInfo::LocalOutgoing { .. } | CbcFaceInfo::NonLocalOutgoing { .. } => {
                    Some(fluds.outgoing_mut(cell_local, face, ndofs, dof, angle))
                }
                CbcFaceInfo::DelayedLocalOutgoing => {
                    Some(fluds.delayed_outgoing_mut(cell_local, face, ndofs, dof, angle))
                }
                _ => None,
            },
        }
    }
}
