//! Runtime flux buffers for the AAH sweep model.
//!
//! One buffer per face category, sized `num_slots × dofs × groups ×
//! angles`, addressed as `angle·angle_stride + slot·slot_stride +
//! dof·num_groups`. Non-local flux lives in one flat buffer per peer,
//! addressed by the record dof offsets both ends computed identically in
//! the beta pass — the wire format *is* the buffer.
//!
//! Buffers are allocated on the owning angle set's first execution, so
//! peak memory follows schedule concurrency, not quadrature size. The
//! delayed old/new pairs are the only state that survives
//! [`Fluds::reset_sweep_buffers`].

use super::common_data::FludsCommonData;
use super::Fluds;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AahFluds {
    common: Arc<FludsCommonData>,
    num_groups: usize,
    num_angles: usize,
    allocated: bool,
    local_psi: Vec<Vec<f64>>,
    delayed_local_psi: Vec<Vec<f64>>,
    delayed_local_psi_old: Vec<Vec<f64>>,
    deploc_outgoing_psi: Vec<Vec<f64>>,
    preloc_incoming_psi: Vec<Vec<f64>>,
    delayed_deploc_outgoing_psi: Vec<Vec<f64>>,
    delayed_preloc_incoming_psi: Vec<Vec<f64>>,
    delayed_preloc_incoming_psi_old: Vec<Vec<f64>>,
}

impl AahFluds {
    pub fn new(common: Arc<FludsCommonData>, num_groups: usize, num_angles: usize) -> Self {
        Self {
            common,
            num_groups,
            num_angles,
            allocated: false,
            local_psi: Vec::new(),
            delayed_local_psi: Vec::new(),
            delayed_local_psi_old: Vec::new(),
            deploc_outgoing_psi: Vec::new(),
            preloc_incoming_psi: Vec::new(),
            delayed_deploc_outgoing_psi: Vec::new(),
            delayed_preloc_incoming_psi: Vec::new(),
            delayed_preloc_incoming_psi_old: Vec::new(),
        }
    }

    pub fn common(&self) -> &FludsCommonData {
        &self.common
    }

    /// Shared handle to the addressing data, for contexts that must
    /// borrow it independently of the buffers.
    pub fn common_arc(&self) -> Arc<FludsCommonData> {
        Arc::clone(&self.common)
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_angles(&self) -> usize {
        self.num_angles
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    fn slot_stride(&self, category: usize) -> usize {
        self.common.histogram().category_dofs(category) * self.num_groups
    }

    fn category_len(&self, num_slots: usize, category: usize) -> usize {
        num_slots * self.slot_stride(category) * self.num_angles
    }

    #[inline]
    fn local_index(&self, category: usize, num_slots: usize, slot: usize, dof: usize, angle: usize) -> usize {
        let slot_stride = self.slot_stride(category);
        let angle_stride = num_slots * slot_stride;
        angle * angle_stride + slot * slot_stride + dof * self.num_groups
    }

    #[inline]
    fn peer_index(&self, total_dofs: usize, dof: usize, angle: usize) -> usize {
        (angle * total_dofs + dof) * self.num_groups
    }

    /// Unknowns (doubles) exchanged with regular predecessor `i`.
    pub fn preloc_num_unknowns(&self, i: usize) -> usize {
        self.common.preloc_total_dofs(i) * self.num_groups * self.num_angles
    }

    /// Unknowns (doubles) exchanged with regular successor `i`.
    pub fn deploc_num_unknowns(&self, i: usize) -> usize {
        self.common.deploc_total_dofs(i) * self.num_groups * self.num_angles
    }

    pub fn delayed_preloc_num_unknowns(&self, i: usize) -> usize {
        self.common.delayed_preloc_total_dofs(i) * self.num_groups * self.num_angles
    }

    pub fn delayed_deploc_num_unknowns(&self, i: usize) -> usize {
        self.common.delayed_deploc_total_dofs(i) * self.num_groups * self.num_angles
    }

    // --- kernel-facing addressing -------------------------------------

    /// Group slice written by a locally-outgoing face.
    pub fn local_outgoing(
        &mut self,
        category: usize,
        slot: usize,
        dof: usize,
        angle: usize,
    ) -> &mut [f64] {
        let n = self.common.num_slots(category);
        let i = self.local_index(category, n, slot, dof, angle);
        &mut self.local_psi[category][i..i + self.num_groups]
    }

    /// Group slice read by a locally-incoming face.
    pub fn local_upwind(&self, category: usize, slot: usize, dof: usize, angle: usize) -> &[f64] {
        let n = self.common.num_slots(category);
        let i = self.local_index(category, n, slot, dof, angle);
        &self.local_psi[category][i..i + self.num_groups]
    }

    /// Delayed producer side: writes the *new* buffer.
    pub fn delayed_local_outgoing(
        &mut self,
        category: usize,
        slot: usize,
        dof: usize,
        angle: usize,
    ) -> &mut [f64] {
        let n = self.common.num_delayed_slots(category);
        let i = self.local_index(category, n, slot, dof, angle);
        &mut self.delayed_local_psi[category][i..i + self.num_groups]
    }

    /// Delayed consumer side: reads the *old* buffer.
    pub fn delayed_local_upwind(
        &self,
        category: usize,
        slot: usize,
        dof: usize,
        angle: usize,
    ) -> &[f64] {
        let n = self.common.num_delayed_slots(category);
        let i = self.local_index(category, n, slot, dof, angle);
        &self.delayed_local_psi_old[category][i..i + self.num_groups]
    }

    /// Group slice for `dof` within regular successor `i`'s stream.
    pub fn nl_outgoing(&mut self, successor: usize, dof: usize, angle: usize) -> &mut [f64] {
        let total = self.common.deploc_total_dofs(successor);
        let i = self.peer_index(total, dof, angle);
        &mut self.deploc_outgoing_psi[successor][i..i + self.num_groups]
    }

    /// Group slice for `dof` within regular predecessor `i`'s stream.
    pub fn nl_upwind(&self, predecessor: usize, dof: usize, angle: usize) -> &[f64] {
        let total = self.common.preloc_total_dofs(predecessor);
        let i = self.peer_index(total, dof, angle);
        &self.preloc_incoming_psi[predecessor][i..i + self.num_groups]
    }

    pub fn delayed_nl_outgoing(&mut self, successor: usize, dof: usize, angle: usize) -> &mut [f64] {
        let total = self.common.delayed_deploc_total_dofs(successor);
        let i = self.peer_index(total, dof, angle);
        &mut self.delayed_deploc_outgoing_psi[successor][i..i + self.num_groups]
    }

    /// Delayed upwind data is always the previous iteration's (old) copy.
    pub fn delayed_nl_upwind(&self, predecessor: usize, dof: usize, angle: usize) -> &[f64] {
        let total = self.common.delayed_preloc_total_dofs(predecessor);
        let i = self.peer_index(total, dof, angle);
        &self.delayed_preloc_incoming_psi_old[predecessor][i..i + self.num_groups]
    }

    // --- communicator-facing buffers ----------------------------------

    /// Raw receive target for regular predecessor `i`.
    pub fn preloc_buffer_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.preloc_incoming_psi[i]
    }

    /// Raw send source for regular successor `i`.
    pub fn deploc_buffer(&self, i: usize) -> &[f64] {
        &self.deploc_outgoing_psi[i]
    }

    /// Delayed receives land in the *new* buffer; the sweep reads old.
    pub fn delayed_preloc_new_buffer_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.delayed_preloc_incoming_psi[i]
    }

    pub fn delayed_deploc_buffer(&self, i: usize) -> &[f64] {
        &self.delayed_deploc_outgoing_psi[i]
    }

    /// Promote every delayed *new* buffer to *old* for the next iteration.
    /// Called once per iteration by the scheduler, after all sweeps done.
    pub fn swap_delayed_psi(&mut self) {
        std::mem::swap(&mut self.delayed_local_psi, &mut self.delayed_local_psi_old);
        std::mem::swap(
            &mut self.delayed_preloc_incoming_psi,
            &mut self.delayed_preloc_incoming_psi_old,
        );
    }
}

impl Fluds for AahFluds {
    fn allocate(&mut self) {
        if self.allocated {
            return;
        }
        let ncats = self.common.histogram().num_categories();
        self.local_psi = (0..ncats)
            .map(|c| vec![0.0; self.category_len(self.common.num_slots(c), c)])
            .collect();
        self.delayed_local_psi = (0..ncats)
            .map(|c| vec![0.0; self.category_len(self.common.num_delayed_slots(c), c)])
            .collect();
        self.delayed_local_psi_old = self.delayed_local_psi.clone();
        self.deploc_outgoing_psi = (0..self.common.successors().len())
            .map(|i| vec![0.0; self.deploc_num_unknowns(i)])
            .collect();
        self.preloc_incoming_psi = (0..self.common.predecessors().len())
            .map(|i| vec![0.0; self.preloc_num_unknowns(i)])
            .collect();
        self.delayed_deploc_outgoing_psi = (0..self.common.delayed_successors().len())
            .map(|i| vec![0.0; self.delayed_deploc_num_unknowns(i)])
            .collect();
        self.delayed_preloc_incoming_psi = (0..self.common.delayed_predecessors().len())
            .map(|i| vec![0.0; self.delayed_preloc_num_unknowns(i)])
            .collect();
        self.delayed_preloc_incoming_psi_old = self.delayed_preloc_incoming_psi.clone();
        self.allocated = true;
    }

    fn reset_sweep_buffers(&mut self) {
        for buf in self
            .local_psi
            .iter_mut()
            .chain(self.deploc_outgoing_psi.iter_mut())
            .chain(self.preloc_incoming_psi.iter_mut())
        {
            buf.fill(0.0);
        }
        // Delayed old/new pairs persist deliberately.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::fluds::FaceSizeHistogram;
    use crate::mesh::slab::slab_grid;
    use crate::spds::AahSweepStructure;

    fn fluds_for_slab(num_groups: usize, num_angles: usize) -> AahFluds {
        let grid = slab_grid(4, 1, 0);
        let structure =
            AahSweepStructure::build([1.0, 0.0, 0.0], &grid, false, &NoComm).unwrap();
        let histogram = FaceSizeHistogram::from_grid(&grid);
        let common =
            FludsCommonData::build(&structure, &histogram, &grid, &NoComm).unwrap();
        AahFluds::new(Arc::new(common), num_groups, num_angles)
    }

    #[test]
    fn allocation_is_deferred_and_idempotent() {
        let mut fluds = fluds_for_slab(2, 3);
        assert!(!fluds.is_allocated());
        fluds.allocate();
        assert!(fluds.is_allocated());
        let len = fluds.local_psi[0].len();
        fluds.allocate();
        assert_eq!(fluds.local_psi[0].len(), len);
        // 1 slot x 1 dof x 2 groups x 3 angles
        assert_eq!(len, 6);
    }

    #[test]
    fn addressing_is_injective_while_live() {
        let grid = slab_grid(8, 1, 0);
        let structure =
            AahSweepStructure::build([1.0, 0.0, 0.0], &grid, false, &NoComm).unwrap();
        let histogram = FaceSizeHistogram::from_grid(&grid);
        let common =
            FludsCommonData::build(&structure, &histogram, &grid, &NoComm).unwrap();
        let fluds = AahFluds::new(Arc::new(common), 2, 2);

        let n = fluds.common().num_slots(0);
        let dofs = fluds.common().histogram().category_dofs(0);
        let mut seen = std::collections::HashSet::new();
        for angle in 0..2 {
            for slot in 0..n {
                for dof in 0..dofs {
                    let i = fluds.local_index(0, n, slot, dof, angle);
                    for g in 0..2 {
                        assert!(seen.insert(i + g), "offset {} reused", i + g);
                    }
                }
            }
        }
    }

    #[test]
    fn reset_preserves_only_delayed_buffers() {
        let mut fluds = fluds_for_slab(1, 1);
        fluds.allocate();
        fluds.local_outgoing(0, 0, 0, 0)[0] = 4.5;
        fluds.reset_sweep_buffers();
        assert_eq!(fluds.local_upwind(0, 0, 0, 0)[0], 0.0);
        // Idempotent: a second reset changes nothing.
        fluds.reset_sweep_buffers();
        assert_eq!(fluds.local_upwind(0, 0, 0, 0)[0], 0.0);
    }

    #[test]
    fn delayed_swap_promotes_new_to_old() {
        let grid = crate::mesh::slab::two_cell_ring();
        let structure =
            AahSweepStructure::build([1.0, 0.0, 0.0], &grid, true, &NoComm).unwrap();
        let histogram = FaceSizeHistogram::from_grid(&grid);
        let common =
            FludsCommonData::build(&structure, &histogram, &grid, &NoComm).unwrap();
        let mut fluds = AahFluds::new(Arc::new(common), 1, 1);
        fluds.allocate();

        fluds.delayed_local_outgoing(0, 0, 0, 0)[0] = 7.0;
        assert_eq!(fluds.delayed_local_upwind(0, 0, 0, 0)[0], 0.0);
        fluds.swap_delayed_psi();
        assert_eq!(fluds.delayed_local_upwind(0, 0, 0, 0)[0], 7.0);
        // Reset does not touch the promoted value.
        fluds.reset_sweep_buffers();
        assert_eq!(fluds.delayed_local_upwind(0, 0, 0, 0)[0], 7.0);
    }
}
