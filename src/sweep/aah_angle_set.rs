//! AAH angle set: the probe-driven advance state machine.
//!
//! Advancement never blocks. Every call re-probes the outstanding regular
//! chunks and every touched boundary's readiness; delayed chunks are
//! pulled opportunistically but never gate execution. Once all inputs are
//! present and permission is granted, the kernel runs over the SPLS and
//! the produced outflow is enqueued to every successor.

use super::boundary::BoundaryMap;
use super::kernel::{CellSweepContext, SweepKernel};
use super::{AahAsyncComm, AngleSet, AngleSetStatus, ExecutionPermission};
use crate::comm::Communicator;
use crate::error::SweepError;
use crate::fluds::{AahFluds, Fluds, FludsCommonData};
use crate::mesh::SweepGrid;
use crate::spds::AahSweepStructure;
use std::sync::Arc;

pub struct AahAngleSet<G: SweepGrid + 'static, C: Communicator> {
    id: usize,
    num_groups: usize,
    angles: Vec<usize>,
    grid: Arc<G>,
    structure: Arc<AahSweepStructure>,
    fluds: AahFluds,
    comm: AahAsyncComm<C>,
    executed: bool,
    touched_boundaries: Vec<u64>,
    zeros: Vec<f64>,
}

impl<G: SweepGrid + 'static, C: Communicator> AahAngleSet<G, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        grid: Arc<G>,
        structure: Arc<AahSweepStructure>,
        common: Arc<FludsCommonData>,
        comm: Arc<C>,
        angles: Vec<usize>,
        num_groups: usize,
        eager_limit: usize,
    ) -> Self {
        let fluds = AahFluds::new(common, num_groups, angles.len());
        let mut async_comm = AahAsyncComm::new(comm, id, eager_limit);
        async_comm.initialize(&fluds);

        let mut touched_boundaries: Vec<u64> = grid
            .cells()
            .iter()
            .flat_map(|c| c.faces.iter().filter_map(|f| f.boundary_id))
            .collect();
        touched_boundaries.sort_unstable();
        touched_boundaries.dedup();

        Self {
            id,
            num_groups,
            zeros: vec![0.0; num_groups],
            angles,
            grid,
            structure,
            fluds,
            comm: async_comm,
            executed: false,
            touched_boundaries,
        }
    }

    fn execute(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
    ) -> Result<(), SweepError> {
        self.fluds.allocate();
        let grid = Arc::clone(&self.grid);
        let structure = Arc::clone(&self.structure);
        let common = self.fluds.common_arc();
        for &ci in structure.spds().spls() {
            let cell = &grid.cells()[ci];
            let mut ctx = CellSweepContext::aah(
                cell,
                &self.angles,
                self.num_groups,
                &mut self.fluds,
                common.cell_slots(ci),
                boundaries,
                &self.zeros,
            );
            kernel.sweep_cell(&mut ctx)?;
        }
        for id in &self.touched_boundaries {
            if let Some(b) = boundaries.get_mut(id) {
                b.update_angles_ready(&self.angles);
            }
        }
        self.comm.enqueue_sends(&self.fluds);
        Ok(())
    }
}

impl<G: SweepGrid + 'static, C: Communicator> AngleSet for AahAngleSet<G, C> {
    fn id(&self) -> usize {
        self.id
    }

    fn angles(&self) -> &[usize] {
        &self.angles
    }

    fn num_groups(&self) -> usize {
        self.num_groups
    }

    fn direction(&self) -> [f64; 3] {
        self.structure.direction()
    }

    fn depth(&self) -> u32 {
        self.structure.depth()
    }

    fn advance(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
        permission: ExecutionPermission,
    ) -> Result<AngleSetStatus, SweepError> {
        // 1) Executed already: only the send drain is outstanding.
        if self.executed {
            return Ok(if self.comm.flush_sends() {
                AngleSetStatus::Finished
            } else {
                AngleSetStatus::Receiving
            });
        }

        // 2) Poll regular chunks and boundary readiness. Delayed data is
        //    pulled as a side effect but never gates.
        let data_ready = self.comm.probe_and_receive(&mut self.fluds)?;
        let _ = self.comm.receive_delayed(&mut self.fluds)?;
        let boundaries_ready = self.touched_boundaries.iter().all(|id| {
            boundaries
                .get(id)
                .is_none_or(|b| b.angles_ready(&self.angles))
        });
        if !data_ready || !boundaries_ready {
            return Ok(AngleSetStatus::Receiving);
        }

        // 3) Ready: execute if permitted.
        if permission == ExecutionPermission::NoExecIfReady {
            return Ok(AngleSetStatus::ReadyToExecute);
        }
        self.execute(kernel, boundaries)?;
        self.executed = true;
        Ok(if self.comm.flush_sends() {
            AngleSetStatus::Finished
        } else {
            AngleSetStatus::Receiving
        })
    }

    fn flush_send_buffers(&mut self) -> bool {
        self.comm.flush_sends()
    }

    fn receive_delayed_data(&mut self) -> Result<bool, SweepError> {
        self.comm.receive_delayed(&mut self.fluds)
    }

    fn reset_sweep(&mut self) {
        self.executed = false;
        self.comm.reset();
        self.fluds.swap_delayed_psi();
        self.fluds.reset_sweep_buffers();
    }

    fn max_message_count(&self) -> usize {
        self.comm.max_chunk_count()
    }

    fn set_max_message_count(&mut self, count: usize) {
        self.comm.set_max_num_messages(count);
    }
}
