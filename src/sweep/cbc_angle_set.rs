//! Cell-by-cell angle set: a live task list instead of a global graph.
//!
//! Each sweep rebuilds, per cell, a dependency counter (local upwind
//! edges plus non-local incoming faces) and a successor list. Arrived
//! self-describing messages and completed local tasks decrement the
//! counters; any zero-dependency incomplete task executes immediately and
//! flushes its cross-partition outflow as messages the moment it
//! finishes.

use super::boundary::BoundaryMap;
use super::kernel::{CellSweepContext, SweepKernel};
use super::{AngleSet, AngleSetStatus, ExecutionPermission};
use crate::comm::wire::{decode_cbc_message, encode_cbc_message};
use crate::comm::{Communicator, Wait};
use crate::error::SweepError;
use crate::fluds::{CbcFaceInfo, CbcFluds, Fluds, build_cbc_face_info};
use crate::mesh::SweepGrid;
use crate::spds::SweepPlaneStructure;
use hashbrown::HashMap;
use std::sync::Arc;

/// Tag space for CBC flux messages, one tag per angle set.
const CBC_TAG_BASE: u16 = 0x6000;

/// Outcome of matching one arrived message against its candidate faces.
enum Absorb {
    Stored,
    Deferred,
}

/// One cell's unit of work in the live task list.
#[derive(Debug, Clone)]
struct CbcTask {
    num_dependencies: usize,
    successors: Vec<usize>,
    cell_local_id: usize,
    completed: bool,
}

pub struct CbcAngleSet<G: SweepGrid + 'static, C: Communicator> {
    id: usize,
    num_groups: usize,
    angles: Vec<usize>,
    grid: Arc<G>,
    spds: Arc<SweepPlaneStructure>,
    comm: Arc<C>,
    fluds: CbcFluds,
    face_info: Vec<Vec<CbcFaceInfo>>,
    /// (source rank, upwind cell gid) -> consuming (cell, face) candidates.
    incoming_lookup: HashMap<(usize, u64), Vec<(usize, usize)>>,
    tasks: Vec<CbcTask>,
    tasks_built: bool,
    executed: bool,
    /// Messages that arrived early (next iteration's data while this
    /// iteration's face still holds its flux); retried after reset.
    stash: Vec<(usize, crate::comm::wire::CbcMessage)>,
    send_handles: Vec<Option<C::SendHandle>>,
    touched_boundaries: Vec<u64>,
    zeros: Vec<f64>,
    tag: u16,
}

impl<G: SweepGrid + 'static, C: Communicator> CbcAngleSet<G, C> {
    pub fn new(
        id: usize,
        grid: Arc<G>,
        spds: Arc<SweepPlaneStructure>,
        comm: Arc<C>,
        angles: Vec<usize>,
        num_groups: usize,
    ) -> Result<Self, SweepError> {
        let face_info = build_cbc_face_info(spds.as_ref(), grid.as_ref())?;

        let mut incoming_lookup: HashMap<(usize, u64), Vec<(usize, usize)>> = HashMap::new();
        for (ci, infos) in face_info.iter().enumerate() {
            for (fi, info) in infos.iter().enumerate() {
                if let CbcFaceInfo::NonLocalIncoming { peer } = info {
                    let gid = grid.cells()[ci].faces[fi]
                        .neighbor
                        .as_ref()
                        .expect("non-local face has a neighbor")
                        .global_id;
                    incoming_lookup.entry((*peer, gid)).or_default().push((ci, fi));
                }
            }
        }

        let mut touched_boundaries: Vec<u64> = grid
            .cells()
            .iter()
            .flat_map(|c| c.faces.iter().filter_map(|f| f.boundary_id))
            .collect();
        touched_boundaries.sort_unstable();
        touched_boundaries.dedup();

        Ok(Self {
            id,
            num_groups,
            fluds: CbcFluds::new(num_groups, angles.len()),
            zeros: vec![0.0; num_groups],
            angles,
            grid,
            spds,
            comm,
            face_info,
            incoming_lookup,
            tasks: Vec::new(),
            tasks_built: false,
            executed: false,
            stash: Vec::new(),
            send_handles: Vec::new(),
            touched_boundaries,
            tag: CBC_TAG_BASE + id as u16,
        })
    }

    /// Rebuild the live task list from the local graph and the face map.
    fn build_tasks(&mut self) {
        let graph = self.spds.local_graph();
        self.tasks = (0..self.grid.num_local_cells())
            .map(|ci| {
                let nonlocal = self.face_info[ci]
                    .iter()
                    .filter(|i| matches!(i, CbcFaceInfo::NonLocalIncoming { .. }))
                    .count();
                CbcTask {
                    num_dependencies: graph.in_degree(ci) + nonlocal,
                    successors: graph.successors(ci).collect(),
                    cell_local_id: ci,
                    completed: false,
                }
            })
            .collect();
        self.tasks_built = true;
    }

    /// Pull pending messages for this angle set (retrying any stashed
    /// early arrivals first); returns how many were absorbed.
    fn drain_messages(&mut self) -> Result<usize, SweepError> {
        let mut drained = 0usize;

        let mut still_stashed = Vec::new();
        for (peer, msg) in std::mem::take(&mut self.stash) {
            match self.try_absorb(peer, &msg)? {
                Absorb::Stored => drained += 1,
                Absorb::Deferred => still_stashed.push((peer, msg)),
            }
        }
        self.stash = still_stashed;

        for pi in 0..self.spds.location_dependencies().len() {
            let peer = self.spds.location_dependencies()[pi];
            loop {
                let Some(len) = self.comm.iprobe(peer, self.tag) else {
                    break;
                };
                let mut buf = vec![0u8; len];
                let Some(data) = self.comm.irecv(peer, self.tag, &mut buf).wait() else {
                    log::error!("flux message from rank {peer} failed; will repoll");
                    break;
                };
                let msg = decode_cbc_message(&data).map_err(|detail| {
                    SweepError::MalformedRecord {
                        neighbor: peer,
                        detail,
                    }
                })?;
                match self.try_absorb(peer, &msg)? {
                    Absorb::Stored => drained += 1,
                    Absorb::Deferred => {
                        // Next iteration's flux arrived early; everything
                        // behind it in the FIFO is at least as new.
                        self.stash.push((peer, msg));
                        break;
                    }
                }
            }
        }
        Ok(drained)
    }

    fn try_absorb(
        &mut self,
        peer: usize,
        msg: &crate::comm::wire::CbcMessage,
    ) -> Result<Absorb, SweepError> {
        let candidates = self
            .incoming_lookup
            .get(&(peer, msg.cell_gid))
            .ok_or(SweepError::MalformedRecord {
                neighbor: peer,
                detail: format!("no face awaits flux of cell {}", msg.cell_gid),
            })?;
        let mut any_match = false;
        for &(ci, fi) in candidates {
            let face = &self.grid.cells()[ci].faces[fi];
            let dof_map: Option<Vec<usize>> = face
                .vertex_ids
                .iter()
                .map(|v| msg.vertex_ids.iter().position(|w| w == v))
                .collect();
            let Some(dof_map) = dof_map else { continue };
            any_match = true;
            if self.fluds.has_nonlocal(ci, fi) {
                continue;
            }
            self.fluds
                .store_nonlocal(ci, fi, dof_map, msg.payload.clone());
            self.tasks[ci].num_dependencies -= 1;
            return Ok(Absorb::Stored);
        }
        if any_match {
            Ok(Absorb::Deferred)
        } else {
            Err(SweepError::MissingVertexMapping {
                cell: msg.cell_gid,
                face: msg.face_id as usize,
                neighbor: peer,
            })
        }
    }

    fn execute_task(
        &mut self,
        ti: usize,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
    ) -> Result<(), SweepError> {
        let ci = self.tasks[ti].cell_local_id;
        let grid = Arc::clone(&self.grid);
        let cell = &grid.cells()[ci];
        let mut ctx = CellSweepContext::cbc(
            cell,
            &self.angles,
            self.num_groups,
            &mut self.fluds,
            &self.face_info[ci],
            boundaries,
            &self.zeros,
        );
        kernel.sweep_cell(&mut ctx)?;
        self.tasks[ti].completed = true;

        let successors = self.tasks[ti].successors.clone();
        for s in successors {
            self.tasks[s].num_dependencies -= 1;
        }

        // Flush cross-partition outflow immediately.
        let face_len = cell
            .faces
            .iter()
            .map(|f| f.num_dofs() * self.angles.len() * self.num_groups)
            .collect::<Vec<_>>();
        for (fi, info) in self.face_info[ci].iter().enumerate() {
            let CbcFaceInfo::NonLocalOutgoing { peer } = info else {
                continue;
            };
            let face = &cell.faces[fi];
            let payload: Vec<f64> = match self.fluds.face_payload(ci, fi) {
                Some(p) => p.to_vec(),
                None => vec![0.0; face_len[fi]],
            };
            let bytes = encode_cbc_message(
                cell.global_id,
                fi as u32,
                &face.vertex_ids,
                &payload,
            );
            let handle = self.comm.isend(*peer, self.tag, &bytes);
            self.send_handles.push(Some(handle));
        }
        Ok(())
    }

    fn flush_sends(&mut self) -> bool {
        for slot in self.send_handles.iter_mut() {
            if slot.as_ref().is_some_and(Wait::ready) {
                let _ = slot.take().map(Wait::wait);
            }
        }
        self.send_handles.retain(Option::is_some);
        self.send_handles.is_empty()
    }
}

impl<G: SweepGrid + 'static, C: Communicator> AngleSet for CbcAngleSet<G, C> {
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
        self.spds.direction()
    }

    fn depth(&self) -> u32 {
        0
    }

    fn advance(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
        permission: ExecutionPermission,
    ) -> Result<AngleSetStatus, SweepError> {
        if !self.tasks_built {
            self.fluds.allocate();
            self.build_tasks();
        }

        let boundaries_ready = self.touched_boundaries.iter().all(|id| {
            boundaries
                .get(id)
                .is_none_or(|b| b.angles_ready(&self.angles))
        });

        loop {
            let drained = self.drain_messages()?;
            let ready: Vec<usize> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.completed && t.num_dependencies == 0)
                .map(|(i, _)| i)
                .collect();
            if !boundaries_ready {
                return Ok(AngleSetStatus::Receiving);
            }
            if !ready.is_empty() && permission == ExecutionPermission::NoExecIfReady {
                return Ok(AngleSetStatus::ReadyToExecute);
            }
            let mut executed_any = false;
            for ti in ready {
                self.execute_task(ti, kernel, boundaries)?;
                executed_any = true;
            }
            if drained == 0 && !executed_any {
                break;
            }
        }

        let all_completed = self.tasks.iter().all(|t| t.completed);
        if all_completed && !self.executed {
            for id in &self.touched_boundaries {
                if let Some(b) = boundaries.get_mut(id) {
                    b.update_angles_ready(&self.angles);
                }
            }
            self.executed = true;
        }
        Ok(if all_completed && self.flush_sends() {
            AngleSetStatus::Finished
        } else {
            AngleSetStatus::Receiving
        })
    }

    fn flush_send_buffers(&mut self) -> bool {
        self.flush_sends()
    }

    fn receive_delayed_data(&mut self) -> Result<bool, SweepError> {
        // CBC keeps delayed data local; nothing crosses partitions.
        Ok(true)
    }

    fn reset_sweep(&mut self) {
        for handle in self.send_handles.drain(..).flatten() {
            let _ = handle.wait();
        }
        self.tasks_built = false;
        self.executed = false;
        self.fluds.swap_delayed_psi();
        self.fluds.reset_sweep_buffers();
    }

    fn max_message_count(&self) -> usize {
        1
    }

    fn set_max_message_count(&mut self, _count: usize) {}
}
