//! Fixed buffer addressing for one direction-family, built in two passes.
//!
//! **Alpha (slot dynamics)**: walking the SPLS, every locally-outgoing
//! face claims a free slot in its category's pool; a slot is recycled as
//! soon as its consuming incoming face has been processed, so pool size is
//! bounded by faces in flight, not total face count. Cross-partition
//! outgoing faces append a compact record to the owning successor's list.
//! Cyclic (delayed) faces use a separate pool that is never recycled.
//!
//! **Beta (vertex reconciliation)**: the per-successor record lists are
//! exchanged point-to-point — delayed pairs first, so the regular
//! TDG-ordered exchange cannot deadlock against them. From the received
//! records each partition derives, for every non-local incoming face, a
//! deterministic per-dof mapping (vertex-id match, never coordinates) and
//! the upwind slot index carried in the payload.

use super::FaceSizeHistogram;
use crate::comm::wire::{FaceRecord, decode_face_records, encode_face_records};
use crate::comm::{Communicator, Wait};
use crate::error::SweepError;
use crate::mesh::{CellFace, SweepGrid};
use crate::spds::{AahSweepStructure, FaceOrientation};
use hashbrown::HashMap;

/// Beta-pass exchange tags.
const BETA_DELAYED_TAG: u16 = 0xB0;
const BETA_REGULAR_TAG: u16 = 0xB1;

/// Where one face's flux lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceSlot {
    /// Domain-boundary face; flux routed through the boundary object.
    Boundary { boundary_id: u64 },
    /// Grazing face; carries no flow.
    Parallel,
    /// Locally-outgoing face writing into a recycled category slot.
    LocalOutgoing { category: usize, slot: usize },
    /// Locally-incoming face reading its upwind producer's slot.
    LocalIncoming {
        category: usize,
        slot: usize,
        /// `dof_map[i]` = producer-side dof for this face's dof `i`.
        dof_map: Vec<usize>,
    },
    /// Outgoing face on a broken local cycle edge (non-recycled pool).
    DelayedLocalOutgoing { category: usize, slot: usize },
    /// Incoming face on a broken local cycle edge; reads the old buffer.
    DelayedLocalIncoming {
        category: usize,
        slot: usize,
        dof_map: Vec<usize>,
    },
    /// Outgoing face crossing to a regular successor partition.
    NonLocalOutgoing { successor: usize, record: usize },
    /// Incoming face from a regular predecessor partition.
    NonLocalIncoming {
        predecessor: usize,
        record: usize,
        dof_map: Vec<usize>,
    },
    /// Outgoing face to a delayed (cyclic) successor partition.
    DelayedNonLocalOutgoing { successor: usize, record: usize },
    /// Incoming face from a delayed predecessor; reads the old buffer.
    DelayedNonLocalIncoming {
        predecessor: usize,
        record: usize,
        dof_map: Vec<usize>,
    },
}

/// Per-direction-family addressing, immutable once built and shared by
/// every group-set scheduled on this direction-family.
#[derive(Debug, Clone)]
pub struct FludsCommonData {
    face_slots: Vec<Vec<FaceSlot>>,
    num_slots: Vec<usize>,
    num_delayed_slots: Vec<usize>,
    successors: Vec<usize>,
    predecessors: Vec<usize>,
    delayed_successors: Vec<usize>,
    delayed_predecessors: Vec<usize>,
    deploc_records: Vec<Vec<FaceRecord>>,
    preloc_records: Vec<Vec<FaceRecord>>,
    delayed_deploc_records: Vec<Vec<FaceRecord>>,
    delayed_preloc_records: Vec<Vec<FaceRecord>>,
    deploc_dof_offsets: Vec<Vec<usize>>,
    preloc_dof_offsets: Vec<Vec<usize>>,
    delayed_deploc_dof_offsets: Vec<Vec<usize>>,
    delayed_preloc_dof_offsets: Vec<Vec<usize>>,
    histogram: FaceSizeHistogram,
}

impl FludsCommonData {
    /// Run both passes for one direction-family.
    pub fn build<G: SweepGrid, C: Communicator>(
        structure: &AahSweepStructure,
        histogram: &FaceSizeHistogram,
        grid: &G,
        comm: &C,
    ) -> Result<Self, SweepError> {
        let mut builder = Builder::new(structure, histogram, grid);
        builder.alpha_pass()?;
        builder.beta_pass(comm)?;
        builder.finish()
    }

    pub fn face_slot(&self, cell: usize, face: usize) -> &FaceSlot {
        &self.face_slots[cell][face]
    }

    /// All face slots of one local cell.
    pub fn cell_slots(&self, cell: usize) -> &[FaceSlot] {
        &self.face_slots[cell]
    }

    pub fn histogram(&self) -> &FaceSizeHistogram {
        &self.histogram
    }

    /// Regular local pool size for a category.
    pub fn num_slots(&self, category: usize) -> usize {
        self.num_slots[category]
    }

    pub fn num_delayed_slots(&self, category: usize) -> usize {
        self.num_delayed_slots[category]
    }

    pub fn successors(&self) -> &[usize] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[usize] {
        &self.predecessors
    }

    pub fn delayed_successors(&self) -> &[usize] {
        &self.delayed_successors
    }

    pub fn delayed_predecessors(&self) -> &[usize] {
        &self.delayed_predecessors
    }

    /// Total face dofs sent to regular successor `i`.
    pub fn deploc_total_dofs(&self, i: usize) -> usize {
        *self.deploc_dof_offsets[i].last().unwrap_or(&0)
    }

    /// Total face dofs received from regular predecessor `i`.
    pub fn preloc_total_dofs(&self, i: usize) -> usize {
        *self.preloc_dof_offsets[i].last().unwrap_or(&0)
    }

    pub fn delayed_deploc_total_dofs(&self, i: usize) -> usize {
        *self.delayed_deploc_dof_offsets[i].last().unwrap_or(&0)
    }

    pub fn delayed_preloc_total_dofs(&self, i: usize) -> usize {
        *self.delayed_preloc_dof_offsets[i].last().unwrap_or(&0)
    }

    /// Dof offset of record `r` inside successor `i`'s outgoing stream.
    pub fn deploc_record_offset(&self, i: usize, r: usize) -> usize {
        self.deploc_dof_offsets[i][r]
    }

    pub fn preloc_record_offset(&self, i: usize, r: usize) -> usize {
        self.preloc_dof_offsets[i][r]
    }

    pub fn delayed_deploc_record_offset(&self, i: usize, r: usize) -> usize {
        self.delayed_deploc_dof_offsets[i][r]
    }

    pub fn delayed_preloc_record_offset(&self, i: usize, r: usize) -> usize {
        self.delayed_preloc_dof_offsets[i][r]
    }
}

/// Slot registry for one category during the alpha pass. `None` = free.
struct SlotPool {
    slots: Vec<Option<(usize, usize)>>,
    high_water: usize,
}

impl SlotPool {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            high_water: 0,
        }
    }

    fn claim(&mut self, owner: (usize, usize)) -> usize {
        for (i, s) in self.slots.iter_mut().enumerate() {
            if s.is_none() {
                *s = Some(owner);
                return i;
            }
        }
        self.slots.push(Some(owner));
        self.high_water = self.high_water.max(self.slots.len());
        self.slots.len() - 1
    }

    fn find(&self, owner: (usize, usize)) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(owner))
    }

    fn free(&mut self, slot: usize) {
        self.slots[slot] = None;
    }
}

struct Builder<'a, G: SweepGrid> {
    structure: &'a AahSweepStructure,
    histogram: FaceSizeHistogram,
    grid: &'a G,
    face_slots: Vec<Vec<Option<FaceSlot>>>,
    pools: Vec<SlotPool>,
    delayed_next: Vec<usize>,
    delayed_claims: HashMap<(usize, usize), (usize, usize)>,
    deploc_records: Vec<Vec<FaceRecord>>,
    delayed_deploc_records: Vec<Vec<FaceRecord>>,
    /// Non-local incoming faces awaiting the beta pass:
    /// (cell, face, peer index, delayed?).
    pending_incoming: Vec<(usize, usize, usize, bool)>,
    preloc_records: Vec<Vec<FaceRecord>>,
    delayed_preloc_records: Vec<Vec<FaceRecord>>,
}

impl<'a, G: SweepGrid> Builder<'a, G> {
    fn new(
        structure: &'a AahSweepStructure,
        histogram: &FaceSizeHistogram,
        grid: &'a G,
    ) -> Self {
        let ncells = grid.num_local_cells();
        Self {
            structure,
            histogram: histogram.clone(),
            grid,
            face_slots: grid
                .cells()
                .iter()
                .map(|c| vec![None; c.faces.len()])
                .collect(),
            pools: (0..histogram.num_categories()).map(|_| SlotPool::new()).collect(),
            delayed_next: vec![0; histogram.num_categories()],
            delayed_claims: HashMap::with_capacity(ncells / 8 + 1),
            deploc_records: vec![Vec::new(); structure.location_successors().len()],
            delayed_deploc_records: vec![
                Vec::new();
                structure.delayed_location_successors().len()
            ],
            pending_incoming: Vec::new(),
            preloc_records: vec![Vec::new(); structure.location_dependencies().len()],
            delayed_preloc_records: vec![
                Vec::new();
                structure.delayed_location_dependencies().len()
            ],
        }
    }

    fn category(&self, cell_gid: u64, face: &CellFace) -> Result<usize, SweepError> {
        self.histogram.category_of(face.num_dofs()).ok_or({
            SweepError::UnsupportedCell {
                partition: self.grid.partition(),
                cell: cell_gid,
                what: "face size missing from the global histogram",
            }
        })
    }

    /// Claim delayed slots up front: delayed consumers run before their
    /// producers in the SPLS, so the slot must exist before either side
    /// is visited.
    fn preclaim_delayed(&mut self) -> Result<(), SweepError> {
        let cells = self.grid.cells();
        for edge in self.structure.spds().local_cyclic_edges() {
            let cell = &cells[edge.from];
            for (fi, face) in cell.faces.iter().enumerate() {
                let toward = face
                    .neighbor
                    .as_ref()
                    .is_some_and(|n| n.local_id == Some(edge.to));
                if !toward
                    || self.structure.spds().orientation(edge.from, fi)
                        != FaceOrientation::Outgoing
                {
                    continue;
                }
                let cat = self.category(cell.global_id, face)?;
                let slot = self.delayed_next[cat];
                self.delayed_next[cat] += 1;
                self.delayed_claims.insert((edge.from, fi), (cat, slot));
            }
        }
        Ok(())
    }

    fn alpha_pass(&mut self) -> Result<(), SweepError> {
        self.preclaim_delayed()?;
        let spds = self.structure.spds();
        let partition = self.grid.partition();
        let succ_index: HashMap<usize, usize> = self
            .structure
            .location_successors()
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i))
            .collect();
        let dep_index: HashMap<usize, usize> = self
            .structure
            .location_dependencies()
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i))
            .collect();
        let delayed_succ_index: HashMap<usize, usize> = self
            .structure
            .delayed_location_successors()
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i))
            .collect();
        let delayed_dep_index: HashMap<usize, usize> = self
            .structure
            .delayed_location_dependencies()
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i))
            .collect();

        for &ci in spds.spls() {
            let cell = &self.grid.cells()[ci];

            // Incoming faces first: consuming frees the upwind slot for
            // reuse by this very cell's outgoing faces.
            for (fi, face) in cell.faces.iter().enumerate() {
                if spds.orientation(ci, fi) != FaceOrientation::Incoming {
                    continue;
                }
                match &face.neighbor {
                    None => {
                        self.face_slots[ci][fi] = Some(FaceSlot::Boundary {
                            boundary_id: face.boundary_id.unwrap_or(0),
                        });
                    }
                    Some(nbr) if nbr.partition == partition => {
                        let upwind = nbr.local_id.ok_or(SweepError::MissingSlot {
                            cell: cell.global_id,
                            face: fi,
                        })?;
                        let (up_cell, up_face) = self
                            .grid
                            .associated_face(cell, face)
                            .ok_or(SweepError::MissingSlot {
                                cell: cell.global_id,
                                face: fi,
                            })?;
                        debug_assert_eq!(up_cell, upwind);
                        let up_verts =
                            &self.grid.cells()[up_cell].faces[up_face].vertex_ids;
                        let dof_map = vertex_positions(&face.vertex_ids, up_verts)
                            .ok_or(SweepError::MissingVertexMapping {
                                cell: cell.global_id,
                                face: fi,
                                neighbor: partition,
                            })?;
                        if spds.is_cyclic_edge(up_cell, ci) {
                            let &(cat, slot) = self
                                .delayed_claims
                                .get(&(up_cell, up_face))
                                .ok_or(SweepError::MissingSlot {
                                    cell: cell.global_id,
                                    face: fi,
                                })?;
                            self.face_slots[ci][fi] =
                                Some(FaceSlot::DelayedLocalIncoming { category: cat, slot, dof_map });
                        } else {
                            let cat = self.category(cell.global_id, face)?;
                            let slot = self.pools[cat]
                                .find((up_cell, up_face))
                                .ok_or(SweepError::MissingSlot {
                                    cell: cell.global_id,
                                    face: fi,
                                })?;
                            self.pools[cat].free(slot);
                            self.face_slots[ci][fi] =
                                Some(FaceSlot::LocalIncoming { category: cat, slot, dof_map });
                        }
                    }
                    Some(nbr) => {
                        // Non-local: resolved in the beta pass.
                        if let Some(&pi) = delayed_dep_index.get(&nbr.partition) {
                            self.pending_incoming.push((ci, fi, pi, true));
                        } else if let Some(&pi) = dep_index.get(&nbr.partition) {
                            self.pending_incoming.push((ci, fi, pi, false));
                        } else {
                            return Err(SweepError::MissingSlot {
                                cell: cell.global_id,
                                face: fi,
                            });
                        }
                    }
                }
            }

            // Outgoing faces claim slots or append records.
            for (fi, face) in cell.faces.iter().enumerate() {
                match spds.orientation(ci, fi) {
                    FaceOrientation::Outgoing => {}
                    FaceOrientation::Parallel => {
                        if self.face_slots[ci][fi].is_none() {
                            self.face_slots[ci][fi] = Some(FaceSlot::Parallel);
                        }
                        continue;
                    }
                    FaceOrientation::Incoming => continue,
                }
                match &face.neighbor {
                    None => {
                        self.face_slots[ci][fi] = Some(FaceSlot::Boundary {
                            boundary_id: face.boundary_id.unwrap_or(0),
                        });
                    }
                    Some(nbr) if nbr.partition == partition => {
                        let downwind = nbr.local_id.ok_or(SweepError::MissingSlot {
                            cell: cell.global_id,
                            face: fi,
                        })?;
                        if spds.is_cyclic_edge(ci, downwind) {
                            let &(cat, slot) =
                                self.delayed_claims.get(&(ci, fi)).ok_or(
                                    SweepError::MissingSlot {
                                        cell: cell.global_id,
                                        face: fi,
                                    },
                                )?;
                            self.face_slots[ci][fi] =
                                Some(FaceSlot::DelayedLocalOutgoing { category: cat, slot });
                        } else {
                            let cat = self.category(cell.global_id, face)?;
                            let slot = self.pools[cat].claim((ci, fi));
                            self.face_slots[ci][fi] =
                                Some(FaceSlot::LocalOutgoing { category: cat, slot });
                        }
                    }
                    Some(nbr) => {
                        let record = FaceRecord {
                            cell_gid: cell.global_id,
                            face_id: fi as u32,
                            neighbor_gid: nbr.global_id,
                            slot: 0, // fixed up below to the list position
                            vertex_ids: face.vertex_ids.clone(),
                        };
                        if let Some(&si) = delayed_succ_index.get(&nbr.partition) {
                            let pos = self.delayed_deploc_records[si].len();
                            let mut record = record;
                            record.slot = pos as u32;
                            self.delayed_deploc_records[si].push(record);
                            self.face_slots[ci][fi] = Some(
                                FaceSlot::DelayedNonLocalOutgoing { successor: si, record: pos },
                            );
                        } else if let Some(&si) = succ_index.get(&nbr.partition) {
                            let pos = self.deploc_records[si].len();
                            let mut record = record;
                            record.slot = pos as u32;
                            self.deploc_records[si].push(record);
                            self.face_slots[ci][fi] =
                                Some(FaceSlot::NonLocalOutgoing { successor: si, record: pos });
                        } else {
                            return Err(SweepError::MissingSlot {
                                cell: cell.global_id,
                                face: fi,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Exchange record lists and resolve the pending incoming faces.
    /// Delayed pairs go first so they can never deadlock against the
    /// TDG-ordered regular exchange.
    fn beta_pass<C: Communicator>(&mut self, comm: &C) -> Result<(), SweepError> {
        let delayed_in = exchange_records(
            comm,
            self.structure.delayed_location_successors(),
            self.structure.delayed_location_dependencies(),
            &self.delayed_deploc_records,
            BETA_DELAYED_TAG,
        )?;
        let regular_in = exchange_records(
            comm,
            self.structure.location_successors(),
            self.structure.location_dependencies(),
            &self.deploc_records,
            BETA_REGULAR_TAG,
        )?;
        self.delayed_preloc_records = delayed_in;
        self.preloc_records = regular_in;

        // Per-peer expected counts must match what arrived.
        for (list, peers, expected) in [
            (
                &self.preloc_records,
                self.structure.location_dependencies(),
                false,
            ),
            (
                &self.delayed_preloc_records,
                self.structure.delayed_location_dependencies(),
                true,
            ),
        ] {
            for (pi, records) in list.iter().enumerate() {
                let want = self
                    .pending_incoming
                    .iter()
                    .filter(|&&(_, _, i, d)| i == pi && d == expected)
                    .count();
                if records.len() != want {
                    return Err(SweepError::RecordCountMismatch {
                        neighbor: peers[pi],
                        expected: want,
                        got: records.len(),
                    });
                }
            }
        }

        let pending = std::mem::take(&mut self.pending_incoming);
        for (ci, fi, pi, delayed) in pending {
            let cell = &self.grid.cells()[ci];
            let face = &cell.faces[fi];
            let nbr = face.neighbor.as_ref().expect("pending face has a neighbor");
            let (records, peer) = if delayed {
                (
                    &self.delayed_preloc_records[pi],
                    self.structure.delayed_location_dependencies()[pi],
                )
            } else {
                (
                    &self.preloc_records[pi],
                    self.structure.location_dependencies()[pi],
                )
            };
            let found = records.iter().enumerate().find_map(|(ri, r)| {
                if r.neighbor_gid != cell.global_id || r.cell_gid != nbr.global_id {
                    return None;
                }
                vertex_positions(&face.vertex_ids, &r.vertex_ids).map(|m| (ri, m))
            });
            let (record, dof_map) = found.ok_or(SweepError::MissingVertexMapping {
                cell: cell.global_id,
                face: fi,
                neighbor: peer,
            })?;
            self.face_slots[ci][fi] = Some(if delayed {
                FaceSlot::DelayedNonLocalIncoming {
                    predecessor: pi,
                    record,
                    dof_map,
                }
            } else {
                FaceSlot::NonLocalIncoming {
                    predecessor: pi,
                    record,
                    dof_map,
                }
            });
        }
        Ok(())
    }

    fn finish(self) -> Result<FludsCommonData, SweepError> {
        let partition = self.grid.partition();
        let mut face_slots = Vec::with_capacity(self.face_slots.len());
        for (ci, cell_slots) in self.face_slots.into_iter().enumerate() {
            let mut out = Vec::with_capacity(cell_slots.len());
            for (fi, s) in cell_slots.into_iter().enumerate() {
                out.push(s.ok_or(SweepError::MissingSlot {
                    cell: self.grid.cells()[ci].global_id,
                    face: fi,
                })?);
            }
            face_slots.push(out);
        }
        log::debug!(
            "partition {partition}: {} slot pool(s), {} successor record list(s)",
            self.pools.len(),
            self.deploc_records.len()
        );
        Ok(FludsCommonData {
            face_slots,
            num_slots: self.pools.iter().map(|p| p.high_water).collect(),
            num_delayed_slots: self.delayed_next,
            successors: self.structure.location_successors().to_vec(),
            predecessors: self.structure.location_dependencies().to_vec(),
            delayed_successors: self.structure.delayed_location_successors().to_vec(),
            delayed_predecessors: self.structure.delayed_location_dependencies().to_vec(),
            deploc_dof_offsets: dof_offsets(&self.deploc_records),
            preloc_dof_offsets: dof_offsets(&self.preloc_records),
            delayed_deploc_dof_offsets: dof_offsets(&self.delayed_deploc_records),
            delayed_preloc_dof_offsets: dof_offsets(&self.delayed_preloc_records),
            deploc_records: self.deploc_records,
            preloc_records: self.preloc_records,
            delayed_deploc_records: self.delayed_deploc_records,
            delayed_preloc_records: self.delayed_preloc_records,
            histogram: self.histogram,
        })
    }
}

/// `dof_map[i]` = position of `mine[i]` in `theirs`, or `None` if the two
/// vertex sets differ.
fn vertex_positions(mine: &[u64], theirs: &[u64]) -> Option<Vec<usize>> {
    if mine.len() != theirs.len() {
        return None;
    }
    mine.iter()
        .map(|v| theirs.iter().position(|w| w == v))
        .collect()
}

fn dof_offsets(lists: &[Vec<FaceRecord>]) -> Vec<Vec<usize>> {
    lists
        .iter()
        .map(|records| {
            let mut offsets = Vec::with_capacity(records.len() + 1);
            let mut acc = 0usize;
            for r in records {
                offsets.push(acc);
                acc += r.vertex_ids.len();
            }
            offsets.push(acc);
            offsets
        })
        .collect()
}

/// Post all sends, then collect one record stream from every peer in
/// `from`. Validates framing and the slot-equals-position contract.
fn exchange_records<C: Communicator>(
    comm: &C,
    to: &[usize],
    from: &[usize],
    outgoing: &[Vec<FaceRecord>],
    tag: u16,
) -> Result<Vec<Vec<FaceRecord>>, SweepError> {
    for (i, &peer) in to.iter().enumerate() {
        comm.isend(peer, tag, &encode_face_records(&outgoing[i]));
    }
    let mut incoming = Vec::with_capacity(from.len());
    for &peer in from {
        let len = loop {
            if let Some(n) = comm.iprobe(peer, tag) {
                break n;
            }
            std::thread::yield_now();
        };
        let mut buf = vec![0u8; len];
        let data = comm
            .irecv(peer, tag, &mut buf)
            .wait()
            .ok_or_else(|| SweepError::Comm {
                neighbor: peer,
                detail: "record exchange receive failed".into(),
            })?;
        let records =
            decode_face_records(&data).map_err(|detail| SweepError::MalformedRecord {
                neighbor: peer,
                detail,
            })?;
        for (i, r) in records.iter().enumerate() {
            if r.slot as usize != i {
                return Err(SweepError::MalformedRecord {
                    neighbor: peer,
                    detail: format!("record {i} announces slot {}", r.slot),
                });
            }
        }
        incoming.push(records);
    }
    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, NoComm};
    use crate::mesh::slab::{slab_grid, two_cell_ring};
    use crate::spds::AahSweepStructure;

    const PLUS_X: [f64; 3] = [1.0, 0.0, 0.0];

    fn build_serial(
        grid: &crate::mesh::LocalMesh,
        allow_cycles: bool,
    ) -> FludsCommonData {
        let structure =
            AahSweepStructure::build(PLUS_X, grid, allow_cycles, &NoComm).unwrap();
        let histogram = FaceSizeHistogram::from_grid(grid);
        FludsCommonData::build(&structure, &histogram, grid, &NoComm).unwrap()
    }

    #[test]
    fn slab_recycles_one_slot() {
        let grid = slab_grid(4, 1, 0);
        let cd = build_serial(&grid, false);
        // Cells hand the same slot down the chain: claim, consume, free.
        assert_eq!(cd.num_slots(0), 1);
        assert_eq!(cd.num_delayed_slots(0), 0);
        match cd.face_slot(1, 0) {
            FaceSlot::LocalIncoming { slot, dof_map, .. } => {
                assert_eq!(*slot, 0);
                assert_eq!(dof_map, &[0]);
            }
            other => panic!("expected LocalIncoming, got {other:?}"),
        }
    }

    #[test]
    fn slab_boundary_faces_are_routed() {
        let grid = slab_grid(2, 1, 0);
        let cd = build_serial(&grid, false);
        assert_eq!(
            cd.face_slot(0, 0),
            &FaceSlot::Boundary {
                boundary_id: crate::mesh::slab::SLAB_LEFT_BOUNDARY
            }
        );
        assert_eq!(
            cd.face_slot(1, 1),
            &FaceSlot::Boundary {
                boundary_id: crate::mesh::slab::SLAB_RIGHT_BOUNDARY
            }
        );
    }

    #[test]
    fn ring_uses_the_delayed_pool() {
        let grid = two_cell_ring();
        let cd = build_serial(&grid, true);
        assert_eq!(cd.num_delayed_slots(0), 1);
        let delayed_out = (0..2).flat_map(|c| (0..2).map(move |f| (c, f))).filter(
            |&(c, f)| matches!(cd.face_slot(c, f), FaceSlot::DelayedLocalOutgoing { .. }),
        );
        assert_eq!(delayed_out.count(), 1);
    }

    #[test]
    fn partitioned_slab_exchanges_records() {
        let h = std::thread::spawn(|| {
            let grid = slab_grid(4, 2, 1);
            let comm = LocalComm::with_world(300, 1, 2);
            let structure =
                AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap();
            let histogram = FaceSizeHistogram::global(&grid, &comm);
            FludsCommonData::build(&structure, &histogram, &grid, &comm).unwrap()
        });
        let grid = slab_grid(4, 2, 0);
        let comm = LocalComm::with_world(300, 0, 2);
        let structure = AahSweepStructure::build(PLUS_X, &grid, false, &comm).unwrap();
        let histogram = FaceSizeHistogram::global(&grid, &comm);
        let cd0 = FludsCommonData::build(&structure, &histogram, &grid, &comm).unwrap();
        let cd1 = h.join().unwrap();

        // Rank 0 sends one face record to rank 1.
        assert_eq!(cd0.successors(), &[1]);
        assert_eq!(cd0.deploc_total_dofs(0), 1);
        // Rank 1 resolved its cut face against that record.
        assert_eq!(cd1.predecessors(), &[0]);
        assert_eq!(cd1.preloc_total_dofs(0), 1);
        match cd1.face_slot(0, 0) {
            FaceSlot::NonLocalIncoming {
                predecessor,
                record,
                dof_map,
            } => {
                assert_eq!(*predecessor, 0);
                assert_eq!(*record, 0);
                assert_eq!(dof_map, &[0]);
            }
            other => panic!("expected NonLocalIncoming, got {other:?}"),
        }
    }

    #[test]
    fn vertex_positions_rejects_mismatch() {
        assert_eq!(vertex_positions(&[1, 2], &[2, 1]), Some(vec![1, 0]));
        assert_eq!(vertex_positions(&[1, 3], &[2, 1]), None);
        assert_eq!(vertex_positions(&[1], &[1, 2]), None);
    }
}
