//! Chunked non-blocking messaging for AAH angle sets.
//!
//! Each peer's payload is one flat `f64` stream whose layout both ends
//! computed identically in the beta pass. Streams larger than the eager
//! limit split into near-equal chunks, tagged
//! `max_num_messages * angle_set_id + chunk_index`; the chunk ceiling is
//! negotiated once across all angle sets (and ranks) so tags never
//! collide. Delayed (cyclic) data moves on a disjoint tag space and never
//! gates readiness.

use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::comm::{Communicator, Wait};
use crate::error::SweepError;
use crate::fluds::AahFluds;
use std::sync::Arc;

/// Tag space boundary between regular and delayed chunk streams.
const DELAYED_TAG_BASE: u16 = 0x4000;

/// Chunking of one peer's stream: derived once, reused every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Chunk sizes in doubles; sizes differ by at most one.
    pub chunk_sizes: Vec<usize>,
    /// Chunk offsets in doubles into the peer stream.
    pub chunk_offsets: Vec<usize>,
}

impl MessageDescriptor {
    /// Split `total_unknowns` doubles into `ceil(total*8 / eager_limit)`
    /// near-equal chunks (at least one).
    pub fn new(total_unknowns: usize, eager_limit: usize) -> Self {
        let bytes = total_unknowns * 8;
        let num_chunks = bytes.div_ceil(eager_limit.max(1)).max(1);
        let base = total_unknowns / num_chunks;
        let extra = total_unknowns % num_chunks;
        let mut chunk_sizes = Vec::with_capacity(num_chunks);
        let mut chunk_offsets = Vec::with_capacity(num_chunks);
        let mut off = 0usize;
        for i in 0..num_chunks {
            let sz = base + usize::from(i < extra);
            chunk_offsets.push(off);
            chunk_sizes.push(sz);
            off += sz;
        }
        Self {
            chunk_sizes,
            chunk_offsets,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_sizes.len()
    }
}

/// Per-angle-set communicator state.
pub struct AahAsyncComm<C: Communicator> {
    comm: Arc<C>,
    angle_set_id: usize,
    eager_limit: usize,
    max_num_messages: usize,
    initialized: bool,
    preloc_descriptors: Vec<MessageDescriptor>,
    preloc_chunks_received: Vec<Vec<bool>>,
    deploc_descriptors: Vec<MessageDescriptor>,
    delayed_preloc_descriptors: Vec<MessageDescriptor>,
    delayed_preloc_chunks_received: Vec<Vec<bool>>,
    delayed_deploc_descriptors: Vec<MessageDescriptor>,
    send_handles: Vec<Option<C::SendHandle>>,
}

impl<C: Communicator> AahAsyncComm<C> {
    pub fn new(comm: Arc<C>, angle_set_id: usize, eager_limit: usize) -> Self {
        Self {
            comm,
            angle_set_id,
            eager_limit,
            max_num_messages: 1,
            initialized: false,
            preloc_descriptors: Vec::new(),
            preloc_chunks_received: Vec::new(),
            deploc_descriptors: Vec::new(),
            delayed_preloc_descriptors: Vec::new(),
            delayed_preloc_chunks_received: Vec::new(),
            delayed_deploc_descriptors: Vec::new(),
            send_handles: Vec::new(),
        }
    }

    /// Build the per-peer chunk descriptors. Cheap and idempotent; called
    /// before the first probe.
    pub fn initialize(&mut self, fluds: &AahFluds) {
        if self.initialized {
            return;
        }
        let cd = fluds.common();
        self.preloc_descriptors = (0..cd.predecessors().len())
            .map(|i| MessageDescriptor::new(fluds.preloc_num_unknowns(i), self.eager_limit))
            .collect();
        self.deploc_descriptors = (0..cd.successors().len())
            .map(|i| MessageDescriptor::new(fluds.deploc_num_unknowns(i), self.eager_limit))
            .collect();
        self.delayed_preloc_descriptors = (0..cd.delayed_predecessors().len())
            .map(|i| {
                MessageDescriptor::new(fluds.delayed_preloc_num_unknowns(i), self.eager_limit)
            })
            .collect();
        self.delayed_deploc_descriptors = (0..cd.delayed_successors().len())
            .map(|i| {
                MessageDescriptor::new(fluds.delayed_deploc_num_unknowns(i), self.eager_limit)
            })
            .collect();
        self.preloc_chunks_received = self
            .preloc_descriptors
            .iter()
            .map(|d| vec![false; d.num_chunks()])
            .collect();
        self.delayed_preloc_chunks_received = self
            .delayed_preloc_descriptors
            .iter()
            .map(|d| vec![false; d.num_chunks()])
            .collect();
        self.initialized = true;
    }

    /// Largest chunk count any peer of this angle set uses.
    pub fn max_chunk_count(&self) -> usize {
        self.preloc_descriptors
            .iter()
            .chain(self.deploc_descriptors.iter())
            .chain(self.delayed_preloc_descriptors.iter())
            .chain(self.delayed_deploc_descriptors.iter())
            .map(MessageDescriptor::num_chunks)
            .max()
            .unwrap_or(1)
    }

    /// Install the negotiated cross-angle-set chunk ceiling.
    pub fn set_max_num_messages(&mut self, count: usize) {
        self.max_num_messages = count.max(1);
    }

    fn regular_tag(&self, chunk: usize) -> u16 {
        (self.max_num_messages * self.angle_set_id + chunk) as u16
    }

    fn delayed_tag(&self, chunk: usize) -> u16 {
        DELAYED_TAG_BASE + (self.max_num_messages * self.angle_set_id + chunk) as u16
    }

    /// Probe and pull any regular chunks that have arrived. Returns true
    /// once every regular predecessor chunk is in. A failed pull is
    /// logged and left pending for the next poll.
    pub fn probe_and_receive(&mut self, fluds: &mut AahFluds) -> Result<bool, SweepError> {
        let mut all = true;
        for pi in 0..self.preloc_descriptors.len() {
            let peer = fluds.common().predecessors()[pi];
            for chunk in 0..self.preloc_descriptors[pi].num_chunks() {
                if self.preloc_chunks_received[pi][chunk] {
                    continue;
                }
                let tag = self.regular_tag(chunk);
                if self.comm.iprobe(peer, tag).is_none() {
                    all = false;
                    continue;
                }
                let offset = self.preloc_descriptors[pi].chunk_offsets[chunk];
                let size = self.preloc_descriptors[pi].chunk_sizes[chunk];
                let ok = receive_chunk(
                    self.comm.as_ref(),
                    peer,
                    tag,
                    &mut fluds.preloc_buffer_mut(pi)[offset..offset + size],
                )?;
                if ok {
                    self.preloc_chunks_received[pi][chunk] = true;
                } else {
                    all = false;
                }
            }
        }
        Ok(all)
    }

    /// Probe and pull delayed chunks into the *new* buffers. Never gates
    /// readiness; returns true once none remain pending.
    pub fn receive_delayed(&mut self, fluds: &mut AahFluds) -> Result<bool, SweepError> {
        let mut all = true;
        for pi in 0..self.delayed_preloc_descriptors.len() {
            let peer = fluds.common().delayed_predecessors()[pi];
            for chunk in 0..self.delayed_preloc_descriptors[pi].num_chunks() {
                if self.delayed_preloc_chunks_received[pi][chunk] {
                    continue;
                }
                let tag = self.delayed_tag(chunk);
                if self.comm.iprobe(peer, tag).is_none() {
                    all = false;
                    continue;
                }
                let offset = self.delayed_preloc_descriptors[pi].chunk_offsets[chunk];
                let size = self.delayed_preloc_descriptors[pi].chunk_sizes[chunk];
                let ok = receive_chunk(
                    self.comm.as_ref(),
                    peer,
                    tag,
                    &mut fluds.delayed_preloc_new_buffer_mut(pi)[offset..offset + size],
                )?;
                if ok {
                    self.delayed_preloc_chunks_received[pi][chunk] = true;
                } else {
                    all = false;
                }
            }
        }
        Ok(all)
    }

    /// Enqueue every outgoing chunk (regular and delayed) after the sweep
    /// has produced this partition's outflow.
    pub fn enqueue_sends(&mut self, fluds: &AahFluds) {
        for si in 0..self.deploc_descriptors.len() {
            let peer = fluds.common().successors()[si];
            let buffer = fluds.deploc_buffer(si);
            for chunk in 0..self.deploc_descriptors[si].num_chunks() {
                let offset = self.deploc_descriptors[si].chunk_offsets[chunk];
                let size = self.deploc_descriptors[si].chunk_sizes[chunk];
                let tag = self.regular_tag(chunk);
                let handle =
                    self.comm
                        .isend(peer, tag, cast_slice(&buffer[offset..offset + size]));
                self.send_handles.push(Some(handle));
            }
        }
        for si in 0..self.delayed_deploc_descriptors.len() {
            let peer = fluds.common().delayed_successors()[si];
            let buffer = fluds.delayed_deploc_buffer(si);
            for chunk in 0..self.delayed_deploc_descriptors[si].num_chunks() {
                let offset = self.delayed_deploc_descriptors[si].chunk_offsets[chunk];
                let size = self.delayed_deploc_descriptors[si].chunk_sizes[chunk];
                let tag = self.delayed_tag(chunk);
                let handle =
                    self.comm
                        .isend(peer, tag, cast_slice(&buffer[offset..offset + size]));
                self.send_handles.push(Some(handle));
            }
        }
    }

    /// Complete any finished sends; true once none remain.
    pub fn flush_sends(&mut self) -> bool {
        for slot in self.send_handles.iter_mut() {
            if slot.as_ref().is_some_and(Wait::ready) {
                let _ = slot.take().map(Wait::wait);
            }
        }
        self.send_handles.retain(Option::is_some);
        self.send_handles.is_empty()
    }

    /// Clear per-iteration state; descriptors are kept and reused.
    pub fn reset(&mut self) {
        for handle in self.send_handles.drain(..).flatten() {
            let _ = handle.wait();
        }
        for flags in self
            .preloc_chunks_received
            .iter_mut()
            .chain(self.delayed_preloc_chunks_received.iter_mut())
        {
            flags.fill(false);
        }
    }
}

/// Pull one probed chunk into `target`. Returns `Ok(false)` (and logs) on
/// a transient receive failure, `Err` on a size violation.
fn receive_chunk<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: u16,
    target: &mut [f64],
) -> Result<bool, SweepError> {
    let expected = std::mem::size_of_val(target);
    let bytes = cast_slice_mut(target);
    let handle = comm.irecv(peer, tag, bytes);
    match handle.wait() {
        Some(data) if data.len() == expected => {
            bytes.copy_from_slice(&data);
            Ok(true)
        }
        Some(data) => Err(SweepError::BufferSizeMismatch {
            neighbor: peer,
            expected,
            got: data.len(),
        }),
        None => {
            log::error!("chunk receive from rank {peer} (tag {tag}) failed; will repoll");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_total_with_near_equal_sizes() {
        // 100 doubles = 800 bytes; a 300-byte eager limit forces 3 chunks.
        let d = MessageDescriptor::new(100, 300);
        assert_eq!(d.num_chunks(), 3);
        assert_eq!(d.chunk_sizes.iter().sum::<usize>(), 100);
        let max = d.chunk_sizes.iter().max().unwrap();
        let min = d.chunk_sizes.iter().min().unwrap();
        assert!(max - min <= 1);
        assert_eq!(d.chunk_offsets, vec![0, 34, 67]);
    }

    #[test]
    fn small_payload_is_one_chunk() {
        let d = MessageDescriptor::new(4, 32_000);
        assert_eq!(d.num_chunks(), 1);
        assert_eq!(d.chunk_sizes, vec![4]);
    }

    #[test]
    fn empty_payload_still_has_a_chunk() {
        let d = MessageDescriptor::new(0, 32_000);
        assert_eq!(d.num_chunks(), 1);
        assert_eq!(d.chunk_sizes, vec![0]);
    }
}
