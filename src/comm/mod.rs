//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking — the sweep protocol probes
//! with [`Communicator::iprobe`] before posting a receive, so a receive is
//! only ever waited on once its message is known to be pending.

pub mod wire;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;

/// Typed message tag. The sweep protocol derives chunk tags from a base tag
/// by offsetting, so the inner value is public.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag shifted by `k`; chunked transfers tag chunk `k` as `base + k`.
    pub const fn offset(self, k: u16) -> CommTag {
        CommTag(self.0 + k)
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Non-blocking probe: `Some(len)` if a message from `peer` with `tag`
    /// is pending, with `len` its payload size in bytes.
    fn iprobe(&self, peer: usize, tag: u16) -> Option<usize>;

    /// Gather `send` from every rank into `recv`, which must hold
    /// `size() * send.len()` bytes, laid out in rank order. Every rank must
    /// contribute the same number of bytes.
    fn allgather(&self, send: &[u8], recv: &mut [u8]);
}

/// Anything that can be waited on.
pub trait Wait {
    /// True once the operation has completed (never blocks).
    fn ready(&self) -> bool;
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn ready(&self) -> bool {
        true
    }
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn iprobe(&self, _peer: usize, _tag: u16) -> Option<usize> {
        None
    }
    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        recv[..send.len()].copy_from_slice(send);
    }
}

// --- LocalComm: several ranks inside one process ---

/// Mailbox key: (world, src, dst, tag). The `world` field isolates
/// independent rank groups running in the same process (test harnesses).
type Key = (u64, usize, usize, u16);

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

/// Tag reserved for the allgather collective.
const ALLGATHER_TAG: u16 = 0xFFF0;

/// In-process mailbox communicator. Each rank owns one `LocalComm`; sends
/// enqueue into a process-global FIFO mailbox keyed by (world, src, dst,
/// tag), receives dequeue in order. Sends complete immediately.
#[derive(Clone, Debug)]
pub struct LocalComm {
    world: u64,
    rank: usize,
    size: usize,
}

impl LocalComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self::with_world(0, rank, size)
    }

    /// A communicator in an isolated mailbox world; ranks only exchange
    /// messages with ranks holding the same `world` id.
    pub fn with_world(world: u64, rank: usize, size: usize) -> Self {
        assert!(rank < size, "rank {rank} out of range for size {size}");
        Self { world, rank, size }
    }
}

/// Receive handle for [`LocalComm`]: completes when the matching send has
/// been enqueued. `wait` spins, so a rank must never wait on a message its
/// own thread is responsible for producing.
pub struct LocalRecvHandle {
    key: Key,
    max_len: usize,
}

impl Wait for LocalRecvHandle {
    fn ready(&self) -> bool {
        MAILBOX.get(&self.key).is_some_and(|q| !q.is_empty())
    }
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut q) = MAILBOX.get_mut(&self.key) {
                if let Some(bytes) = q.pop_front() {
                    let n = bytes.len().min(self.max_len);
                    return Some(bytes[..n].to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.world, self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalRecvHandle {
        LocalRecvHandle {
            key: (self.world, peer, self.rank, tag),
            max_len: buf.len(),
        }
    }

    fn iprobe(&self, peer: usize, tag: u16) -> Option<usize> {
        let key = (self.world, peer, self.rank, tag);
        MAILBOX
            .get(&key)
            .and_then(|q| q.front().map(|b| b.len()))
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        let n = send.len();
        assert_eq!(recv.len(), n * self.size, "allgather recv buffer size");
        recv[self.rank * n..(self.rank + 1) * n].copy_from_slice(send);
        for peer in 0..self.size {
            if peer != self.rank {
                self.isend(peer, ALLGATHER_TAG, send);
            }
        }
        for peer in 0..self.size {
            if peer == self.rank {
                continue;
            }
            let mut chunk = vec![0u8; n];
            let h = self.irecv(peer, ALLGATHER_TAG, &mut chunk);
            let data = h.wait().expect("allgather receive");
            recv[peer * n..peer * n + data.len()].copy_from_slice(&data);
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
//
// The protocol only ever receives after a successful probe, so the
// receive path may complete eagerly; handles exist to satisfy the
// non-blocking contract shared with the in-process backends.
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::point_to_point::Status;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }
    }

    /// Receive handle holding an already-landed payload.
    pub struct MpiHandle {
        data: Option<Vec<u8>>,
    }

    impl Wait for MpiHandle {
        fn ready(&self) -> bool {
            true
        }
        fn wait(self) -> Option<Vec<u8>> {
            self.data
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let (data, _status): (Vec<u8>, Status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag(tag as i32);
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            MpiHandle { data: Some(data) }
        }

        fn iprobe(&self, peer: usize, tag: u16) -> Option<usize> {
            self.world
                .process_at_rank(peer as i32)
                .immediate_probe_with_tag(tag as i32)
                .map(|status| status.count(u8::equivalent_datatype()) as usize)
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) {
            self.world.all_gather_into(send, recv);
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_round_trip() {
        let tag = CommTag(0x1000);
        let c0 = LocalComm::with_world(100, 0, 2);
        let c1 = LocalComm::with_world(100, 1, 2);

        let msg = b"hello";
        c0.isend(1, tag.base(), msg);

        let mut buf = [0u8; 5];
        let h = c1.irecv(0, tag.base(), &mut buf);
        let got = h.wait().unwrap();
        assert_eq!(&got, msg);
    }

    #[test]
    fn local_fifo_order() {
        let tag = CommTag(0x1001);
        let c0 = LocalComm::with_world(101, 0, 2);
        let c1 = LocalComm::with_world(101, 1, 2);

        for i in 0..10u8 {
            c0.isend(1, tag.base(), &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            let h = c1.irecv(0, tag.base(), &mut b);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn probe_then_receive_never_blocks() {
        let tag = CommTag(0x1002);
        let c0 = LocalComm::with_world(102, 0, 2);
        let c1 = LocalComm::with_world(102, 1, 2);

        assert_eq!(c1.iprobe(0, tag.base()), None);
        c0.isend(1, tag.base(), &[1, 2, 3]);
        assert_eq!(c1.iprobe(0, tag.base()), Some(3));

        let mut b = [0u8; 3];
        let h = c1.irecv(0, tag.base(), &mut b);
        assert!(h.ready());
        assert_eq!(h.wait().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn truncation_is_ok() {
        let tag = CommTag(0x1003);
        let c0 = LocalComm::with_world(103, 0, 2);
        let c1 = LocalComm::with_world(103, 1, 2);

        c0.isend(1, tag.base(), &[1, 2, 3, 4, 5, 6]);
        let mut b = [0u8; 4];
        let h = c1.irecv(0, tag.base(), &mut b);
        assert_eq!(h.wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn worlds_are_isolated() {
        let tag = CommTag(0x1004);
        let a0 = LocalComm::with_world(104, 0, 2);
        let b1 = LocalComm::with_world(105, 1, 2);

        a0.isend(1, tag.base(), &[9]);
        assert_eq!(b1.iprobe(0, tag.base()), None);

        // Drain so the mailbox does not leak into later tests.
        let a1 = LocalComm::with_world(104, 1, 2);
        let mut b = [0u8; 1];
        let _ = a1.irecv(0, tag.base(), &mut b).wait();
    }

    #[test]
    fn allgather_two_ranks() {
        let c0 = LocalComm::with_world(106, 0, 2);
        let c1 = LocalComm::with_world(106, 1, 2);

        let t = std::thread::spawn(move || {
            let mut recv = [0u8; 4];
            c1.allgather(&[2, 3], &mut recv);
            recv
        });
        let mut recv = [0u8; 4];
        c0.allgather(&[0, 1], &mut recv);
        assert_eq!(recv, [0, 1, 2, 3]);
        assert_eq!(t.join().unwrap(), [0, 1, 2, 3]);
    }

    #[test]
    fn nocomm_allgather_is_identity() {
        let c = NoComm;
        let mut recv = [0u8; 2];
        c.allgather(&[7, 8], &mut recv);
        assert_eq!(recv, [7, 8]);
    }
}
