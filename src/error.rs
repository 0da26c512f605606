//! SweepError: unified error type for mesh-sweep public APIs.
//!
//! Configuration and lookup failures are fatal for the whole run: a sweep is
//! a collective operation with no salvageable partial state. Transport
//! failures are the one retried class — the affected transfer stays "not
//! yet received" and the next poll tries again.

use thiserror::Error;

/// Unified error type for mesh-sweep operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SweepError {
    /// A cell the sweep cannot order (degenerate face list, missing normal).
    #[error("unsupported cell {cell} on partition {partition}: {what}")]
    UnsupportedCell {
        partition: usize,
        cell: u64,
        what: &'static str,
    },
    /// A dependency cycle was found while cycles are disallowed.
    #[error("dependency cycle on partition {partition}; implicated cells {cells:?}")]
    CycleDetected { partition: usize, cells: Vec<u64> },
    /// Topological sort left vertices unordered (residual cycle).
    #[error("sweep ordering failed on partition {partition}: {ordered} of {total} cells ordered")]
    SortFailed {
        partition: usize,
        ordered: usize,
        total: usize,
    },
    /// The partition-level task graph is still cyclic after delayed-edge removal.
    #[error("task dependency graph remains cyclic after delayed-edge removal")]
    CyclicTaskGraph,
    /// Mirrored face orientations disagree between two local cells.
    #[error("face orientation mismatch between cells {cell_a} and {cell_b}")]
    OrientationMismatch { cell_a: u64, cell_b: u64 },
    /// Point-to-point exchange with a neighbor rank failed.
    #[error("communication with rank {neighbor} failed: {detail}")]
    Comm { neighbor: usize, detail: String },
    /// A payload arrived with an unexpected length.
    #[error("received {got} bytes from rank {neighbor}, expected {expected}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// A peer announced a different record count than the local boundary implies.
    #[error("rank {neighbor} sent {got} face records, expected {expected}")]
    RecordCountMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// No free (or known) slot for a face during buffer layout.
    #[error("no slot mapping for face {face} of cell {cell}")]
    MissingSlot { cell: u64, face: usize },
    /// The beta pass could not reconcile an incoming face with any upwind record.
    #[error("no vertex mapping for incoming face {face} of cell {cell} from rank {neighbor}")]
    MissingVertexMapping {
        cell: u64,
        face: usize,
        neighbor: usize,
    },
    /// A wire record failed to decode.
    #[error("malformed wire record from rank {neighbor}: {detail}")]
    MalformedRecord { neighbor: usize, detail: String },
}

impl SweepError {
    /// True for the transient transport class that the poll loop retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, SweepError::Comm { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_ids() {
        let e = SweepError::CycleDetected {
            partition: 3,
            cells: vec![10, 11],
        };
        let msg = e.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("10"));
    }

    #[test]
    fn transient_classification() {
        assert!(
            SweepError::Comm {
                neighbor: 1,
                detail: "probe failed".into()
            }
            .is_transient()
        );
        assert!(!SweepError::CyclicTaskGraph.is_transient());
    }
}
