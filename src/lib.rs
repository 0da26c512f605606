//! # mesh-sweep
//!
//! mesh-sweep is the parallel sweep-scheduling and angular-flux
//! communication engine of a discrete-ordinates transport solver. For each
//! discrete direction it orders cells along the flow (breaking dependency
//! cycles within and across mesh partitions), precomputes fixed flux-buffer
//! addressing reused every iteration, and drives many independent
//! per-direction sweep tasks through a non-blocking messaging protocol so
//! computation overlaps communication.
//!
//! ## What lives here
//! - Directed dependency graphs: topological sort, cycle (feedback-edge)
//!   removal, partition-level task graphs with depth levels
//! - Sweep-plane structures (SPDS): face orientation classification and
//!   the per-direction cell ordering (SPLS)
//! - Flux data structures (FLUDS): category-bucketed slot addressing,
//!   cross-partition vertex reconciliation, deferred allocation
//! - Angle sets and schedulers: the AAH model (global task graph, chunked
//!   fixed-layout messages) and the CBC model (live task list,
//!   self-describing messages)
//!
//! The transport physics, the finite-element mesh, and the outer solver
//! live elsewhere; the engine consumes them through the [`mesh::SweepGrid`],
//! [`sweep::SweepKernel`], and [`sweep::SweepBoundary`] contracts.
//!
//! ## Determinism
//! Sorts, cycle removal, and slot assignment break ties deterministically,
//! so identical meshes and directions yield identical schedules and buffer
//! layouts on every rank and every run.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-sweep = "0.4"
//! # Optional: MPI backend
//! # features = ["mpi-support"]
//! ```

pub mod cache;
pub mod comm;
pub mod error;
pub mod fluds;
pub mod graph;
pub mod mesh;
pub mod spds;
pub mod sweep;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::cache::StructureCache;
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{CommTag, Communicator, LocalComm, NoComm, Wait};
    pub use crate::error::SweepError;
    pub use crate::fluds::{AahFluds, CbcFluds, FaceSizeHistogram, Fluds, FludsCommonData};
    pub use crate::graph::DirectedGraph;
    pub use crate::mesh::{Cell, CellFace, FaceNeighbor, LocalMesh, SweepGrid};
    pub use crate::spds::{AahSweepStructure, FaceOrientation, SweepPlaneStructure};
    pub use crate::sweep::{
        AahAngleSet, AngleSet, AngleSetStatus, BoundaryMap, CbcAngleSet, CellSweepContext,
        ExecutionPermission, ReflectingBoundary, SchedulerOptions, SchedulingAlgorithm,
        SweepBoundary, SweepKernel, SweepScheduler, VacuumBoundary,
    };
}
