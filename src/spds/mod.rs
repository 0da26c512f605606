//! Sweep-plane dependency structures.
//!
//! For one direction ω, a [`SweepPlaneStructure`] classifies every cell
//! face as parallel/incoming/outgoing, orders the local cells into the
//! sweep-plane local sequence (SPLS), records the cycle edges that had to
//! be broken, and collects which partitions this partition depends on and
//! feeds. [`AahSweepStructure`](tdg::AahSweepStructure) extends it with the
//! global partition-level task dependency graph.
//!
//! Structures are built once per direction-family and immutable afterward;
//! angle sets share them through `Arc` without locking.

pub mod build;
pub mod tdg;

pub use tdg::AahSweepStructure;

use crate::graph::DirectedGraph;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Orientation of a face against the sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceOrientation {
    /// |ω·n| within tolerance; carries no flow.
    Parallel,
    /// Flow enters the cell through this face.
    Incoming,
    /// Flow leaves the cell through this face.
    Outgoing,
}

impl FaceOrientation {
    /// The orientation seen from the other side of the face.
    pub fn mirrored(self) -> Self {
        match self {
            FaceOrientation::Parallel => FaceOrientation::Parallel,
            FaceOrientation::Incoming => FaceOrientation::Outgoing,
            FaceOrientation::Outgoing => FaceOrientation::Incoming,
        }
    }
}

/// Near-grazing faces are treated as parallel below this |ω·n|.
pub const ORIENTATION_TOLERANCE: f64 = 1.0e-16;

/// Classify a single face from ω·n.
#[inline]
pub fn classify(mu: f64) -> FaceOrientation {
    if mu > ORIENTATION_TOLERANCE {
        FaceOrientation::Outgoing
    } else if mu < -ORIENTATION_TOLERANCE {
        FaceOrientation::Incoming
    } else {
        FaceOrientation::Parallel
    }
}

/// A local cell-to-cell dependency edge removed to break a cycle. Its
/// faces use the delayed (double-buffered) flux path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclicEdge {
    pub from: usize,
    pub to: usize,
}

/// Per-direction sweep ordering for one partition.
#[derive(Debug, Clone)]
pub struct SweepPlaneStructure {
    direction: [f64; 3],
    partition: usize,
    /// Sweep-plane local sequence: local cell ids in execution order.
    spls: Vec<usize>,
    /// Inverse of `spls`: position of each local cell in the sweep.
    spls_position: Vec<usize>,
    /// Per cell, per face, the classified orientation.
    orientations: Vec<Vec<FaceOrientation>>,
    /// Local dependency graph after cycle removal (acyclic).
    local_graph: DirectedGraph,
    /// Edges removed to break local cycles.
    local_cyclic_edges: Vec<CyclicEdge>,
    /// Partitions whose outflow this partition consumes.
    location_dependencies: Vec<usize>,
    /// Partitions consuming this partition's outflow.
    location_successors: Vec<usize>,
}

impl SweepPlaneStructure {
    pub fn direction(&self) -> [f64; 3] {
        self.direction
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Local cell ids in sweep order. Every local cell appears exactly once.
    pub fn spls(&self) -> &[usize] {
        &self.spls
    }

    /// Position of local cell `c` in the sweep order.
    pub fn sweep_position(&self, c: usize) -> usize {
        self.spls_position[c]
    }

    pub fn orientation(&self, cell: usize, face: usize) -> FaceOrientation {
        self.orientations[cell][face]
    }

    pub fn orientations(&self, cell: usize) -> &[FaceOrientation] {
        &self.orientations[cell]
    }

    /// The acyclic local dependency graph (cycle edges already removed).
    pub fn local_graph(&self) -> &DirectedGraph {
        &self.local_graph
    }

    pub fn local_cyclic_edges(&self) -> &[CyclicEdge] {
        &self.local_cyclic_edges
    }

    /// True if `from -> to` was removed as a cycle edge.
    pub fn is_cyclic_edge(&self, from: usize, to: usize) -> bool {
        self.local_cyclic_edges
            .iter()
            .any(|e| e.from == from && e.to == to)
    }

    pub fn location_dependencies(&self) -> &[usize] {
        &self.location_dependencies
    }

    pub fn location_successors(&self) -> &[usize] {
        &self.location_successors
    }

    /// Graphviz rendering of the local dependency graph. Diagnostic only.
    pub fn write_dot<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        self.local_graph.write_dot(w, "sweep_dependencies")
    }
}
