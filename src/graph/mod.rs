//! Directed-graph machinery for sweep ordering.

pub mod directed_graph;

pub use directed_graph::{DirectedGraph, GraphEdge};
