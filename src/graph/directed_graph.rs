//! Generic directed dependency graph: vertices, weighted edges, Kahn
//! topological sort, Tarjan strongly-connected components, and
//! feedback-edge removal.
//!
//! Determinism: successor maps are ordered, the ready set in the sort is a
//! min-heap, and feedback removal breaks ties by smallest `(from, to)`
//! pair, so identical inputs always produce identical orders and removed
//! edge sets regardless of insertion order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::io::Write;

/// A directed edge with the flow weight it carried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
}

/// Directed graph over `0..num_vertices()`. Parallel edges accumulate
/// their weights onto a single edge.
#[derive(Debug, Clone, Default)]
pub struct DirectedGraph {
    succ: Vec<BTreeMap<usize, f64>>,
    pred: Vec<BTreeSet<usize>>,
}

impl DirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices(n: usize) -> Self {
        Self {
            succ: vec![BTreeMap::new(); n],
            pred: vec![BTreeSet::new(); n],
        }
    }

    pub fn add_vertex(&mut self) -> usize {
        self.succ.push(BTreeMap::new());
        self.pred.push(BTreeSet::new());
        self.succ.len() - 1
    }

    pub fn num_vertices(&self) -> usize {
        self.succ.len()
    }

    pub fn num_edges(&self) -> usize {
        self.succ.iter().map(|m| m.len()).sum()
    }

    /// Add (or reinforce) the edge `from -> to`.
    pub fn add_edge(&mut self, from: usize, to: usize, weight: f64) {
        *self.succ[from].entry(to).or_insert(0.0) += weight;
        self.pred[to].insert(from);
    }

    /// Remove `from -> to`, returning the edge if it existed.
    pub fn remove_edge(&mut self, from: usize, to: usize) -> Option<GraphEdge> {
        let weight = self.succ[from].remove(&to)?;
        self.pred[to].remove(&from);
        Some(GraphEdge { from, to, weight })
    }

    pub fn contains_edge(&self, from: usize, to: usize) -> bool {
        self.succ[from].contains_key(&to)
    }

    pub fn successors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.succ[v].keys().copied()
    }

    pub fn predecessors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.pred[v].iter().copied()
    }

    pub fn in_degree(&self, v: usize) -> usize {
        self.pred[v].len()
    }

    /// Kahn topological sort. On failure returns the vertices left
    /// unordered (every one of them sits on a cycle), never a truncated
    /// order presented as complete.
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let n = self.succ.len();
        let mut in_deg = vec![0usize; n];
        for m in &self.succ {
            for (&w, _) in m {
                in_deg[w] += 1;
            }
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&v| in_deg[v] == 0)
            .map(Reverse)
            .collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(v)) = ready.pop() {
            placed[v] = true;
            order.push(v);
            for (&w, _) in &self.succ[v] {
                in_deg[w] -= 1;
                if in_deg[w] == 0 {
                    ready.push(Reverse(w));
                }
            }
        }
        if order.len() == n {
            Ok(order)
        } else {
            Err((0..n).filter(|&v| !placed[v]).collect())
        }
    }

    /// Longest-path level per vertex, given a valid topological order:
    /// `level(v) = 1 + max(level of predecessors)`, sources at 0.
    pub fn levels(&self, order: &[usize]) -> Vec<u32> {
        let mut level = vec![0u32; self.succ.len()];
        for &v in order {
            level[v] = self.pred[v]
                .iter()
                .map(|&p| level[p] + 1)
                .max()
                .unwrap_or(0);
        }
        level
    }

    /// Strongly-connected components (iterative Tarjan). Each component is
    /// sorted; singletons without a self-loop are trivial.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.succ.len();
        let adj: Vec<Vec<usize>> = self.succ.iter().map(|m| m.keys().copied().collect()).collect();

        let mut index = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut sccs: Vec<Vec<usize>> = Vec::new();

        for start in 0..n {
            if index[start] != usize::MAX {
                continue;
            }
            let mut call: Vec<(usize, usize)> = Vec::new();
            index[start] = next_index;
            low[start] = next_index;
            next_index += 1;
            stack.push(start);
            on_stack[start] = true;
            call.push((start, 0));

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if frame.1 < adj[v].len() {
                    let w = adj[v][frame.1];
                    frame.1 += 1;
                    if index[w] == usize::MAX {
                        index[w] = next_index;
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                } else {
                    if low[v] == index[v] {
                        let mut comp = Vec::new();
                        loop {
                            let w = stack.pop().expect("tarjan stack underflow");
                            on_stack[w] = false;
                            comp.push(w);
                            if w == v {
                                break;
                            }
                        }
                        comp.sort_unstable();
                        sccs.push(comp);
                    }
                    call.pop();
                    if let Some(parent) = call.last() {
                        let p = parent.0;
                        low[p] = low[p].min(low[v]);
                    }
                }
            }
        }
        sccs
    }

    /// Remove a feedback-edge set: edges whose deletion leaves the graph
    /// acyclic. Self-loops go first; then, until no non-trivial component
    /// survives, the minimum-weight internal edge of each strongly
    /// connected component is removed (ties: smallest `(from, to)`). The
    /// removed edges are returned in removal order; the graph is mutated
    /// only by these deletions.
    pub fn remove_feedback_edges(&mut self) -> Vec<GraphEdge> {
        let mut removed = Vec::new();

        for v in 0..self.succ.len() {
            if let Some(e) = self.remove_edge(v, v) {
                removed.push(e);
            }
        }

        loop {
            let mut progressed = false;
            for comp in self.strongly_connected_components() {
                if comp.len() < 2 {
                    continue;
                }
                let members: BTreeSet<usize> = comp.iter().copied().collect();
                let mut best: Option<GraphEdge> = None;
                for &v in &comp {
                    for (&w, &weight) in &self.succ[v] {
                        if !members.contains(&w) {
                            continue;
                        }
                        let candidate = GraphEdge { from: v, to: w, weight };
                        let better = match &best {
                            None => true,
                            Some(b) => {
                                candidate.weight < b.weight
                                    || (candidate.weight == b.weight
                                        && (candidate.from, candidate.to) < (b.from, b.to))
                            }
                        };
                        if better {
                            best = Some(candidate);
                        }
                    }
                }
                if let Some(e) = best {
                    self.remove_edge(e.from, e.to);
                    removed.push(e);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        removed
    }

    /// Human-readable Graphviz export of the current graph. Diagnostic
    /// only; not part of the functional contract.
    pub fn write_dot<W: Write>(&self, w: &mut W, name: &str) -> std::io::Result<()> {
        writeln!(w, "digraph {name} {{")?;
        for v in 0..self.succ.len() {
            writeln!(w, "  v{v};")?;
        }
        for (v, m) in self.succ.iter().enumerate() {
            for (&to, &weight) in m {
                writeln!(w, "  v{v} -> v{to} [label=\"{weight:.3}\"];")?;
            }
        }
        writeln!(w, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(n: usize) -> DirectedGraph {
        let mut g = DirectedGraph::with_vertices(n);
        for v in 0..n - 1 {
            g.add_edge(v, v + 1, 1.0);
        }
        g
    }

    #[test]
    fn sort_of_chain() {
        let g = chain(5);
        assert_eq!(g.topological_sort().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn sort_reports_cycle_vertices() {
        let mut g = chain(4);
        g.add_edge(3, 1, 1.0);
        let left = g.topological_sort().unwrap_err();
        assert_eq!(left, vec![1, 2, 3]);
    }

    #[test]
    fn parallel_edges_accumulate_weight() {
        let mut g = DirectedGraph::with_vertices(2);
        g.add_edge(0, 1, 0.25);
        g.add_edge(0, 1, 0.5);
        let e = g.remove_edge(0, 1).unwrap();
        assert_eq!(e.weight, 0.75);
    }

    #[test]
    fn scc_finds_cycle() {
        let mut g = chain(4);
        g.add_edge(2, 1, 1.0);
        let sccs = g.strongly_connected_components();
        assert!(sccs.contains(&vec![1, 2]));
    }

    #[test]
    fn feedback_removal_breaks_two_cycle() {
        let mut g = DirectedGraph::with_vertices(2);
        g.add_edge(0, 1, 2.0);
        g.add_edge(1, 0, 1.0);
        let removed = g.remove_feedback_edges();
        // The lighter edge goes.
        assert_eq!(removed.len(), 1);
        assert_eq!((removed[0].from, removed[0].to), (1, 0));
        assert!(g.topological_sort().is_ok());
    }

    #[test]
    fn feedback_removal_tie_break_is_deterministic() {
        let mut g = DirectedGraph::with_vertices(3);
        g.add_edge(0, 1, 1.0);
        g.add_edge(1, 2, 1.0);
        g.add_edge(2, 0, 1.0);
        let removed = g.remove_feedback_edges();
        assert_eq!(removed.len(), 1);
        assert_eq!((removed[0].from, removed[0].to), (0, 1));
    }

    #[test]
    fn self_loop_is_removed_first() {
        let mut g = DirectedGraph::with_vertices(2);
        g.add_edge(0, 0, 1.0);
        g.add_edge(0, 1, 1.0);
        let removed = g.remove_feedback_edges();
        assert_eq!(removed.len(), 1);
        assert_eq!((removed[0].from, removed[0].to), (0, 0));
    }

    #[test]
    fn levels_follow_longest_path() {
        let mut g = DirectedGraph::with_vertices(4);
        g.add_edge(0, 1, 1.0);
        g.add_edge(1, 3, 1.0);
        g.add_edge(0, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        let order = g.topological_sort().unwrap();
        let levels = g.levels(&order);
        assert_eq!(levels, vec![0, 1, 1, 2]);
    }

    #[test]
    fn dot_export_mentions_every_edge() {
        let g = chain(3);
        let mut buf = Vec::new();
        g.write_dot(&mut buf, "g").unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("v0 -> v1"));
        assert!(text.contains("v1 -> v2"));
    }

    proptest! {
        /// After feedback removal, any graph sorts, and every surviving
        /// edge points forward in the order.
        #[test]
        fn removal_always_yields_sortable_graph(
            edges in proptest::collection::vec((0usize..12, 0usize..12), 0..60)
        ) {
            let mut g = DirectedGraph::with_vertices(12);
            for (a, b) in edges {
                g.add_edge(a, b, 1.0);
            }
            g.remove_feedback_edges();
            let order = g.topological_sort().unwrap();
            let mut pos = vec![0usize; 12];
            for (i, &v) in order.iter().enumerate() {
                pos[v] = i;
            }
            for v in 0..12 {
                for w in g.successors(v) {
                    prop_assert!(pos[v] < pos[w]);
                }
            }
        }
    }
}
