//! Node Dependency Graph
//!
//! Adjacency registry for one pipeline. Edges point from a parent (producer)
//! to a child (consumer), so `parents_of` and `children_of` are the incoming
//! and outgoing neighbours of the same `petgraph` map and are inverses of
//! each other by construction. Parallel connections between the same pair of
//! nodes collapse into one edge.
//!
//! Cycles are never rejected when an edge is added. They are detected when a
//! walk over the registry would otherwise loop forever.

pub mod analysis;

pub use analysis::{find_cycle_groups, CycleGroup};

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// Handle of a node inside its pipeline's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Arena index of this node
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Walk direction over the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Towards producers (`parents_of`)
    Parents,
    /// Towards consumers (`children_of`)
    Children,
}

impl Walk {
    fn direction(self) -> Direction {
        match self {
            Walk::Parents => Direction::Incoming,
            Walk::Children => Direction::Outgoing,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path
    Open,
    /// Fully explored
    Closed,
}

/// Parent/child registry keyed by node handle
#[derive(Debug, Clone, Default)]
pub struct GraphRegistry {
    graph: DiGraphMap<NodeId, ()>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId) {
        self.graph.add_node(id);
    }

    /// Record `parent -> child`; returns false if the edge already existed
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> bool {
        self.graph.add_edge(parent, child, ()).is_none()
    }

    /// Forget `parent -> child`; returns false if there was no such edge
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId) -> bool {
        self.graph.remove_edge(parent, child).is_some()
    }

    pub fn contains_edge(&self, parent: NodeId, child: NodeId) -> bool {
        self.graph.contains_edge(parent, child)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct parents, sorted by handle
    pub fn parents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbours(id, Walk::Parents)
    }

    /// Direct children, sorted by handle
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbours(id, Walk::Children)
    }

    fn neighbours(&self, id: NodeId, walk: Walk) -> Vec<NodeId> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut out: Vec<NodeId> = self.graph.neighbors_directed(id, walk.direction()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// All `(parent, child)` edges
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.graph.all_edges().map(|(p, c, _)| (p, c))
    }

    /// Depth-first walk from `start`, calling `visit` once per reachable node
    /// (excluding `start` itself) in discovery order.
    ///
    /// Reconverging paths (diamonds) are fine. Reaching a node that is still
    /// on the current path, `start` included, fails with `CycleDetected`
    /// naming that node. Nodes discovered before the cycle was reached have
    /// already been visited.
    pub fn walk<F>(&self, start: NodeId, walk: Walk, mut visit: F) -> Result<()>
    where
        F: FnMut(NodeId) -> Result<()>,
    {
        if !self.graph.contains_node(start) {
            return Ok(());
        }

        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

        marks.insert(start, Mark::Open);
        stack.push((start, self.successors(start, walk)));

        while let Some((node, pending)) = stack.last_mut() {
            let Some(next) = pending.pop() else {
                marks.insert(*node, Mark::Closed);
                stack.pop();
                continue;
            };

            match marks.get(&next).copied() {
                Some(Mark::Open) => return Err(PipelineError::CycleDetected { node: next }),
                Some(Mark::Closed) => continue,
                None => {
                    visit(next)?;
                    marks.insert(next, Mark::Open);
                    stack.push((next, self.successors(next, walk)));
                }
            }
        }
        Ok(())
    }

    /// Neighbours in reverse handle order, so popping yields ascending handles
    fn successors(&self, id: NodeId, walk: Walk) -> Vec<NodeId> {
        let mut out = self.neighbours(id, walk);
        out.reverse();
        out
    }

    /// Fails with `CycleDetected` if a cycle is reachable from `start` in the
    /// given direction
    pub fn ensure_acyclic(&self, start: NodeId, walk: Walk) -> Result<()> {
        self.walk(start, walk, |_| Ok(()))
    }

    /// Every node reachable from `start`, in discovery order
    pub fn reachable(&self, start: NodeId, walk: Walk) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.walk(start, walk, |id| {
            out.push(id);
            Ok(())
        })?;
        Ok(out)
    }

    pub(crate) fn inner(&self) -> &DiGraphMap<NodeId, ()> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId::from_index).collect()
    }

    fn registry(n: usize, edges: &[(usize, usize)]) -> GraphRegistry {
        let mut reg = GraphRegistry::new();
        for id in ids(n) {
            reg.add_node(id);
        }
        for &(p, c) in edges {
            reg.add_edge(NodeId::from_index(p), NodeId::from_index(c));
        }
        reg
    }

    #[test]
    fn test_parents_and_children_are_inverse() {
        let reg = registry(3, &[(0, 2), (1, 2)]);
        let n = ids(3);
        assert_eq!(reg.parents_of(n[2]), vec![n[0], n[1]]);
        assert_eq!(reg.children_of(n[0]), vec![n[2]]);
        for (p, c) in reg.edges() {
            assert!(reg.parents_of(c).contains(&p));
            assert!(reg.children_of(p).contains(&c));
        }
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut reg = registry(2, &[(0, 1)]);
        let n = ids(2);
        assert!(!reg.add_edge(n[0], n[1]));
        assert_eq!(reg.edge_count(), 1);
        assert!(reg.remove_edge(n[0], n[1]));
        assert!(!reg.remove_edge(n[0], n[1]));
        assert!(reg.parents_of(n[1]).is_empty());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let reg = registry(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let n = ids(4);
        assert!(reg.ensure_acyclic(n[3], Walk::Parents).is_ok());
        assert!(reg.ensure_acyclic(n[0], Walk::Children).is_ok());
        assert_eq!(reg.reachable(n[0], Walk::Children).unwrap(), vec![n[1], n[3], n[2]]);
    }

    #[test]
    fn test_self_loop_detected() {
        let reg = registry(1, &[(0, 0)]);
        let n = ids(1);
        let err = reg.ensure_acyclic(n[0], Walk::Children).unwrap_err();
        assert!(matches!(err, PipelineError::CycleDetected { node } if node == n[0]));
    }

    #[test]
    fn test_cycle_reachable_from_start() {
        // 0 -> 1 -> 2 -> 1
        let reg = registry(3, &[(0, 1), (1, 2), (2, 1)]);
        let n = ids(3);
        assert!(reg.ensure_acyclic(n[0], Walk::Children).unwrap_err().is_cycle());
        assert!(reg.ensure_acyclic(n[2], Walk::Parents).unwrap_err().is_cycle());
        // node 0 has no parents, so nothing cyclic upstream of it
        assert!(reg.ensure_acyclic(n[0], Walk::Parents).is_ok());
    }

    #[test]
    fn test_walk_unknown_node_is_empty() {
        let reg = GraphRegistry::new();
        assert!(reg.reachable(NodeId::from_index(7), Walk::Children).unwrap().is_empty());
    }
}
