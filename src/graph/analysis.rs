//! Graph Analysis
//!
//! On-demand cycle diagnostics over a registry. Nothing in the evaluation
//! path calls this; wiring stays lazy and cycles still surface as
//! `CycleDetected` from evaluation or invalidation walks.

use petgraph::algo::kosaraju_scc;
use serde::{Deserialize, Serialize};

use super::{GraphRegistry, NodeId};

/// A strongly connected component that forms a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleGroup {
    /// Members, sorted by handle
    pub members: Vec<NodeId>,
    /// Single node wired to itself
    pub is_self_referential: bool,
}

impl CycleGroup {
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.binary_search(&id).is_ok()
    }
}

/// All cycles in the registry: SCCs with more than one member, plus self-loops.
/// Groups are ordered by their smallest member.
pub fn find_cycle_groups(registry: &GraphRegistry) -> Vec<CycleGroup> {
    let graph = registry.inner();
    let mut groups: Vec<CycleGroup> = kosaraju_scc(graph)
        .into_iter()
        .filter_map(|mut members| {
            let is_self_referential =
                members.len() == 1 && graph.contains_edge(members[0], members[0]);
            if members.len() > 1 || is_self_referential {
                members.sort();
                Some(CycleGroup {
                    members,
                    is_self_referential,
                })
            } else {
                None
            }
        })
        .collect();

    groups.sort_by_key(|g| g.members[0]);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: usize) -> NodeId {
        NodeId::from_index(i)
    }

    #[test]
    fn test_acyclic_has_no_groups() {
        let mut reg = GraphRegistry::new();
        reg.add_edge(id(0), id(1));
        reg.add_edge(id(1), id(2));
        reg.add_edge(id(0), id(2));
        assert!(find_cycle_groups(&reg).is_empty());
    }

    #[test]
    fn test_groups_and_self_loops() {
        let mut reg = GraphRegistry::new();
        reg.add_edge(id(0), id(1));
        reg.add_edge(id(1), id(2));
        reg.add_edge(id(2), id(1));
        reg.add_edge(id(3), id(3));

        let groups = find_cycle_groups(&reg);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![id(1), id(2)]);
        assert!(!groups[0].is_self_referential);
        assert!(groups[0].contains(id(2)));
        assert!(!groups[0].contains(id(0)));
        assert_eq!(groups[1].members, vec![id(3)]);
        assert!(groups[1].is_self_referential);
    }
}
