use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use graph::{EntityId, KnowledgeGraph, RelationType};

use crate::projection::Projection;

const MAX_PASSES: usize = 100;
const MAX_LEVELS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityMember {
    pub entity_id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Community {
    pub id: usize,
    pub size: usize,
    pub members: Vec<CommunityMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityDetection {
    pub communities: Vec<Community>,
    pub modularity: f64,
    pub levels: usize,
}

/// Louvain community detection over an undirected weighted graph given as
/// a symmetric adjacency list.
pub struct LouvainDetector {
    adjacency: Vec<BTreeMap<usize, f64>>,
}

impl LouvainDetector {
    pub fn new(adjacency: Vec<BTreeMap<usize, f64>>) -> Self {
        Self { adjacency }
    }

    /// Run Louvain community detection
    /// Returns: node index -> community id, and the number of levels run.
    pub fn detect_communities(&self) -> (Vec<usize>, usize) {
        let n = self.adjacency.len();
        let mut membership: Vec<usize> = (0..n).collect();
        let total: f64 = self.adjacency.iter().flat_map(|a| a.values()).sum();
        if n == 0 || total <= 0.0 {
            return (membership, 0);
        }

        let mut adjacency = self.adjacency.clone();
        let mut levels = 0;

        while levels < MAX_LEVELS {
            let (assignment, moved) = local_moving(&adjacency, total);
            if !moved {
                break;
            }
            levels += 1;

            let (assignment, count) = renumber(&assignment);
            for m in membership.iter_mut() {
                *m = assignment[*m];
            }
            if count == adjacency.len() {
                break;
            }
            adjacency = aggregate(&adjacency, &assignment, count);
        }

        let (membership, count) = renumber(&membership);
        debug!(nodes = n, communities = count, levels, "Louvain finished");
        (membership, levels)
    }

    /// Newman modularity of a partition of this graph.
    pub fn modularity(&self, membership: &[usize]) -> f64 {
        let total: f64 = self.adjacency.iter().flat_map(|a| a.values()).sum();
        if total <= 0.0 {
            return 0.0;
        }

        let mut internal: BTreeMap<usize, f64> = BTreeMap::new();
        let mut degree: BTreeMap<usize, f64> = BTreeMap::new();
        for (i, neighbors) in self.adjacency.iter().enumerate() {
            for (&j, &w) in neighbors {
                *degree.entry(membership[i]).or_insert(0.0) += w;
                if membership[i] == membership[j] {
                    *internal.entry(membership[i]).or_insert(0.0) += w;
                }
            }
        }

        degree
            .iter()
            .map(|(c, &tot)| {
                internal.get(c).copied().unwrap_or(0.0) / total - (tot / total).powi(2)
            })
            .sum()
    }
}

fn degrees(adjacency: &[BTreeMap<usize, f64>]) -> Vec<f64> {
    adjacency.iter().map(|a| a.values().sum()).collect()
}

/// One phase of greedy node moves. Nodes are visited in index order and
/// candidate communities in id order, so the outcome is deterministic.
fn local_moving(adjacency: &[BTreeMap<usize, f64>], total: f64) -> (Vec<usize>, bool) {
    let n = adjacency.len();
    let k = degrees(adjacency);
    let mut community: Vec<usize> = (0..n).collect();
    let mut community_total = k.clone();
    let mut moved_any = false;

    for _ in 0..MAX_PASSES {
        let mut moved = false;

        for node in 0..n {
            let current = community[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&neighbor, &w) in &adjacency[node] {
                if neighbor != node {
                    *links.entry(community[neighbor]).or_insert(0.0) += w;
                }
            }

            community_total[current] -= k[node];
            let gain = |c: usize, w: f64| w - community_total[c] * k[node] / total;

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&c, &w) in &links {
                let g = gain(c, w);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            community_total[best] += k[node];
            if best != current {
                community[node] = best;
                moved = true;
                moved_any = true;
            }
        }

        if !moved {
            break;
        }
    }

    (community, moved_any)
}

/// Renumber communities to be contiguous (0, 1, 2, ...) in order of first
/// appearance.
fn renumber(assignment: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    let renumbered = assignment
        .iter()
        .map(|c| {
            let next = mapping.len();
            *mapping.entry(*c).or_insert(next)
        })
        .collect();
    (renumbered, mapping.len())
}

/// Collapse each community into a single node. Internal weight becomes a
/// self-loop so node degrees are preserved.
fn aggregate(
    adjacency: &[BTreeMap<usize, f64>],
    assignment: &[usize],
    count: usize,
) -> Vec<BTreeMap<usize, f64>> {
    let mut out: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
    for (i, neighbors) in adjacency.iter().enumerate() {
        for (&j, &w) in neighbors {
            *out[assignment[i]].entry(assignment[j]).or_insert(0.0) += w;
        }
    }
    out
}

/// Detect communities in the knowledge graph, optionally looking only at
/// some relation types. Entities without relationships end up alone.
pub fn detect(kg: &KnowledgeGraph, relation_types: Option<&[RelationType]>) -> CommunityDetection {
    let projection = Projection::build(kg, relation_types);
    let detector = LouvainDetector::new(projection.undirected_adjacency());
    let (membership, levels) = detector.detect_communities();
    let modularity = detector.modularity(&membership);

    let mut groups: BTreeMap<usize, Vec<CommunityMember>> = BTreeMap::new();
    for (node, &community) in membership.iter().enumerate() {
        let id = projection.entity(petgraph::graph::NodeIndex::new(node));
        let name = kg.get_entity(id).map(|e| e.name.clone()).unwrap_or_default();
        groups.entry(community).or_default().push(CommunityMember { entity_id: id, name });
    }

    let mut communities: Vec<Community> = groups
        .into_values()
        .map(|mut members| {
            members.sort_by(|a, b| a.name.cmp(&b.name).then(a.entity_id.cmp(&b.entity_id)));
            Community {
                id: 0,
                size: members.len(),
                members,
            }
        })
        .collect();
    communities.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then_with(|| a.members[0].entity_id.cmp(&b.members[0].entity_id))
    });
    for (i, community) in communities.iter_mut().enumerate() {
        community.id = i;
    }

    CommunityDetection {
        communities,
        modularity,
        levels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{EntityType, NewEntity, NewRelationship};

    fn clique(kg: &mut KnowledgeGraph, names: &[&str]) -> Vec<EntityId> {
        let ids: Vec<EntityId> = names
            .iter()
            .map(|n| kg.add_entity(NewEntity::new(*n, EntityType::Character)).unwrap())
            .collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let rel = NewRelationship::new(*a, *b, RelationType::FriendOf);
                kg.add_relationship(rel.strength(1.0)).unwrap();
            }
        }
        ids
    }

    #[test]
    fn test_two_cliques_with_bridge() {
        let mut kg = KnowledgeGraph::new("novel");
        let left = clique(&mut kg, &["A", "B", "C", "D"]);
        let right = clique(&mut kg, &["E", "F", "G", "H"]);
        let bridge = NewRelationship::new(left[0], right[0], RelationType::Knows);
        kg.add_relationship(bridge.strength(0.1)).unwrap();

        let result = detect(&kg, None);
        assert_eq!(result.communities.len(), 2);
        assert!(result.communities.iter().all(|c| c.size == 4));
        assert!(result.modularity > 0.4);

        let names: Vec<&str> =
            result.communities[0].members.iter().map(|m| m.name.as_str()).collect();
        assert!(names == ["A", "B", "C", "D"] || names == ["E", "F", "G", "H"]);
    }

    #[test]
    fn test_isolated_entities_are_singletons() {
        let mut kg = KnowledgeGraph::new("novel");
        clique(&mut kg, &["A", "B", "C"]);
        kg.add_entity(NewEntity::new("Loner", EntityType::Character)).unwrap();

        let result = detect(&kg, None);
        assert_eq!(result.communities.len(), 2);
        assert_eq!(result.communities[0].size, 3);
        assert_eq!(result.communities[1].members[0].name, "Loner");
        assert_eq!(result.communities[1].id, 1);
    }

    #[test]
    fn test_empty_and_edgeless_graphs() {
        let kg = KnowledgeGraph::new("novel");
        let result = detect(&kg, None);
        assert!(result.communities.is_empty());
        assert_eq!(result.modularity, 0.0);

        let mut kg = KnowledgeGraph::new("novel");
        kg.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        kg.add_entity(NewEntity::new("B", EntityType::Character)).unwrap();
        assert_eq!(detect(&kg, None).communities.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let mut kg = KnowledgeGraph::new("novel");
        let left = clique(&mut kg, &["A", "B", "C"]);
        let right = clique(&mut kg, &["D", "E", "F"]);
        kg.add_relationship(NewRelationship::new(left[2], right[1], RelationType::Knows)).unwrap();

        assert_eq!(detect(&kg, None), detect(&kg, None));
    }
}
