use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};

use graph::{EntityId, KnowledgeGraph, RelationType, RelationshipId};

#[derive(Debug, Clone, Copy)]
pub struct EdgeData {
    pub relationship: RelationshipId,
    pub relation_type: RelationType,
    pub weight: f64,
}

/// The knowledge graph as a petgraph `DiGraph`, nodes in entity-id order.
#[derive(Debug, Clone)]
pub struct Projection {
    graph: DiGraph<EntityId, EdgeData>,
    nodes: HashMap<EntityId, NodeIndex>,
}

impl Projection {
    /// Project every entity, and the relationships whose type is in
    /// `relation_types` (all of them when `None`).
    pub fn build(kg: &KnowledgeGraph, relation_types: Option<&[RelationType]>) -> Self {
        let mut graph = DiGraph::with_capacity(kg.entity_count(), kg.relationship_count());
        let mut nodes = HashMap::with_capacity(kg.entity_count());

        for entity in kg.entities() {
            nodes.insert(entity.id, graph.add_node(entity.id));
        }

        for rel in kg.relationships() {
            if relation_types.is_some_and(|types| !types.contains(&rel.relation_type)) {
                continue;
            }
            let (Some(&source), Some(&target)) = (nodes.get(&rel.source), nodes.get(&rel.target))
            else {
                continue;
            };
            graph.add_edge(
                source,
                target,
                EdgeData {
                    relationship: rel.id,
                    relation_type: rel.relation_type,
                    weight: rel.strength,
                },
            );
        }

        Self { graph, nodes }
    }

    pub fn graph(&self) -> &DiGraph<EntityId, EdgeData> {
        &self.graph
    }

    pub fn node(&self, id: EntityId) -> Option<NodeIndex> {
        self.nodes.get(&id).copied()
    }

    pub fn entity(&self, node: NodeIndex) -> EntityId {
        self.graph[node]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Symmetric weighted adjacency, indexed by node position. A self-loop
    /// contributes twice its weight to its node.
    pub fn undirected_adjacency(&self) -> Vec<BTreeMap<usize, f64>> {
        let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); self.graph.node_count()];
        for edge in self.graph.edge_references() {
            let (u, v) = (edge.source().index(), edge.target().index());
            let w = edge.weight().weight;
            if u == v {
                *adj[u].entry(u).or_insert(0.0) += 2.0 * w;
            } else {
                *adj[u].entry(v).or_insert(0.0) += w;
                *adj[v].entry(u).or_insert(0.0) += w;
            }
        }
        adj
    }
}
