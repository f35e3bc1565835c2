use serde::Serialize;
use std::collections::BTreeMap;

use graph::{EntityType, KnowledgeGraph, RelationCategory, RelationType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entities_by_type: BTreeMap<EntityType, usize>,
    pub relationships_by_type: BTreeMap<RelationType, usize>,
    pub relationships_by_category: BTreeMap<RelationCategory, usize>,
    /// Relationships over possible directed pairs.
    pub density: f64,
    pub average_degree: f64,
    pub isolated_entities: usize,
}

pub fn statistics(kg: &KnowledgeGraph) -> GraphStatistics {
    let n = kg.entity_count();
    let r = kg.relationship_count();

    let mut entities_by_type = BTreeMap::new();
    let mut isolated_entities = 0;
    for entity in kg.entities() {
        *entities_by_type.entry(entity.entity_type).or_insert(0) += 1;
        if kg.degree(entity.id) == 0 {
            isolated_entities += 1;
        }
    }

    let mut relationships_by_type = BTreeMap::new();
    let mut relationships_by_category = BTreeMap::new();
    for rel in kg.relationships() {
        *relationships_by_type.entry(rel.relation_type).or_insert(0) += 1;
        *relationships_by_category.entry(rel.relation_type.category()).or_insert(0) += 1;
    }

    let density = if n > 1 { r as f64 / (n * (n - 1)) as f64 } else { 0.0 };
    let average_degree = if n > 0 { 2.0 * r as f64 / n as f64 } else { 0.0 };

    GraphStatistics {
        entity_count: n,
        relationship_count: r,
        entities_by_type,
        relationships_by_type,
        relationships_by_category,
        density,
        average_degree,
        isolated_entities,
    }
}
