use serde::Serialize;
use std::collections::BTreeMap;

use graph::{
    Entity, EntityId, EntityType, GraphSnapshot, RelationType, Relationship, RelationshipId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

impl From<&Entity> for EntitySummary {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id,
            name: e.name.clone(),
            entity_type: e.entity_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityChange {
    pub id: EntityId,
    pub name: String,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipSummary {
    pub id: RelationshipId,
    pub source: EntityId,
    pub target: EntityId,
    pub relation_type: RelationType,
}

impl From<&Relationship> for RelationshipSummary {
    fn from(r: &Relationship) -> Self {
        Self {
            id: r.id,
            source: r.source,
            target: r.target,
            relation_type: r.relation_type,
        }
    }
}

/// What it takes to go from one graph state to another.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphDiff {
    pub entities_added: Vec<EntitySummary>,
    pub entities_removed: Vec<EntitySummary>,
    pub entities_changed: Vec<EntityChange>,
    pub relationships_added: Vec<RelationshipSummary>,
    pub relationships_removed: Vec<RelationshipSummary>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.entities_added.is_empty()
            && self.entities_removed.is_empty()
            && self.entities_changed.is_empty()
            && self.relationships_added.is_empty()
            && self.relationships_removed.is_empty()
    }
}

fn changed_fields(before: &Entity, after: &Entity) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if before.name != after.name {
        fields.push("name");
    }
    if before.entity_type != after.entity_type {
        fields.push("type");
    }
    if before.description != after.description {
        fields.push("description");
    }
    if before.aliases != after.aliases {
        fields.push("aliases");
    }
    if before.attributes != after.attributes {
        fields.push("attributes");
    }
    if before.appearances != after.appearances {
        fields.push("appearances");
    }
    if before.mention_count != after.mention_count {
        fields.push("mention_count");
    }
    if before.confidence != after.confidence {
        fields.push("confidence");
    }
    if before.verified != after.verified {
        fields.push("verified");
    }
    if before.annotations != after.annotations {
        fields.push("annotations");
    }
    fields
}

/// Compare two snapshots. Entities and relationships are matched by id.
pub fn diff_snapshots(from: &GraphSnapshot, to: &GraphSnapshot) -> GraphDiff {
    let before: BTreeMap<EntityId, &Entity> = from.entities.iter().map(|e| (e.id, e)).collect();
    let after: BTreeMap<EntityId, &Entity> = to.entities.iter().map(|e| (e.id, e)).collect();

    let mut diff = GraphDiff::default();
    for (id, entity) in &after {
        match before.get(id) {
            None => diff.entities_added.push((*entity).into()),
            Some(old) => {
                let fields = changed_fields(old, entity);
                if !fields.is_empty() {
                    diff.entities_changed.push(EntityChange {
                        id: *id,
                        name: entity.name.clone(),
                        fields,
                    });
                }
            }
        }
    }
    diff.entities_removed = before
        .iter()
        .filter(|(id, _)| !after.contains_key(id))
        .map(|(_, e)| (*e).into())
        .collect();

    let rels_before: BTreeMap<RelationshipId, &Relationship> =
        from.relationships.iter().map(|r| (r.id, r)).collect();
    let rels_after: BTreeMap<RelationshipId, &Relationship> =
        to.relationships.iter().map(|r| (r.id, r)).collect();
    diff.relationships_added = rels_after
        .iter()
        .filter(|(id, _)| !rels_before.contains_key(id))
        .map(|(_, r)| (*r).into())
        .collect();
    diff.relationships_removed = rels_before
        .iter()
        .filter(|(id, _)| !rels_after.contains_key(id))
        .map(|(_, r)| (*r).into())
        .collect();

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{EntityUpdate, KnowledgeGraph, NewEntity, NewRelationship};

    #[test]
    fn test_one_added_entity_one_removed_relationship() {
        let mut graph = KnowledgeGraph::new("novel");
        let a = graph.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        let b = graph.add_entity(NewEntity::new("B", EntityType::Character)).unwrap();
        let rel = graph.add_relationship(NewRelationship::new(a, b, RelationType::Knows)).unwrap();
        let before = graph.to_snapshot();

        let c = graph.add_entity(NewEntity::new("C", EntityType::Location)).unwrap();
        graph.delete_relationship(rel).unwrap();
        let after = graph.to_snapshot();

        let diff = diff_snapshots(&before, &after);
        assert_eq!(diff.entities_added.len(), 1);
        assert_eq!(diff.entities_added[0].id, c);
        assert_eq!(diff.relationships_removed.len(), 1);
        assert_eq!(diff.relationships_removed[0].id, rel);
        assert!(diff.entities_removed.is_empty());
        assert!(diff.entities_changed.is_empty());
        assert!(diff.relationships_added.is_empty());

        let reverse = diff_snapshots(&after, &before);
        assert_eq!(reverse.entities_removed[0].id, c);
        assert_eq!(reverse.relationships_added[0].id, rel);
    }

    #[test]
    fn test_changed_fields_are_named() {
        let mut graph = KnowledgeGraph::new("novel");
        let a = graph.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        let before = graph.to_snapshot();

        graph
            .update_entity(
                a,
                EntityUpdate {
                    description: Some("a changed man".into()),
                    verified: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        let diff = diff_snapshots(&before, &graph.to_snapshot());
        assert_eq!(diff.entities_changed.len(), 1);
        assert_eq!(diff.entities_changed[0].fields, vec!["description", "verified"]);
    }

    #[test]
    fn test_identical_snapshots() {
        let mut graph = KnowledgeGraph::new("novel");
        graph.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        let snap = graph.to_snapshot();
        assert!(diff_snapshots(&snap, &snap).is_empty());
    }
}
