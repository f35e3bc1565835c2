//! Shortest paths and bounded neighborhoods, both breadth-first.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};

use graph::{
    Direction, EntityId, EntityType, GraphError, KnowledgeGraph, RelationType, Relationship,
    RelationshipId,
};

#[derive(Debug, Clone, Default)]
pub struct PathQuery {
    pub direction: Direction,
    pub relation_types: Option<Vec<RelationType>>,
}

impl PathQuery {
    fn allows(&self, rel: &Relationship) -> bool {
        self.relation_types
            .as_ref()
            .is_none_or(|types| types.contains(&rel.relation_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphPath {
    pub entities: Vec<EntityId>,
    pub relationships: Vec<RelationshipId>,
    pub length: usize,
}

/// Fewest-hop path from `from` to `to`, or `None` when there is none or
/// either id is unknown.
pub fn shortest_path(
    kg: &KnowledgeGraph,
    from: EntityId,
    to: EntityId,
    query: &PathQuery,
) -> Option<GraphPath> {
    if !kg.contains_entity(from) || !kg.contains_entity(to) {
        return None;
    }
    if from == to {
        return Some(GraphPath {
            entities: vec![from],
            relationships: Vec::new(),
            length: 0,
        });
    }

    // entity -> (previous entity, relationship used to reach it)
    let mut came_from: HashMap<EntityId, (EntityId, RelationshipId)> = HashMap::new();
    let mut visited = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for rel in kg.relationships_of(current, query.direction) {
            if !query.allows(rel) {
                continue;
            }
            let Some(next) = step(rel, current, query.direction) else {
                continue;
            };
            if !visited.insert(next) {
                continue;
            }
            came_from.insert(next, (current, rel.id));
            if next == to {
                return Some(unwind(&came_from, from, to));
            }
            queue.push_back(next);
        }
    }

    None
}

/// The entity reached by following `rel` from `current` in `direction`.
fn step(rel: &Relationship, current: EntityId, direction: Direction) -> Option<EntityId> {
    match direction {
        Direction::Outgoing if rel.source == current => Some(rel.target),
        Direction::Incoming if rel.target == current => Some(rel.source),
        Direction::Both => rel.other_end(current),
        _ => None,
    }
}

fn unwind(
    came_from: &HashMap<EntityId, (EntityId, RelationshipId)>,
    from: EntityId,
    to: EntityId,
) -> GraphPath {
    let mut entities = vec![to];
    let mut relationships = Vec::new();
    let mut cursor = to;
    while cursor != from {
        let Some(&(prev, rel)) = came_from.get(&cursor) else {
            break;
        };
        relationships.push(rel);
        entities.push(prev);
        cursor = prev;
    }
    entities.reverse();
    relationships.reverse();
    GraphPath {
        length: relationships.len(),
        entities,
        relationships,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborEntity {
    pub entity_id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub hops: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighborhood {
    pub center: EntityId,
    pub max_hops: usize,
    pub entities: Vec<NeighborEntity>,
    pub relationships: Vec<RelationshipId>,
}

/// Every entity within `max_hops` of `start` in either direction, with its
/// hop distance, and the relationships that were followed.
pub fn neighborhood(
    kg: &KnowledgeGraph,
    start: EntityId,
    max_hops: usize,
    relation_types: Option<&[RelationType]>,
) -> Result<Neighborhood, GraphError> {
    kg.get_entity(start)?;

    let allowed = |rel: &Relationship| {
        relation_types.is_none_or(|types| types.contains(&rel.relation_type))
    };
    let mut hops: HashMap<EntityId, usize> = HashMap::from([(start, 0)]);
    let mut followed: BTreeSet<RelationshipId> = BTreeSet::new();
    let mut frontier = vec![start];

    for depth in 1..=max_hops {
        let mut next_frontier = Vec::new();
        for current in frontier {
            for rel in kg.relationships_of(current, Direction::Both) {
                if !allowed(rel) {
                    continue;
                }
                let Some(other) = rel.other_end(current) else {
                    continue;
                };
                followed.insert(rel.id);
                if !hops.contains_key(&other) {
                    hops.insert(other, depth);
                    next_frontier.push(other);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    let mut entities: Vec<NeighborEntity> = hops
        .into_iter()
        .filter(|(id, _)| *id != start)
        .filter_map(|(id, hops)| {
            kg.get_entity(id).ok().map(|e| NeighborEntity {
                entity_id: id,
                name: e.name.clone(),
                entity_type: e.entity_type,
                hops,
            })
        })
        .collect();
    entities.sort_by(|a, b| {
        a.hops
            .cmp(&b.hops)
            .then_with(|| a.name.cmp(&b.name))
            .then(a.entity_id.cmp(&b.entity_id))
    });

    Ok(Neighborhood {
        center: start,
        max_hops,
        entities,
        relationships: followed.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{NewEntity, NewRelationship};

    struct Fixture {
        kg: KnowledgeGraph,
        a: EntityId,
        b: EntityId,
        c: EntityId,
        d: EntityId,
    }

    /// A -> B <- C, and D on its own.
    fn fixture() -> Fixture {
        let mut kg = KnowledgeGraph::new("novel");
        let a = kg.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        let b = kg.add_entity(NewEntity::new("B", EntityType::Location)).unwrap();
        let c = kg.add_entity(NewEntity::new("C", EntityType::Character)).unwrap();
        let d = kg.add_entity(NewEntity::new("D", EntityType::Character)).unwrap();
        kg.add_relationship(NewRelationship::new(a, b, RelationType::LivesIn)).unwrap();
        kg.add_relationship(NewRelationship::new(c, b, RelationType::TravelsTo)).unwrap();
        Fixture { kg, a, b, c, d }
    }

    #[test]
    fn test_path_through_middle() {
        let f = fixture();
        let path = shortest_path(&f.kg, f.a, f.c, &PathQuery::default()).unwrap();
        assert_eq!(path.entities, vec![f.a, f.b, f.c]);
        assert_eq!(path.length, 2);
        assert_eq!(path.relationships.len(), 2);
    }

    #[test]
    fn test_disconnected_and_unknown() {
        let f = fixture();
        assert!(shortest_path(&f.kg, f.a, f.d, &PathQuery::default()).is_none());
        assert!(shortest_path(&f.kg, f.a, EntityId::new(), &PathQuery::default()).is_none());
        let same = shortest_path(&f.kg, f.d, f.d, &PathQuery::default()).unwrap();
        assert_eq!(same.length, 0);
    }

    #[test]
    fn test_direction_and_type_filters() {
        let f = fixture();
        let outgoing = PathQuery {
            direction: Direction::Outgoing,
            ..Default::default()
        };
        assert!(shortest_path(&f.kg, f.a, f.b, &outgoing).is_some());
        assert!(shortest_path(&f.kg, f.a, f.c, &outgoing).is_none());

        let lives_only = PathQuery {
            relation_types: Some(vec![RelationType::LivesIn]),
            ..Default::default()
        };
        assert!(shortest_path(&f.kg, f.a, f.c, &lives_only).is_none());
    }

    #[test]
    fn test_neighborhood_hops() {
        let f = fixture();
        let one = neighborhood(&f.kg, f.a, 1, None).unwrap();
        assert_eq!(one.entities.len(), 1);
        assert_eq!(one.entities[0].entity_id, f.b);

        let two = neighborhood(&f.kg, f.a, 2, None).unwrap();
        let found: Vec<(EntityId, usize)> =
            two.entities.iter().map(|n| (n.entity_id, n.hops)).collect();
        assert_eq!(found, vec![(f.b, 1), (f.c, 2)]);
        assert_eq!(two.relationships.len(), 2);

        let filtered = neighborhood(&f.kg, f.a, 2, Some(&[RelationType::LivesIn])).unwrap();
        assert_eq!(filtered.entities.len(), 1);

        let err = neighborhood(&f.kg, EntityId::new(), 2, None).unwrap_err();
        assert!(err.is_not_found());
    }
}
