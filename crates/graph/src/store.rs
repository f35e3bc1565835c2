use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::attributes::Attributes;
use crate::error::{GraphError, Result};
use crate::model::{
    Direction, Entity, EntityFilter, EntityId, EntityType, EntityUpdate, NewEntity, NewRelationship,
    Relationship, RelationshipFilter, RelationshipId, RelationshipUpdate,
};
use crate::names::normalize_name;
use crate::relation::{RelationType, content_key};

/// Summary of a project's graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphMetadata {
    pub project_id: String,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub outgoing: usize,
    pub incoming: usize,
    pub distinct_neighbors: usize,
    pub by_relation_type: BTreeMap<RelationType, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityDetails {
    pub entity: Entity,
    pub connections: ConnectionStats,
}

/// In-memory directed multigraph of entities and relationships for one
/// project.
///
/// Relationships always reference existing entities: adding one with a
/// missing endpoint fails without writing, and deleting an entity removes
/// every relationship that touches it.
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    project_id: String,
    entities: BTreeMap<EntityId, Entity>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    outgoing: HashMap<EntityId, BTreeSet<RelationshipId>>,
    incoming: HashMap<EntityId, BTreeSet<RelationshipId>>,
    content_index: HashMap<String, RelationshipId>,
    updated_at: DateTime<Utc>,
}

impl PartialEq for KnowledgeGraph {
    fn eq(&self, other: &Self) -> bool {
        self.project_id == other.project_id
            && self.updated_at == other.updated_at
            && self.entities == other.entities
            && self.relationships == other.relationships
    }
}

fn check_unit(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GraphError::validation(format!("{field} must be within [0, 1], got {value}")))
    }
}

fn check_valence(value: f64) -> Result<()> {
    if (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GraphError::validation(format!("valence must be within [-1, 1], got {value}")))
    }
}

impl KnowledgeGraph {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entities: BTreeMap::new(),
            relationships: BTreeMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            content_index: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a graph from already-validated parts, recomputing indexes.
    pub(crate) fn from_parts(
        project_id: String,
        updated_at: DateTime<Utc>,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> Result<Self> {
        let mut graph = Self::new(project_id);
        graph.updated_at = updated_at;

        for entity in entities {
            let id = entity.id;
            if graph.entities.insert(id, entity).is_some() {
                return Err(GraphError::validation(format!("duplicate entity id {id}")));
            }
        }

        for rel in relationships {
            for endpoint in [rel.source, rel.target] {
                if !graph.entities.contains_key(&endpoint) {
                    return Err(GraphError::validation(format!(
                        "relationship {} references missing entity {}",
                        rel.id, endpoint
                    )));
                }
            }
            if graph.relationships.contains_key(&rel.id) {
                return Err(GraphError::validation(format!("duplicate relationship id {}", rel.id)));
            }
            if graph.content_index.contains_key(&rel.content_key) {
                return Err(GraphError::validation(format!(
                    "duplicate relationship content key {}",
                    rel.content_key
                )));
            }
            graph.index_relationship(rel);
        }

        Ok(graph)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn metadata(&self) -> GraphMetadata {
        GraphMetadata {
            project_id: self.project_id.clone(),
            entity_count: self.entities.len(),
            relationship_count: self.relationships.len(),
            last_updated: self.updated_at,
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // ---- entities -------------------------------------------------------

    pub fn add_entity(&mut self, new: NewEntity) -> Result<EntityId> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(GraphError::validation("entity name must not be empty"));
        }
        check_unit("confidence", new.confidence)?;
        if let Some(existing) = self.find_by_name(Some(new.entity_type), &name) {
            return Err(GraphError::validation(format!(
                "{} named {:?} already exists ({})",
                new.entity_type, existing.name, existing.id
            )));
        }

        let now = Utc::now();
        let mut attributes = Attributes::for_type(new.entity_type);
        attributes.absorb(&new.attributes);

        let mut entity = Entity {
            id: EntityId::new(),
            name,
            entity_type: new.entity_type,
            description: new.description.trim().to_string(),
            aliases: Vec::new(),
            attributes,
            appearances: Vec::new(),
            first_appearance: None,
            mention_count: 0,
            confidence: new.confidence,
            verified: new.verified,
            annotations: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        for alias in &new.aliases {
            entity.add_alias(alias);
        }
        if let Some(scene) = &new.scene {
            entity.record_appearance(scene);
        }

        let id = entity.id;
        debug!(
            entity_id = %id,
            name = %entity.name,
            entity_type = %entity.entity_type,
            "Entity added"
        );
        self.entities.insert(id, entity);
        self.touch();
        Ok(id)
    }

    pub fn get_entity(&self, id: EntityId) -> Result<&Entity> {
        self.entities.get(&id).ok_or(GraphError::EntityNotFound(id))
    }

    /// Apply an arbitrary edit to one entity. The edit is rolled back with a
    /// validation error if it changes the id or type, lowers the mention
    /// count, or leaves the aliases with case-insensitive duplicates.
    pub fn modify_entity<T>(
        &mut self,
        id: EntityId,
        f: impl FnOnce(&mut Entity) -> T,
    ) -> Result<T> {
        let entity = self.entities.get_mut(&id).ok_or(GraphError::EntityNotFound(id))?;
        let before = entity.clone();
        let out = f(entity);

        let mut seen = BTreeSet::new();
        let aliases_unique = entity.aliases.iter().all(|a| seen.insert(a.to_lowercase()));
        let violation = if entity.id != before.id {
            Some("entity id is immutable")
        } else if entity.entity_type != before.entity_type {
            Some("entity type cannot be changed by an edit")
        } else if entity.mention_count < before.mention_count {
            Some("mention count never decreases")
        } else if !aliases_unique {
            Some("aliases must be unique ignoring case")
        } else {
            None
        };

        if let Some(msg) = violation {
            *entity = before;
            return Err(GraphError::validation(msg));
        }

        if *entity != before {
            entity.updated_at = Utc::now();
            self.touch();
        }
        Ok(out)
    }

    pub fn update_entity(&mut self, id: EntityId, update: EntityUpdate) -> Result<&Entity> {
        let current = self.get_entity(id)?;
        let entity_type = current.entity_type;

        if let Some(name) = &update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(GraphError::validation("entity name must not be empty"));
            }
            if let Some(other) = self.find_by_name(Some(entity_type), name) {
                if other.id != id {
                    return Err(GraphError::validation(format!(
                        "{} named {:?} already exists ({})",
                        entity_type, other.name, other.id
                    )));
                }
            }
        }
        if let Some(attributes) = &update.attributes {
            if !attributes.matches(entity_type) {
                return Err(GraphError::validation(format!(
                    "attribute schema does not match entity type {entity_type}"
                )));
            }
        }
        if let Some(confidence) = update.confidence {
            check_unit("confidence", confidence)?;
        }

        self.modify_entity(id, |e| {
            if let Some(name) = update.name {
                e.name = name.trim().to_string();
            }
            if let Some(description) = update.description {
                e.description = description;
            }
            if let Some(aliases) = update.aliases {
                e.aliases.clear();
                for alias in &aliases {
                    e.add_alias(alias);
                }
            }
            if let Some(attributes) = update.attributes {
                e.attributes = attributes;
            }
            if let Some(confidence) = update.confidence {
                e.confidence = confidence;
            }
            if let Some(verified) = update.verified {
                e.verified = verified;
            }
        })?;

        self.get_entity(id)
    }

    /// Delete an entity together with every relationship touching it.
    /// Returns the ids of the removed relationships.
    pub fn delete_entity(&mut self, id: EntityId) -> Result<Vec<RelationshipId>> {
        if !self.entities.contains_key(&id) {
            return Err(GraphError::EntityNotFound(id));
        }

        let mut touching: BTreeSet<RelationshipId> = BTreeSet::new();
        if let Some(out) = self.outgoing.get(&id) {
            touching.extend(out.iter().copied());
        }
        if let Some(inc) = self.incoming.get(&id) {
            touching.extend(inc.iter().copied());
        }

        for rel_id in &touching {
            self.unindex_relationship(*rel_id);
        }
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        self.entities.remove(&id);
        self.touch();

        debug!(entity_id = %id, removed_relationships = touching.len(), "Entity deleted");
        Ok(touching.into_iter().collect())
    }

    pub fn list_entities(&self, filter: &EntityFilter) -> Vec<&Entity> {
        let needle = filter
            .name_contains
            .as_deref()
            .map(normalize_name)
            .filter(|n| !n.is_empty());

        let mut out: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| filter.entity_type.is_none_or(|t| e.entity_type == t))
            .filter(|e| filter.min_mentions.is_none_or(|m| e.mention_count >= m))
            .filter(|e| !filter.verified_only || e.verified)
            .filter(|e| match &needle {
                Some(n) => {
                    normalize_name(&e.name).contains(n.as_str())
                        || e.aliases.iter().any(|a| normalize_name(a).contains(n.as_str()))
                }
                None => true,
            })
            .collect();

        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        out
    }

    /// Look up an entity by normalized name or alias, optionally restricted
    /// to one type.
    pub fn find_by_name(&self, entity_type: Option<EntityType>, name: &str) -> Option<&Entity> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return None;
        }

        self.entities
            .values()
            .filter(|e| entity_type.is_none_or(|t| e.entity_type == t))
            .find(|e| answers_to(e, &wanted))
    }

    /// Every entity answering to `name` by normalized name or alias,
    /// ordered by type and then id.
    pub fn entities_named(&self, name: &str) -> Vec<&Entity> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return Vec::new();
        }
        let mut found: Vec<&Entity> =
            self.entities.values().filter(|e| answers_to(e, &wanted)).collect();
        found.sort_by_key(|e| (e.entity_type, e.id));
        found
    }

    pub fn entity_details(&self, id: EntityId) -> Result<EntityDetails> {
        let entity = self.get_entity(id)?.clone();
        let mut stats = ConnectionStats::default();
        let mut neighbors = BTreeSet::new();

        for rel in self.relationships_of(id, Direction::Both) {
            if rel.source == id {
                stats.outgoing += 1;
            }
            if rel.target == id {
                stats.incoming += 1;
            }
            *stats.by_relation_type.entry(rel.relation_type).or_insert(0) += 1;
            if let Some(other) = rel.other_end(id) {
                if other != id {
                    neighbors.insert(other);
                }
            }
        }
        stats.distinct_neighbors = neighbors.len();

        Ok(EntityDetails {
            entity,
            connections: stats,
        })
    }

    // ---- relationships --------------------------------------------------

    pub fn add_relationship(&mut self, new: NewRelationship) -> Result<RelationshipId> {
        for endpoint in [new.source, new.target] {
            if !self.entities.contains_key(&endpoint) {
                return Err(GraphError::EntityNotFound(endpoint));
            }
        }
        check_unit("strength", new.strength)?;
        check_unit("confidence", new.confidence)?;
        check_valence(new.valence)?;

        let key = content_key(
            new.source,
            new.target,
            new.relation_type,
            new.scene.as_ref().map(|s| s.id.as_str()),
        );
        if let Some(existing) = self.content_index.get(&key) {
            return Err(GraphError::validation(format!(
                "relationship already recorded as {existing}"
            )));
        }

        let rel = Relationship {
            id: RelationshipId::new(),
            source: new.source,
            target: new.target,
            relation_type: new.relation_type,
            description: new.description.trim().to_string(),
            context: new
                .context
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            scenes: new.scene.into_iter().collect(),
            strength: new.strength,
            valence: new.valence,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            confidence: new.confidence,
            verified: new.verified,
            content_key: key,
            created_at: Utc::now(),
        };

        let id = rel.id;
        debug!(
            relationship_id = %id,
            source = %rel.source,
            target = %rel.target,
            relation = %rel.relation_type,
            "Relationship added"
        );
        self.index_relationship(rel);
        self.touch();
        Ok(id)
    }

    pub fn get_relationship(&self, id: RelationshipId) -> Result<&Relationship> {
        self.relationships
            .get(&id)
            .ok_or(GraphError::RelationshipNotFound(id))
    }

    pub fn find_relationship_by_key(&self, key: &str) -> Option<&Relationship> {
        self.content_index
            .get(key)
            .and_then(|id| self.relationships.get(id))
    }

    pub fn update_relationship(
        &mut self,
        id: RelationshipId,
        update: RelationshipUpdate,
    ) -> Result<&Relationship> {
        if let Some(strength) = update.strength {
            check_unit("strength", strength)?;
        }
        if let Some(confidence) = update.confidence {
            check_unit("confidence", confidence)?;
        }
        if let Some(valence) = update.valence {
            check_valence(valence)?;
        }

        let rel = self
            .relationships
            .get_mut(&id)
            .ok_or(GraphError::RelationshipNotFound(id))?;
        if let Some(description) = update.description {
            rel.description = description;
        }
        if let Some(strength) = update.strength {
            rel.strength = strength;
        }
        if let Some(valence) = update.valence {
            rel.valence = valence;
        }
        if let Some(confidence) = update.confidence {
            rel.confidence = confidence;
        }
        if let Some(verified) = update.verified {
            rel.verified = verified;
        }
        if update.valid_from.is_some() {
            rel.valid_from = update.valid_from;
        }
        if update.valid_until.is_some() {
            rel.valid_until = update.valid_until;
        }
        self.touch();
        self.get_relationship(id)
    }

    pub fn delete_relationship(&mut self, id: RelationshipId) -> Result<Relationship> {
        let rel = self
            .unindex_relationship(id)
            .ok_or(GraphError::RelationshipNotFound(id))?;
        self.touch();
        Ok(rel)
    }

    pub fn relationships_of(&self, id: EntityId, direction: Direction) -> Vec<&Relationship> {
        let mut ids: BTreeSet<RelationshipId> = BTreeSet::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            if let Some(out) = self.outgoing.get(&id) {
                ids.extend(out.iter().copied());
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            if let Some(inc) = self.incoming.get(&id) {
                ids.extend(inc.iter().copied());
            }
        }
        ids.iter().filter_map(|r| self.relationships.get(r)).collect()
    }

    pub fn neighbors(&self, id: EntityId, direction: Direction) -> BTreeSet<EntityId> {
        self.relationships_of(id, direction)
            .into_iter()
            .filter_map(|r| r.other_end(id))
            .filter(|other| *other != id)
            .collect()
    }

    pub fn degree(&self, id: EntityId) -> usize {
        let out = self.outgoing.get(&id).map_or(0, |s| s.len());
        out + self.incoming.get(&id).map_or(0, |s| s.len())
    }

    pub fn list_relationships(&self, filter: &RelationshipFilter) -> Vec<&Relationship> {
        let candidates: Vec<&Relationship> = match filter.entity {
            Some(id) => self.relationships_of(id, Direction::Both),
            None => self.relationships.values().collect(),
        };

        candidates
            .into_iter()
            .filter(|r| filter.relation_type.is_none_or(|t| r.relation_type == t))
            .filter(|r| filter.category.is_none_or(|c| r.relation_type.category() == c))
            .filter(|r| match &filter.scene_id {
                Some(scene) => r.scenes.iter().any(|s| &s.id == scene),
                None => true,
            })
            .collect()
    }

    /// Highest scene sequence recorded anywhere in the graph.
    pub fn latest_scene(&self) -> Option<u32> {
        let from_entities = self
            .entities
            .values()
            .filter_map(|e| e.last_appearance().map(|s| s.sequence));
        let from_relationships = self
            .relationships
            .values()
            .flat_map(|r| r.scenes.iter().map(|s| s.sequence));
        from_entities.chain(from_relationships).max()
    }

    fn index_relationship(&mut self, rel: Relationship) {
        self.outgoing.entry(rel.source).or_default().insert(rel.id);
        self.incoming.entry(rel.target).or_default().insert(rel.id);
        self.content_index.insert(rel.content_key.clone(), rel.id);
        self.relationships.insert(rel.id, rel);
    }

    fn unindex_relationship(&mut self, id: RelationshipId) -> Option<Relationship> {
        let rel = self.relationships.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&rel.source) {
            out.remove(&id);
        }
        if let Some(inc) = self.incoming.get_mut(&rel.target) {
            inc.remove(&id);
        }
        self.content_index.remove(&rel.content_key);
        Some(rel)
    }
}

fn answers_to(entity: &Entity, normalized: &str) -> bool {
    normalize_name(&entity.name) == normalized
        || entity.aliases.iter().any(|a| normalize_name(a) == normalized)
}
