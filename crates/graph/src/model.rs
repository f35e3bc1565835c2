use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::attributes::{AttributeValue, Attributes};
use crate::error::GraphError;
use crate::relation::RelationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(pub Uuid);

impl RelationshipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RelationshipId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Object,
    Concept,
    Event,
    Organization,
    Theme,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        Self::Character,
        Self::Location,
        Self::Object,
        Self::Concept,
        Self::Event,
        Self::Organization,
        Self::Theme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Object => "object",
            Self::Concept => "concept",
            Self::Event => "event",
            Self::Organization => "organization",
            Self::Theme => "theme",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| GraphError::validation(format!("unknown entity type: {s:?}")))
    }
}

/// A scene and its position in the narrative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub sequence: u32,
}

impl SceneRef {
    pub fn new(id: impl Into<String>, sequence: u32) -> Self {
        Self {
            id: id.into(),
            sequence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

/// A note appended by an automated merge when it could not apply a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub description: String,
    pub aliases: Vec<String>,
    pub attributes: Attributes,
    /// Scenes the entity appears in, ordered by sequence.
    pub appearances: Vec<SceneRef>,
    pub first_appearance: Option<SceneRef>,
    pub mention_count: u32,
    pub confidence: f64,
    pub verified: bool,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// True when `alias` equals the name or any alias, ignoring case.
    pub fn has_alias(&self, alias: &str) -> bool {
        let alias = alias.trim().to_lowercase();
        self.name.to_lowercase() == alias || self.aliases.iter().any(|a| a.to_lowercase() == alias)
    }

    /// Add an alias unless it is empty or already known.
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || self.has_alias(alias) {
            return false;
        }
        self.aliases.push(alias.to_string());
        true
    }

    pub fn appears_in(&self, scene_id: &str) -> bool {
        self.appearances.iter().any(|s| s.id == scene_id)
    }

    /// Record an appearance in a scene. A scene already recorded is not
    /// counted twice.
    pub fn record_appearance(&mut self, scene: &SceneRef) -> bool {
        if self.appears_in(&scene.id) {
            return false;
        }

        let pos = self
            .appearances
            .partition_point(|s| s.sequence <= scene.sequence);
        self.appearances.insert(pos, scene.clone());
        self.mention_count = self.mention_count.saturating_add(1);

        let earlier = self
            .first_appearance
            .as_ref()
            .is_none_or(|first| scene.sequence < first.sequence);
        if earlier {
            self.first_appearance = Some(scene.clone());
        }
        true
    }

    pub fn last_appearance(&self) -> Option<&SceneRef> {
        self.appearances.last()
    }

    /// Where the entity sits on the story timeline: an explicit event
    /// sequence when present, otherwise its first appearance.
    pub fn narrative_position(&self) -> Option<u32> {
        self.attributes
            .event_sequence()
            .or_else(|| self.first_appearance.as_ref().map(|s| s.sequence))
    }

    pub fn annotate(&mut self, scene_id: Option<&str>, note: impl Into<String>) {
        self.annotations.push(Annotation {
            scene_id: scene_id.map(str::to_string),
            note: note.into(),
            created_at: Utc::now(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: EntityId,
    pub target: EntityId,
    pub relation_type: RelationType,
    pub description: String,
    pub context: Vec<String>,
    pub scenes: Vec<SceneRef>,
    pub strength: f64,
    pub valence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<SceneRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<SceneRef>,
    pub confidence: f64,
    pub verified: bool,
    pub content_key: String,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn touches(&self, id: EntityId) -> bool {
        self.source == id || self.target == id
    }

    pub fn other_end(&self, id: EntityId) -> Option<EntityId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

fn default_confidence() -> f64 {
    1.0
}

fn default_strength() -> f64 {
    0.5
}

/// Input for creating an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub scene: Option<SceneRef>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub verified: bool,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: String::new(),
            aliases: Vec::new(),
            attributes: BTreeMap::new(),
            scene: None,
            confidence: 1.0,
            verified: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn scene(mut self, scene: SceneRef) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }
}

/// Partial update of an entity. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub verified: Option<bool>,
}

/// Input for creating a relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source: EntityId,
    pub target: EntityId,
    pub relation_type: RelationType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub scene: Option<SceneRef>,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub valence: f64,
    #[serde(default)]
    pub valid_from: Option<SceneRef>,
    #[serde(default)]
    pub valid_until: Option<SceneRef>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub verified: bool,
}

impl NewRelationship {
    pub fn new(source: EntityId, target: EntityId, relation_type: RelationType) -> Self {
        Self {
            source,
            target,
            relation_type,
            description: String::new(),
            context: Vec::new(),
            scene: None,
            strength: 0.5,
            valence: 0.0,
            valid_from: None,
            valid_until: None,
            confidence: 1.0,
            verified: false,
        }
    }

    pub fn scene(mut self, scene: SceneRef) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn valence(mut self, valence: f64) -> Self {
        self.valence = valence;
        self
    }

    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub valid_from: Option<SceneRef>,
    #[serde(default)]
    pub valid_until: Option<SceneRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default, rename = "type")]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub min_mentions: Option<u32>,
    #[serde(default)]
    pub verified_only: bool,
    #[serde(default, rename = "q")]
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipFilter {
    #[serde(default)]
    pub entity: Option<EntityId>,
    #[serde(default, rename = "type")]
    pub relation_type: Option<RelationType>,
    #[serde(default)]
    pub category: Option<crate::relation::RelationCategory>,
    #[serde(default, rename = "scene")]
    pub scene_id: Option<String>,
}
