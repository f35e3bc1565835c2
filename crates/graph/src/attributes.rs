//! Per-type attribute schemas with an escape hatch for unknown keys.
//!
//! Extractors emit loose key/value maps. Keys that belong to the schema of
//! the entity's type are lifted into typed fields; anything else is kept in
//! `extra` so no extracted fact is dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::EntityType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64 => {
                Some(*n as u32)
            }
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Open,
    Resolved,
}

impl ThreadStatus {
    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Bool(true) => Some(Self::Open),
            AttributeValue::Bool(false) => Some(Self::Resolved),
            other => match other.as_text()?.to_lowercase().as_str() {
                "open" | "unresolved" | "pending" | "active" => Some(Self::Open),
                "resolved" | "closed" | "done" => Some(Self::Resolved),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterTraits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationTraits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectTraits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTraits {
    /// Position of the event on the story timeline, when it differs from
    /// the scene in which it is first mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_thread: Option<ThreadStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationTraits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headquarters: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum TypedAttributes {
    Character(CharacterTraits),
    Location(LocationTraits),
    Object(ObjectTraits),
    Event(EventTraits),
    Organization(OrganizationTraits),
    Untyped,
}

impl TypedAttributes {
    pub fn empty_for(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Character => Self::Character(CharacterTraits::default()),
            EntityType::Location => Self::Location(LocationTraits::default()),
            EntityType::Object => Self::Object(ObjectTraits::default()),
            EntityType::Event => Self::Event(EventTraits::default()),
            EntityType::Organization => Self::Organization(OrganizationTraits::default()),
            EntityType::Concept | EntityType::Theme => Self::Untyped,
        }
    }

    pub fn matches(&self, entity_type: EntityType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::empty_for(entity_type))
    }

    fn absorb_known(&mut self, key: &str, value: &AttributeValue) -> Absorb {
        match self {
            Self::Character(t) => match key {
                "age" => fill_u32(&mut t.age, value),
                "role" => fill_text(&mut t.role, value),
                "occupation" | "job" => fill_text(&mut t.occupation, value),
                "affiliation" | "faction" => fill_text(&mut t.affiliation, value),
                _ => Absorb::Unknown,
            },
            Self::Location(t) => match key {
                "region" => fill_text(&mut t.region, value),
                "kind" | "location_type" => fill_text(&mut t.kind, value),
                _ => Absorb::Unknown,
            },
            Self::Object(t) => match key {
                "owner" => fill_text(&mut t.owner, value),
                "significance" => fill_text(&mut t.significance, value),
                _ => Absorb::Unknown,
            },
            Self::Event(t) => match key {
                "sequence" | "order" | "timeline_position" => fill_u32(&mut t.sequence, value),
                "plot_thread" | "thread" | "thread_status" | "unresolved" => {
                    match ThreadStatus::from_value(value) {
                        Some(status) => fill(&mut t.plot_thread, status, |s| {
                            AttributeValue::Text(
                                match s {
                                    ThreadStatus::Open => "open",
                                    ThreadStatus::Resolved => "resolved",
                                }
                                .to_string(),
                            )
                        }),
                        None => Absorb::Unknown,
                    }
                }
                _ => Absorb::Unknown,
            },
            Self::Organization(t) => match key {
                "kind" | "org_type" => fill_text(&mut t.kind, value),
                "headquarters" | "base" => fill_text(&mut t.headquarters, value),
                _ => Absorb::Unknown,
            },
            Self::Untyped => Absorb::Unknown,
        }
    }
}

/// Outcome of offering one key/value to an attribute slot.
enum Absorb {
    Filled,
    Unchanged,
    Conflict(AttributeValue),
    Unknown,
}

fn fill<T: PartialEq>(
    slot: &mut Option<T>,
    value: T,
    render: impl Fn(&T) -> AttributeValue,
) -> Absorb {
    match slot {
        None => {
            *slot = Some(value);
            Absorb::Filled
        }
        Some(existing) if *existing == value => Absorb::Unchanged,
        Some(existing) => Absorb::Conflict(render(existing)),
    }
}

fn fill_text(slot: &mut Option<String>, value: &AttributeValue) -> Absorb {
    let Some(text) = value.as_text().filter(|t| !t.is_empty()) else {
        return Absorb::Unknown;
    };
    if let Some(existing) = slot {
        if existing.eq_ignore_ascii_case(&text) {
            return Absorb::Unchanged;
        }
    }
    fill(slot, text, |s| AttributeValue::Text(s.clone()))
}

fn fill_u32(slot: &mut Option<u32>, value: &AttributeValue) -> Absorb {
    match value.as_u32() {
        Some(n) => fill(slot, n, |v| AttributeValue::Number(*v as f64)),
        None => Absorb::Unknown,
    }
}

/// A value that could not be applied because a different one is already set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConflict {
    pub key: String,
    pub existing: AttributeValue,
    pub incoming: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub typed: TypedAttributes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    pub fn for_type(entity_type: EntityType) -> Self {
        Self {
            typed: TypedAttributes::empty_for(entity_type),
            extra: BTreeMap::new(),
        }
    }

    pub fn matches(&self, entity_type: EntityType) -> bool {
        self.typed.matches(entity_type)
    }

    /// Merge raw key/values, filling empty slots only. Values that disagree
    /// with what is already recorded are returned instead of applied.
    pub fn absorb(&mut self, raw: &BTreeMap<String, AttributeValue>) -> Vec<AttributeConflict> {
        let mut conflicts = Vec::new();

        for (raw_key, value) in raw {
            let key = raw_key.trim().to_lowercase().replace([' ', '-'], "_");
            if key.is_empty() {
                continue;
            }

            let outcome = match self.typed.absorb_known(&key, value) {
                Absorb::Unknown => match self.extra.get(&key) {
                    None => {
                        self.extra.insert(key.clone(), value.clone());
                        Absorb::Filled
                    }
                    Some(existing) if existing == value => Absorb::Unchanged,
                    Some(existing) => Absorb::Conflict(existing.clone()),
                },
                known => known,
            };

            if let Absorb::Conflict(existing) = outcome {
                conflicts.push(AttributeConflict {
                    key,
                    existing,
                    incoming: value.clone(),
                });
            }
        }

        conflicts
    }

    pub fn event_sequence(&self) -> Option<u32> {
        match &self.typed {
            TypedAttributes::Event(t) => t.sequence,
            _ => None,
        }
    }

    pub fn plot_thread(&self) -> Option<ThreadStatus> {
        match &self.typed {
            TypedAttributes::Event(t) => t.plot_thread,
            _ => None,
        }
    }
}
