use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;
use crate::model::{EntityId, EntityType};

/// Grouping of relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationCategory {
    Interpersonal,
    Spatial,
    TemporalCausal,
    Conceptual,
    EventParticipation,
    Organizational,
}

impl RelationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interpersonal => "interpersonal",
            Self::Spatial => "spatial",
            Self::TemporalCausal => "temporal_causal",
            Self::Conceptual => "conceptual",
            Self::EventParticipation => "event_participation",
            Self::Organizational => "organizational",
        }
    }
}

/// Narrative order implied by a temporal/causal relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalOrder {
    /// Source must not come after target.
    SourceFirst,
    /// Target must not come after source.
    TargetFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    // Interpersonal
    FamilyOf,
    FriendOf,
    EnemyOf,
    RomanticWith,
    MentorOf,
    RivalOf,
    AllyOf,
    Knows,
    // Spatial
    LocatedIn,
    LivesIn,
    TravelsTo,
    Near,
    PartOf,
    // Temporal / causal
    Causes,
    Precedes,
    Follows,
    Enables,
    Prevents,
    Triggers,
    // Conceptual
    Symbolizes,
    Represents,
    RelatedTo,
    ContrastsWith,
    Embodies,
    // Event participation
    ParticipatesIn,
    Witnesses,
    AffectedBy,
    Initiates,
    // Organizational
    MemberOf,
    Leads,
    WorksFor,
    Owns,
    Founded,
}

impl RelationType {
    pub const ALL: [RelationType; 33] = [
        Self::FamilyOf,
        Self::FriendOf,
        Self::EnemyOf,
        Self::RomanticWith,
        Self::MentorOf,
        Self::RivalOf,
        Self::AllyOf,
        Self::Knows,
        Self::LocatedIn,
        Self::LivesIn,
        Self::TravelsTo,
        Self::Near,
        Self::PartOf,
        Self::Causes,
        Self::Precedes,
        Self::Follows,
        Self::Enables,
        Self::Prevents,
        Self::Triggers,
        Self::Symbolizes,
        Self::Represents,
        Self::RelatedTo,
        Self::ContrastsWith,
        Self::Embodies,
        Self::ParticipatesIn,
        Self::Witnesses,
        Self::AffectedBy,
        Self::Initiates,
        Self::MemberOf,
        Self::Leads,
        Self::WorksFor,
        Self::Owns,
        Self::Founded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FamilyOf => "family_of",
            Self::FriendOf => "friend_of",
            Self::EnemyOf => "enemy_of",
            Self::RomanticWith => "romantic_with",
            Self::MentorOf => "mentor_of",
            Self::RivalOf => "rival_of",
            Self::AllyOf => "ally_of",
            Self::Knows => "knows",
            Self::LocatedIn => "located_in",
            Self::LivesIn => "lives_in",
            Self::TravelsTo => "travels_to",
            Self::Near => "near",
            Self::PartOf => "part_of",
            Self::Causes => "causes",
            Self::Precedes => "precedes",
            Self::Follows => "follows",
            Self::Enables => "enables",
            Self::Prevents => "prevents",
            Self::Triggers => "triggers",
            Self::Symbolizes => "symbolizes",
            Self::Represents => "represents",
            Self::RelatedTo => "related_to",
            Self::ContrastsWith => "contrasts_with",
            Self::Embodies => "embodies",
            Self::ParticipatesIn => "participates_in",
            Self::Witnesses => "witnesses",
            Self::AffectedBy => "affected_by",
            Self::Initiates => "initiates",
            Self::MemberOf => "member_of",
            Self::Leads => "leads",
            Self::WorksFor => "works_for",
            Self::Owns => "owns",
            Self::Founded => "founded",
        }
    }

    pub fn category(&self) -> RelationCategory {
        match self {
            Self::FamilyOf
            | Self::FriendOf
            | Self::EnemyOf
            | Self::RomanticWith
            | Self::MentorOf
            | Self::RivalOf
            | Self::AllyOf
            | Self::Knows => RelationCategory::Interpersonal,
            Self::LocatedIn | Self::LivesIn | Self::TravelsTo | Self::Near | Self::PartOf => {
                RelationCategory::Spatial
            }
            Self::Causes
            | Self::Precedes
            | Self::Follows
            | Self::Enables
            | Self::Prevents
            | Self::Triggers => RelationCategory::TemporalCausal,
            Self::Symbolizes
            | Self::Represents
            | Self::RelatedTo
            | Self::ContrastsWith
            | Self::Embodies => RelationCategory::Conceptual,
            Self::ParticipatesIn | Self::Witnesses | Self::AffectedBy | Self::Initiates => {
                RelationCategory::EventParticipation
            }
            Self::MemberOf | Self::Leads | Self::WorksFor | Self::Owns | Self::Founded => {
                RelationCategory::Organizational
            }
        }
    }

    /// Ordering constraint this relation puts on its endpoints, if any.
    pub fn temporal_order(&self) -> Option<TemporalOrder> {
        match self {
            Self::Causes | Self::Precedes | Self::Enables | Self::Triggers => {
                Some(TemporalOrder::SourceFirst)
            }
            Self::Follows => Some(TemporalOrder::TargetFirst),
            _ => None,
        }
    }

    /// Entity types a relation usually connects, as `(source, target)`.
    /// `None` means any type fits that end.
    pub fn endpoint_types(&self) -> (Option<EntityType>, Option<EntityType>) {
        let target = match self.category() {
            RelationCategory::Interpersonal => {
                return (Some(EntityType::Character), Some(EntityType::Character));
            }
            RelationCategory::EventParticipation => Some(EntityType::Event),
            _ => match self {
                Self::LocatedIn | Self::LivesIn | Self::TravelsTo => Some(EntityType::Location),
                Self::MemberOf | Self::Leads | Self::WorksFor | Self::Founded => {
                    Some(EntityType::Organization)
                }
                Self::Owns => Some(EntityType::Object),
                _ => None,
            },
        };
        (None, target)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| GraphError::validation(format!("unknown relation type: {s:?}")))
    }
}

/// Content-derived key for a relationship observation. Identical triples
/// observed in the same scene share a key.
pub fn content_key(
    source: EntityId,
    target: EntityId,
    relation_type: RelationType,
    scene_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.0.as_bytes());
    hasher.update(target.0.as_bytes());
    hasher.update(relation_type.as_str().as_bytes());
    hasher.update(scene_id.unwrap_or("").as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!("causes".parse::<RelationType>().unwrap(), RelationType::Causes);
        assert_eq!("Member Of".parse::<RelationType>().unwrap(), RelationType::MemberOf);
        assert_eq!("romantic-with".parse::<RelationType>().unwrap(), RelationType::RomanticWith);
        assert!("loves_secretly".parse::<RelationType>().is_err());
    }

    #[test]
    fn test_every_type_round_trips_through_str() {
        for t in RelationType::ALL {
            assert_eq!(t.as_str().parse::<RelationType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(RelationType::Knows.category(), RelationCategory::Interpersonal);
        assert_eq!(RelationType::Causes.category(), RelationCategory::TemporalCausal);
        assert_eq!(RelationType::Witnesses.category(), RelationCategory::EventParticipation);
        assert_eq!(RelationType::Leads.category(), RelationCategory::Organizational);
        assert_eq!(RelationType::Follows.temporal_order(), Some(TemporalOrder::TargetFirst));
        assert_eq!(RelationType::Prevents.temporal_order(), None);
    }

    #[test]
    fn test_endpoint_types() {
        assert_eq!(
            RelationType::Knows.endpoint_types(),
            (Some(EntityType::Character), Some(EntityType::Character))
        );
        assert_eq!(RelationType::LocatedIn.endpoint_types(), (None, Some(EntityType::Location)));
        assert_eq!(RelationType::Witnesses.endpoint_types(), (None, Some(EntityType::Event)));
        assert_eq!(RelationType::Near.endpoint_types(), (None, None));
    }

    #[test]
    fn test_content_key_depends_on_scene() {
        let a = EntityId::new();
        let b = EntityId::new();
        let k1 = content_key(a, b, RelationType::Knows, Some("s1"));
        let k2 = content_key(a, b, RelationType::Knows, Some("s1"));
        let k3 = content_key(a, b, RelationType::Knows, Some("s2"));
        let k4 = content_key(b, a, RelationType::Knows, Some("s1"));
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);
        assert_eq!(k1.len(), 32);
    }
}
