use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use graph::{AttributeValue, SceneRef};

fn default_confidence() -> f64 {
    1.0
}

fn default_strength() -> f64 {
    0.5
}

/// Scene text handed to an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInput {
    pub scene: SceneRef,
    pub text: String,
}

impl SceneInput {
    pub fn new(scene: SceneRef, text: impl Into<String>) -> Self {
        Self {
            scene,
            text: text.into(),
        }
    }
}

/// An entity proposed by an extractor, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Optional extractor-local handle ("E1") that relationships may refer to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl CandidateEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            aliases: Vec::new(),
            attributes: BTreeMap::new(),
            confidence: default_confidence(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A relationship proposed by an extractor. Endpoints are names (or
/// candidate handles), not graph ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelationship {
    pub source: String,
    pub target: String,
    #[serde(alias = "type", alias = "relation_type")]
    pub relation: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub valence: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl CandidateRelationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            description: String::new(),
            evidence: String::new(),
            strength: default_strength(),
            valence: 0.0,
            confidence: default_confidence(),
        }
    }

    pub fn evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn valence(mut self, valence: f64) -> Self {
        self.valence = valence;
        self
    }
}

/// Token and cost accounting reported by an extractor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

impl UsageMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::Add for UsageMetrics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            cost: self.cost + rhs.cost,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub entities: Vec<CandidateEntity>,
    #[serde(default, alias = "relations")]
    pub relationships: Vec<CandidateRelationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loose_extractor_json() {
        let json = r#"{
            "entities": [
                {"id": "E1", "name": "Mickey Bardot", "type": "character", "attributes": {"age": 41}},
                {"name": "The Blue Door", "type": "location"}
            ],
            "relations": [
                {"source": "E1", "target": "The Blue Door", "relation": "located_in", "evidence": "He sat at the bar."}
            ]
        }"#;

        let output: ExtractionOutput = serde_json::from_str(json).unwrap();
        assert_eq!(output.entities.len(), 2);
        assert_eq!(output.entities[0].id.as_deref(), Some("E1"));
        assert_eq!(output.entities[1].confidence, 1.0);
        assert_eq!(
            output.entities[0].attributes.get("age"),
            Some(&AttributeValue::Number(41.0))
        );
        assert_eq!(output.relationships.len(), 1);
        assert_eq!(output.relationships[0].strength, 0.5);
        assert!(output.usage.is_none());
    }

    #[test]
    fn test_usage_add() {
        let a = UsageMetrics {
            prompt_tokens: 100,
            completion_tokens: 20,
            cost: 0.5,
        };
        let total = a + a;
        assert_eq!(total.total_tokens(), 240);
        assert_eq!(total.cost, 1.0);
    }
}
