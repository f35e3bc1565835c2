//! Merges extractor candidates into the graph, deduplicating against what is
//! already there.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use graph::{
    Entity, EntityId, EntityType, GraphError, KnowledgeGraph, NewEntity, NewRelationship,
    RelationType, SceneRef, content_key, normalize_name,
};

use crate::schema::{CandidateEntity, CandidateRelationship, ExtractionOutput};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub similarity_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// A candidate that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub candidate: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub entities_created: usize,
    pub entities_enriched: usize,
    pub entities_unchanged: usize,
    pub relationships_created: usize,
    pub relationships_existing: usize,
    pub rejected: Vec<Rejection>,
}

impl MergeReport {
    fn reject(&mut self, candidate: impl Into<String>, reason: impl Into<String>) {
        let rejection = Rejection {
            candidate: candidate.into(),
            reason: reason.into(),
        };
        warn!(candidate = %rejection.candidate, reason = %rejection.reason, "Candidate rejected");
        self.rejected.push(rejection);
    }
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn edit_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

/// Shared tokens over the size of the smaller token set, so a short name
/// fully contained in a longer one scores 1.0.
fn token_overlap(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    let smaller = ta.len().min(tb.len());
    if smaller == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / smaller as f64
}

const HONORIFICS: [&str; 10] =
    ["mr", "mrs", "ms", "miss", "mx", "dr", "sir", "lady", "lord", "madam"];

fn honorific(name: &str) -> Option<&str> {
    name.split_whitespace().next().filter(|t| HONORIFICS.contains(t))
}

/// Similarity of two already-normalized names in `[0, 1]`. Names led by
/// different honorifics ("mr smith", "mrs smith") never match.
pub fn similarity(a: &str, b: &str) -> f64 {
    if let (Some(ha), Some(hb)) = (honorific(a), honorific(b)) {
        if ha != hb {
            return 0.0;
        }
    }
    edit_ratio(a, b).max(token_overlap(a, b))
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { fallback }
}

pub struct EntityResolver {
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Find the existing entity of `entity_type` a candidate name refers to.
    /// Exact normalized matches on name or alias win; otherwise the best fuzzy
    /// score at or above the threshold, ties broken by mention count and then
    /// by id.
    pub fn find_match(
        &self,
        graph: &KnowledgeGraph,
        entity_type: EntityType,
        name: &str,
        aliases: &[String],
    ) -> Option<(EntityId, f64)> {
        let wanted: Vec<String> = std::iter::once(name)
            .chain(aliases.iter().map(String::as_str))
            .map(normalize_name)
            .filter(|n| !n.is_empty())
            .collect();
        if wanted.is_empty() {
            return None;
        }

        let mut best: Option<(&Entity, f64)> = None;
        for entity in graph.entities().filter(|e| e.entity_type == entity_type) {
            let known: Vec<String> = std::iter::once(&entity.name)
                .chain(entity.aliases.iter())
                .map(|n| normalize_name(n))
                .collect();

            if known.iter().any(|k| wanted.contains(k)) {
                return Some((entity.id, 1.0));
            }

            let score = known
                .iter()
                .flat_map(|k| wanted.iter().map(move |w| similarity(k, w)))
                .fold(0.0, f64::max);
            if score < self.config.similarity_threshold {
                continue;
            }

            let better = match best {
                None => true,
                Some((current, current_score)) => {
                    score > current_score
                        || (score == current_score
                            && (entity.mention_count > current.mention_count
                                || (entity.mention_count == current.mention_count
                                    && entity.id < current.id)))
                }
            };
            if better {
                best = Some((entity, score));
            }
        }

        best.map(|(e, score)| (e.id, score))
    }

    /// Apply one extractor output for `scene` to the graph. Candidates that
    /// cannot be applied are reported, not raised.
    pub fn merge(
        &self,
        graph: &mut KnowledgeGraph,
        scene: &SceneRef,
        output: &ExtractionOutput,
    ) -> Result<MergeReport, GraphError> {
        let mut report = MergeReport::default();
        // Normalized names and candidate handles resolved in this batch.
        let mut batch: Batch = HashMap::new();

        for candidate in &output.entities {
            let Some(id) = self.merge_entity(graph, scene, candidate, &mut report)? else {
                continue;
            };
            let resolved = (graph.get_entity(id)?.entity_type, id);
            let handles = std::iter::once(&candidate.name)
                .chain(candidate.aliases.iter())
                .chain(candidate.id.iter());
            for handle in handles {
                let key = normalize_name(handle);
                if key.is_empty() {
                    continue;
                }
                let known = batch.entry(key).or_default();
                if !known.contains(&resolved) {
                    known.push(resolved);
                }
            }
        }

        for candidate in &output.relationships {
            self.merge_relationship(graph, scene, candidate, &batch, &mut report)?;
        }

        debug!(
            scene = %scene.id,
            created = report.entities_created,
            enriched = report.entities_enriched,
            unchanged = report.entities_unchanged,
            relationships_created = report.relationships_created,
            relationships_existing = report.relationships_existing,
            rejected = report.rejected.len(),
            "Merge applied"
        );
        Ok(report)
    }

    fn merge_entity(
        &self,
        graph: &mut KnowledgeGraph,
        scene: &SceneRef,
        candidate: &CandidateEntity,
        report: &mut MergeReport,
    ) -> Result<Option<EntityId>, GraphError> {
        let name = candidate.name.trim();
        if normalize_name(name).is_empty() {
            report.reject(&candidate.name, "empty entity name");
            return Ok(None);
        }
        let entity_type: EntityType = match candidate.entity_type.parse() {
            Ok(t) => t,
            Err(e) => {
                report.reject(name, e.to_string());
                return Ok(None);
            }
        };
        let confidence = clamp_unit(candidate.confidence, 1.0);

        if let Some((id, score)) = self.find_match(graph, entity_type, name, &candidate.aliases) {
            let changed = graph.modify_entity(id, |e| enrich(e, candidate, scene, confidence))?;
            debug!(
                entity_id = %id,
                candidate = name,
                score,
                changed,
                "Candidate matched existing entity"
            );
            if changed {
                report.entities_enriched += 1;
            } else {
                report.entities_unchanged += 1;
            }
            return Ok(Some(id));
        }

        let new = NewEntity {
            description: candidate.description.clone(),
            aliases: candidate.aliases.clone(),
            attributes: candidate.attributes.clone(),
            scene: Some(scene.clone()),
            confidence,
            ..NewEntity::new(name, entity_type)
        };
        match graph.add_entity(new) {
            Ok(id) => {
                report.entities_created += 1;
                Ok(Some(id))
            }
            Err(GraphError::Validation(reason)) => {
                report.reject(name, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn merge_relationship(
        &self,
        graph: &mut KnowledgeGraph,
        scene: &SceneRef,
        candidate: &CandidateRelationship,
        batch: &Batch,
        report: &mut MergeReport,
    ) -> Result<(), GraphError> {
        let label = format!(
            "{} -[{}]-> {}",
            candidate.source, candidate.relation, candidate.target
        );

        let relation_type: RelationType = match candidate.relation.parse() {
            Ok(t) => t,
            Err(e) => {
                report.reject(label, e.to_string());
                return Ok(());
            }
        };

        let (source_type, target_type) = relation_type.endpoint_types();
        let source = resolve_endpoint(graph, batch, &candidate.source, source_type);
        let target = resolve_endpoint(graph, batch, &candidate.target, target_type);
        let (source, target) = match (source, target) {
            (Endpoint::Found(source), Endpoint::Found(target)) => (source, target),
            (Endpoint::Ambiguous, _) | (_, Endpoint::Ambiguous) => {
                report.reject(label, "ambiguous endpoint");
                return Ok(());
            }
            _ => {
                report.reject(label, "unresolved endpoint");
                return Ok(());
            }
        };
        if source == target {
            report.reject(label, "self-referencing relationship");
            return Ok(());
        }

        let key = content_key(source, target, relation_type, Some(&scene.id));
        if graph.find_relationship_by_key(&key).is_some() {
            report.relationships_existing += 1;
            return Ok(());
        }

        let evidence = candidate.evidence.trim();
        let valence = if candidate.valence.is_finite() {
            candidate.valence.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let new = NewRelationship {
            description: candidate.description.clone(),
            context: if evidence.is_empty() { Vec::new() } else { vec![evidence.to_string()] },
            confidence: clamp_unit(candidate.confidence, 1.0),
            ..NewRelationship::new(source, target, relation_type)
                .scene(scene.clone())
                .strength(clamp_unit(candidate.strength, 0.5))
                .valence(valence)
        };
        match graph.add_relationship(new) {
            Ok(_) => report.relationships_created += 1,
            Err(GraphError::Validation(reason)) => report.reject(label, reason),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

type Batch = HashMap<String, Vec<(EntityType, EntityId)>>;

enum Endpoint {
    Found(EntityId),
    Missing,
    Ambiguous,
}

/// Resolve a relationship endpoint name, batch first, then the graph. When
/// several entities answer to the name, the one of the type the relation
/// expects wins; otherwise the endpoint is ambiguous.
fn resolve_endpoint(
    graph: &KnowledgeGraph,
    batch: &Batch,
    name: &str,
    expected: Option<EntityType>,
) -> Endpoint {
    let matches: Vec<(EntityType, EntityId)> = match batch.get(&normalize_name(name)) {
        Some(found) => found.clone(),
        None => graph
            .entities_named(name)
            .iter()
            .map(|e| (e.entity_type, e.id))
            .collect(),
    };
    match matches.as_slice() {
        [] => Endpoint::Missing,
        [(_, id)] => Endpoint::Found(*id),
        _ => {
            let mut fitting = matches.iter().filter(|(t, _)| Some(*t) == expected);
            match (fitting.next(), fitting.next()) {
                (Some((_, id)), None) => Endpoint::Found(*id),
                _ => Endpoint::Ambiguous,
            }
        }
    }
}

/// Fold a matched candidate into an existing entity. Returns whether
/// anything changed.
fn enrich(
    entity: &mut Entity,
    candidate: &CandidateEntity,
    scene: &SceneRef,
    confidence: f64,
) -> bool {
    let mut changed = false;

    let text = candidate.description.trim();
    if !text.is_empty() && !entity.description.contains(text) {
        if entity.description.is_empty() && !entity.verified {
            entity.description = text.to_string();
        } else {
            let addendum = format!("[scene {}] {}", scene.id, text);
            if entity.description.is_empty() {
                entity.description = addendum;
            } else {
                entity.description.push('\n');
                entity.description.push_str(&addendum);
            }
        }
        changed = true;
    }

    let canonical = normalize_name(&entity.name);
    for alias in std::iter::once(&candidate.name).chain(candidate.aliases.iter()) {
        let normalized = normalize_name(alias);
        let known = normalized.is_empty()
            || normalized == canonical
            || entity.aliases.iter().any(|a| normalize_name(a) == normalized);
        if !known {
            changed |= entity.add_alias(alias);
        }
    }

    changed |= entity.record_appearance(scene);

    if confidence > entity.confidence {
        entity.confidence = confidence;
        changed = true;
    }

    let before = entity.attributes.clone();
    for conflict in entity.attributes.absorb(&candidate.attributes) {
        let note = format!(
            "attribute {}: kept {}, scene reported {}",
            conflict.key,
            render(&conflict.existing),
            render(&conflict.incoming)
        );
        let seen = entity
            .annotations
            .iter()
            .any(|a| a.note == note && a.scene_id.as_deref() == Some(scene.id.as_str()));
        if !seen {
            entity.annotate(Some(&scene.id), note);
            changed = true;
        }
    }
    changed |= entity.attributes != before;

    changed
}

fn render(value: &graph::AttributeValue) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CandidateRelationship;
    use graph::Direction;

    fn resolver() -> EntityResolver {
        EntityResolver::new(ResolverConfig::default())
    }

    fn scene(n: u32) -> SceneRef {
        SceneRef::new(format!("s{n}"), n)
    }

    fn batch() -> ExtractionOutput {
        ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Mickey Bardot", "character").description("A tired detective"),
                CandidateEntity::new("Noni", "character"),
                CandidateEntity::new("The Blue Door", "location"),
            ],
            relationships: vec![
                CandidateRelationship::new("Mickey Bardot", "Noni", "knows")
                    .evidence("They nodded."),
                CandidateRelationship::new("Noni", "The Blue Door", "located_in"),
            ],
            usage: None,
        }
    }

    #[test]
    fn test_similarity_metric() {
        assert_eq!(similarity("mickey", "mickey bardot"), 1.0);
        assert!(similarity("mickey", "noni") < DEFAULT_SIMILARITY_THRESHOLD);
        assert!(similarity("bardot", "bardott") >= DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut graph = KnowledgeGraph::new("novel");
        let r = resolver();

        let first = r.merge(&mut graph, &scene(1), &batch()).unwrap();
        assert_eq!(first.entities_created, 3);
        assert_eq!(first.relationships_created, 2);
        assert!(first.rejected.is_empty());

        let counts = (graph.entity_count(), graph.relationship_count());
        let mentions: Vec<u32> = graph.entities().map(|e| e.mention_count).collect();

        let second = r.merge(&mut graph, &scene(1), &batch()).unwrap();
        assert_eq!(second.entities_created, 0);
        assert_eq!(second.entities_unchanged, 3);
        assert_eq!(second.relationships_existing, 2);
        assert_eq!((graph.entity_count(), graph.relationship_count()), counts);
        assert_eq!(graph.entities().map(|e| e.mention_count).collect::<Vec<_>>(), mentions);
    }

    #[test]
    fn test_short_name_merges_into_full_name() {
        let mut graph = KnowledgeGraph::new("novel");
        let r = resolver();
        r.merge(&mut graph, &scene(1), &batch()).unwrap();

        let later = ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Mickey", "character").description("Drinks rye"),
                CandidateEntity::new("Noni", "location"),
            ],
            ..Default::default()
        };
        let report = r.merge(&mut graph, &scene(4), &later).unwrap();
        assert_eq!(report.entities_enriched, 1);
        assert_eq!(report.entities_created, 1);

        let mickey = graph.find_by_name(Some(EntityType::Character), "Mickey Bardot").unwrap();
        assert_eq!(mickey.name, "Mickey Bardot");
        assert_eq!(mickey.mention_count, 2);
        assert!(mickey.has_alias("Mickey"));
        assert_eq!(mickey.description, "A tired detective\n[scene s4] Drinks rye");
        assert_eq!(graph.list_entities(&Default::default()).len(), 4);
    }

    #[test]
    fn test_distinct_names_never_merge() {
        let mut graph = KnowledgeGraph::new("novel");
        let r = resolver();
        let output = ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Mickey", "character"),
                CandidateEntity::new("Noni", "character"),
            ],
            ..Default::default()
        };
        let report = r.merge(&mut graph, &scene(1), &output).unwrap();
        assert_eq!(report.entities_created, 2);
    }

    #[test]
    fn test_tie_prefers_more_mentions() {
        let mut graph = KnowledgeGraph::new("novel");
        let busy = graph
            .add_entity(NewEntity::new("Sam Cole", EntityType::Character).scene(scene(1)))
            .unwrap();
        graph
            .modify_entity(busy, |e| {
                e.record_appearance(&scene(2));
            })
            .unwrap();
        graph
            .add_entity(NewEntity::new("Sam Reyes", EntityType::Character).scene(scene(1)))
            .unwrap();

        let (id, score) = resolver()
            .find_match(&graph, EntityType::Character, "Sam", &[])
            .unwrap();
        assert_eq!(id, busy);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_verified_description_is_kept() {
        let mut graph = KnowledgeGraph::new("novel");
        let id = graph
            .add_entity(NewEntity::new("Noni", EntityType::Character).verified())
            .unwrap();
        let output = ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Noni", "character")
                    .description("A singer")
                    .confidence(0.4),
            ],
            ..Default::default()
        };
        resolver().merge(&mut graph, &scene(2), &output).unwrap();

        let noni = graph.get_entity(id).unwrap();
        assert_eq!(noni.description, "[scene s2] A singer");
        assert_eq!(noni.confidence, 1.0);
        assert!(noni.verified);
    }

    #[test]
    fn test_attribute_conflicts_become_annotations() {
        let mut graph = KnowledgeGraph::new("novel");
        let r = resolver();
        let first = ExtractionOutput {
            entities: vec![CandidateEntity::new("Mickey", "character").attribute("age", 41.0)],
            ..Default::default()
        };
        r.merge(&mut graph, &scene(1), &first).unwrap();

        let second = ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Mickey", "character")
                    .attribute("age", 40.0)
                    .attribute("occupation", "detective"),
            ],
            ..Default::default()
        };
        r.merge(&mut graph, &scene(2), &second).unwrap();
        r.merge(&mut graph, &scene(2), &second).unwrap();

        let mickey = graph.find_by_name(None, "Mickey").unwrap();
        assert_eq!(mickey.annotations.len(), 1);
        assert!(mickey.annotations[0].note.starts_with("attribute age"));
        match &mickey.attributes.typed {
            graph::TypedAttributes::Character(t) => {
                assert_eq!(t.age, Some(41));
                assert_eq!(t.occupation.as_deref(), Some("detective"));
            }
            other => panic!("unexpected attributes {other:?}"),
        }
    }

    #[test]
    fn test_bad_relationships_are_reported() {
        let mut graph = KnowledgeGraph::new("novel");
        let output = ExtractionOutput {
            entities: vec![CandidateEntity::new("Mickey", "character")],
            relationships: vec![
                CandidateRelationship::new("Mickey", "Nobody", "knows"),
                CandidateRelationship::new("Mickey", "Mickey", "knows"),
                CandidateRelationship::new("Mickey", "Mickey", "adores"),
            ],
            usage: None,
        };
        let report = resolver().merge(&mut graph, &scene(1), &output).unwrap();
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.relationships_created, 0);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn test_candidate_handles_resolve_relationships() {
        let mut graph = KnowledgeGraph::new("novel");
        let mut mickey = CandidateEntity::new("Mickey", "character");
        mickey.id = Some("E1".into());
        let mut door = CandidateEntity::new("The Blue Door", "location");
        door.id = Some("E2".into());
        let output = ExtractionOutput {
            entities: vec![mickey, door],
            relationships: vec![CandidateRelationship::new("E1", "E2", "located_in")],
            usage: None,
        };
        let report = resolver().merge(&mut graph, &scene(1), &output).unwrap();
        assert_eq!(report.relationships_created, 1);
    }

    #[test]
    fn test_shared_name_endpoint_follows_relation_type() {
        for _ in 0..20 {
            let mut graph = KnowledgeGraph::new("novel");
            let person = graph.add_entity(NewEntity::new("Paris", EntityType::Character)).unwrap();
            let city = graph.add_entity(NewEntity::new("Paris", EntityType::Location)).unwrap();
            let output = ExtractionOutput {
                entities: vec![CandidateEntity::new("Helen", "character")],
                relationships: vec![
                    CandidateRelationship::new("Helen", "Paris", "located_in"),
                    CandidateRelationship::new("Helen", "Paris", "romantic_with"),
                    CandidateRelationship::new("Helen", "Paris", "related_to"),
                ],
                usage: None,
            };
            let report = resolver().merge(&mut graph, &scene(1), &output).unwrap();
            assert_eq!(report.relationships_created, 2);
            assert_eq!(report.rejected.len(), 1);
            assert_eq!(report.rejected[0].reason, "ambiguous endpoint");

            let helen = graph.find_by_name(Some(EntityType::Character), "Helen").unwrap().id;
            let targets: Vec<(RelationType, EntityId)> = graph
                .relationships_of(helen, Direction::Outgoing)
                .into_iter()
                .map(|r| (r.relation_type, r.target))
                .collect();
            assert!(targets.contains(&(RelationType::LocatedIn, city)));
            assert!(targets.contains(&(RelationType::RomanticWith, person)));
        }
    }

    #[test]
    fn test_distinct_honorifics_never_merge() {
        assert_eq!(similarity("mr smith", "mrs smith"), 0.0);
        assert_eq!(similarity("smith", "mrs smith"), 1.0);

        let mut graph = KnowledgeGraph::new("novel");
        let output = ExtractionOutput {
            entities: vec![
                CandidateEntity::new("Mr. Smith", "character"),
                CandidateEntity::new("Mrs. Smith", "character"),
            ],
            ..Default::default()
        };
        let report = resolver().merge(&mut graph, &scene(1), &output).unwrap();
        assert_eq!(report.entities_created, 2);
        assert_eq!(graph.entity_count(), 2);
    }

    #[test]
    fn test_unknown_entity_type_rejected() {
        let mut graph = KnowledgeGraph::new("novel");
        let output = ExtractionOutput {
            entities: vec![CandidateEntity::new("Quantum Flux", "technology")],
            ..Default::default()
        };
        let report = resolver().merge(&mut graph, &scene(1), &output).unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert!(graph.is_empty());
    }
}
