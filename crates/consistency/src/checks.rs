//! The individual heuristics. Each one only reads the graph.

use std::collections::BTreeMap;

use graph::{Direction, EntityType, KnowledgeGraph, TemporalOrder, ThreadStatus};

use crate::ConsistencyConfig;
use crate::issue::{Issue, IssueKind};

/// Open plot threads not touched for more than `dropped_thread_gap` scenes.
pub fn dropped_threads(
    kg: &KnowledgeGraph,
    config: &ConsistencyConfig,
    position: u32,
) -> Vec<Issue> {
    kg.entities()
        .filter(|e| e.entity_type == EntityType::Event)
        .filter(|e| e.attributes.plot_thread() == Some(ThreadStatus::Open))
        .filter_map(|e| {
            let last = e.last_appearance()?.sequence;
            let gap = position.saturating_sub(last);
            (gap > config.dropped_thread_gap).then(|| {
                Issue::new(
                    IssueKind::DroppedThread,
                    e.id,
                    &e.name,
                    format!(
                        "open plot thread \"{}\" last appeared in scene {last}, {gap} scenes ago",
                        e.name
                    ),
                    "resolve the thread or bring it back into a scene".to_string(),
                )
            })
        })
        .collect()
}

/// Established characters that have been away for too long.
pub fn character_absences(
    kg: &KnowledgeGraph,
    config: &ConsistencyConfig,
    position: u32,
) -> Vec<Issue> {
    kg.entities()
        .filter(|e| e.entity_type == EntityType::Character)
        .filter(|e| e.mention_count > config.absence_min_mentions)
        .filter_map(|e| {
            let last = e.last_appearance()?.sequence;
            let gap = position.saturating_sub(last);
            (gap > config.absence_gap).then(|| {
                Issue::new(
                    IssueKind::CharacterAbsence,
                    e.id,
                    &e.name,
                    format!(
                        "{} ({} mentions) has not appeared since scene {last}, {gap} scenes ago",
                        e.name, e.mention_count
                    ),
                    "mention where the character is or write their exit".to_string(),
                )
            })
        })
        .collect()
}

/// Temporal or causal relationships whose effect sits before its cause.
pub fn timeline_errors(kg: &KnowledgeGraph) -> Vec<Issue> {
    let mut issues = Vec::new();
    for rel in kg.relationships() {
        let Some(order) = rel.relation_type.temporal_order() else {
            continue;
        };
        let (cause, effect) = match order {
            TemporalOrder::SourceFirst => (rel.source, rel.target),
            TemporalOrder::TargetFirst => (rel.target, rel.source),
        };
        let (Ok(cause), Ok(effect)) = (kg.get_entity(cause), kg.get_entity(effect)) else {
            continue;
        };
        let (Some(cause_at), Some(effect_at)) =
            (cause.narrative_position(), effect.narrative_position())
        else {
            continue;
        };
        if effect_at < cause_at {
            issues.push(
                Issue::new(
                    IssueKind::TimelineError,
                    effect.id,
                    &effect.name,
                    format!(
                        "{} is placed at {effect_at} but depends on {} ({}) at {cause_at}",
                        effect.name, cause.name, rel.relation_type
                    ),
                    format!("move {} after {} or fix the relationship", effect.name, cause.name),
                )
                .related(cause.id),
            );
        }
    }
    issues
}

fn population_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Characters seen often whose relationships never change in tone.
pub fn flat_arcs(kg: &KnowledgeGraph, config: &ConsistencyConfig) -> Vec<Issue> {
    let mut issues = Vec::new();
    for entity in kg.entities() {
        if entity.entity_type != EntityType::Character
            || entity.appearances.len() < config.flat_arc_min_appearances
        {
            continue;
        }

        // scene sequence -> (valence sum, count)
        let mut per_scene: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for rel in kg.relationships_of(entity.id, Direction::Both) {
            for scene in &rel.scenes {
                let slot = per_scene.entry(scene.sequence).or_insert((0.0, 0));
                slot.0 += rel.valence;
                slot.1 += 1;
            }
        }
        let trajectory: Vec<f64> = per_scene.values().map(|(sum, n)| sum / *n as f64).collect();
        if trajectory.len() < 3 {
            continue;
        }

        let variance = population_variance(&trajectory);
        if variance < config.flat_arc_variance {
            issues.push(Issue::new(
                IssueKind::FlatArc,
                entity.id,
                &entity.name,
                format!(
                    "{} appears in {} scenes but relationship tone barely moves \
                     (variance {variance:.4} over {} scenes)",
                    entity.name,
                    entity.appearances.len(),
                    trajectory.len()
                ),
                "give the character a turn: a conflict, a reconciliation, a loss".to_string(),
            ));
        }
    }
    issues
}

/// Entities mentioned more than once that connect to nothing.
pub fn orphaned_entities(kg: &KnowledgeGraph) -> Vec<Issue> {
    kg.entities()
        .filter(|e| e.mention_count > 1 && kg.degree(e.id) == 0)
        .map(|e| {
            Issue::new(
                IssueKind::OrphanedEntity,
                e.id,
                &e.name,
                format!(
                    "{} is mentioned {} times but has no relationships",
                    e.name, e.mention_count
                ),
                format!("connect {} to the characters or places around it", e.name),
            )
        })
        .collect()
}
