//! PageRank via power iteration.

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::debug;

use graph::{EntityId, KnowledgeGraph};

use crate::projection::Projection;

#[derive(Debug, Clone, Copy)]
pub struct PageRankConfig {
    pub damping_factor: f64,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: 0.85,
            max_iterations: 100,
            convergence_threshold: 1e-9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CentralityScore {
    pub entity_id: EntityId,
    pub name: String,
    pub score: f64,
}

/// Scores per node, summing to 1.0. Rank flows along relationships in
/// proportion to their strength; nodes with no outgoing weight spread their
/// rank evenly over the whole graph.
pub fn pagerank(projection: &Projection, config: &PageRankConfig) -> Vec<f64> {
    let g = projection.graph();
    let n = g.node_count();
    if n == 0 {
        return Vec::new();
    }

    let d = config.damping_factor;
    let base = (1.0 - d) / n as f64;
    let out_weight: Vec<f64> = g
        .node_indices()
        .map(|u| g.edges_directed(u, Direction::Outgoing).map(|e| e.weight().weight).sum())
        .collect();

    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0_f64; n];
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;

        let dangling: f64 = (0..n).filter(|&u| out_weight[u] <= 0.0).map(|u| scores[u]).sum();
        let spread = base + d * dangling / n as f64;
        next.iter_mut().for_each(|s| *s = spread);

        for u in (0..n).filter(|&u| out_weight[u] > 0.0) {
            let rank = d * scores[u] / out_weight[u];
            for edge in g.edges_directed(NodeIndex::new(u), Direction::Outgoing) {
                next[edge.target().index()] += rank * edge.weight().weight;
            }
        }

        let diff: f64 = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        if diff < config.convergence_threshold {
            break;
        }
    }

    debug!(nodes = n, iterations, "PageRank finished");
    scores
}

/// The `top` most central entities, highest score first.
pub fn top_central(
    kg: &KnowledgeGraph,
    top: usize,
    config: &PageRankConfig,
) -> Vec<CentralityScore> {
    let projection = Projection::build(kg, None);
    let scores = pagerank(&projection, config);

    let mut ranked: Vec<CentralityScore> = scores
        .into_iter()
        .enumerate()
        .filter_map(|(i, score)| {
            let id = projection.entity(NodeIndex::new(i));
            kg.get_entity(id).ok().map(|e| CentralityScore {
                entity_id: id,
                name: e.name.clone(),
                score,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.entity_id.cmp(&b.entity_id)));
    ranked.truncate(top);
    ranked
}
