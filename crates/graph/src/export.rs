//! Interchange exports for external graph-visualization tools.

use serde::Serialize;
use std::fmt::{self, Write};

use crate::model::{EntityId, RelationshipId};
use crate::relation::{RelationCategory, RelationType};
use crate::store::KnowledgeGraph;

#[derive(Debug, Clone, Serialize)]
pub struct NodeLinkGraph {
    pub directed: bool,
    pub multigraph: bool,
    pub nodes: Vec<NodeLinkNode>,
    pub links: Vec<NodeLinkEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeLinkNode {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub mentions: u32,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeLinkEdge {
    pub id: RelationshipId,
    pub source: EntityId,
    pub target: EntityId,
    pub relation: RelationType,
    pub category: RelationCategory,
    pub strength: f64,
    pub valence: f64,
}

/// Node-link JSON (the shape d3 and networkx read).
pub fn to_node_link(graph: &KnowledgeGraph) -> NodeLinkGraph {
    NodeLinkGraph {
        directed: true,
        multigraph: true,
        nodes: graph
            .entities()
            .map(|e| NodeLinkNode {
                id: e.id,
                name: e.name.clone(),
                entity_type: e.entity_type.to_string(),
                mentions: e.mention_count,
                verified: e.verified,
            })
            .collect(),
        links: graph
            .relationships()
            .map(|r| NodeLinkEdge {
                id: r.id,
                source: r.source,
                target: r.target,
                relation: r.relation_type,
                category: r.relation_type.category(),
                strength: r.strength,
                valence: r.valence,
            })
            .collect(),
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// GraphML document with one node per entity and one edge per relationship.
pub fn to_graphml(graph: &KnowledgeGraph) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_graphml(graph, &mut out)?;
    Ok(out)
}

pub fn write_graphml<W: Write>(graph: &KnowledgeGraph, out: &mut W) -> fmt::Result {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#)?;
    let keys = [
        ("name", "node", "string"),
        ("type", "node", "string"),
        ("mentions", "node", "int"),
        ("verified", "node", "boolean"),
        ("relation", "edge", "string"),
        ("category", "edge", "string"),
        ("strength", "edge", "double"),
        ("valence", "edge", "double"),
    ];
    for (name, domain, ty) in keys {
        writeln!(
            out,
            r#"  <key id="{domain}_{name}" for="{domain}" attr.name="{name}" attr.type="{ty}"/>"#
        )?;
    }
    writeln!(
        out,
        r#"  <graph id="{}" edgedefault="directed">"#,
        escape_xml(graph.project_id())
    )?;

    for e in graph.entities() {
        writeln!(out, r#"    <node id="{}">"#, e.id)?;
        writeln!(out, r#"      <data key="node_name">{}</data>"#, escape_xml(&e.name))?;
        writeln!(out, r#"      <data key="node_type">{}</data>"#, e.entity_type)?;
        writeln!(out, r#"      <data key="node_mentions">{}</data>"#, e.mention_count)?;
        writeln!(out, r#"      <data key="node_verified">{}</data>"#, e.verified)?;
        writeln!(out, "    </node>")?;
    }

    for r in graph.relationships() {
        writeln!(
            out,
            r#"    <edge id="{}" source="{}" target="{}">"#,
            r.id, r.source, r.target
        )?;
        writeln!(out, r#"      <data key="edge_relation">{}</data>"#, r.relation_type)?;
        writeln!(
            out,
            r#"      <data key="edge_category">{}</data>"#,
            r.relation_type.category().as_str()
        )?;
        writeln!(out, r#"      <data key="edge_strength">{}</data>"#, r.strength)?;
        writeln!(out, r#"      <data key="edge_valence">{}</data>"#, r.valence)?;
        writeln!(out, "    </edge>")?;
    }

    writeln!(out, "  </graph>")?;
    writeln!(out, "</graphml>")
}
