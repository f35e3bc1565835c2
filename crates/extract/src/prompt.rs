use graph::{EntityType, RelationType};

fn entity_types() -> String {
    EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn relation_types() -> String {
    RelationType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_extraction_prompt(scene_id: &str, scene_text: &str) -> String {
    format!(
        r#"Extract the narrative entities and relationships from the following scene of a story.

INSTRUCTIONS:
1. Identify characters, locations, objects, concepts, events, organizations and themes
2. Extract relationships between the entities you found
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"id": "E1", "name": "EntityName", "type": "{types}", "description": "brief description", "aliases": ["other names"], "attributes": {{}}, "confidence": 0.9}}
  ],
  "relationships": [
    {{"source": "E1", "target": "E2", "relation": "relation_type", "description": "brief description", "evidence": "quote from text", "strength": 0.5, "valence": 0.0, "confidence": 0.9}}
  ]
}}

RULES:
- Use sequential IDs: E1, E2, E3, etc.
- Entity types must be one of: {types}
- Relation types must be one of: {relations}
- valence is between -1.0 (hostile) and 1.0 (warm); strength and confidence are between 0.0 and 1.0
- For characters, attributes may include age, role, occupation, affiliation
- For events, attributes may include sequence and plot_thread ("open" or "resolved")
- Evidence must be a direct quote from the text
- Output ONLY the JSON object, no markdown, no explanations

SCENE {scene_id}:
{scene_text}

JSON OUTPUT:"#,
        types = entity_types(),
        relations = relation_types(),
    )
}

/// Correction round for a scene whose first answer did not parse as the
/// candidate schema.
pub fn build_correction_prompt(scene_id: &str, rejected_output: &str, parse_error: &str) -> String {
    format!(
        r#"Your answer for scene {scene_id} could not be read as the candidate schema ({parse_error}).

PREVIOUS ANSWER:
{rejected_output}

Rewrite it as one JSON object with two arrays:
- "entities": objects with "id", "name", "type", "description", "aliases", "attributes", "confidence"
- "relationships": objects with "source", "target", "relation", "description", "evidence", "strength", "valence", "confidence"

Keep every entity and relationship you already found. Entity types must be one of: {types}
Relation types must be one of: {relations}
"source" and "target" refer to entity ids or names. "evidence" stays a direct quote from the scene.
Output ONLY the JSON object, no markdown, no explanations.

JSON OUTPUT:"#,
        types = entity_types(),
        relations = relation_types(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_taxonomy() {
        let prompt = build_extraction_prompt("s7", "Mickey lit a cigarette.");
        assert!(prompt.contains("character|location|object|concept|event|organization|theme"));
        assert!(prompt.contains("contrasts_with"));
        assert!(prompt.contains("SCENE s7:\nMickey lit a cigarette."));
    }

    #[test]
    fn test_correction_prompt_carries_context() {
        let prompt = build_correction_prompt("s7", "{\"entities\": [", "EOF while parsing");
        assert!(prompt.contains("scene s7"));
        assert!(prompt.contains("(EOF while parsing)"));
        assert!(prompt.contains("PREVIOUS ANSWER:\n{\"entities\": ["));
        assert!(prompt.contains("\"relationships\": objects with \"source\""));
        assert!(prompt.contains("works_for"));
    }
}
