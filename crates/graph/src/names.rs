use regex::Regex;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"()\[\]{}]"#).expect("valid punctuation pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

const ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Normalize an entity name for comparison: lowercase, strip punctuation,
/// collapse whitespace and drop a leading article.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ").to_string();

    for article in ARTICLES {
        if let Some(rest) = collapsed.strip_prefix(article) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }

    collapsed
}
