use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::prompt;
use crate::retry::RetryPolicy;
use crate::schema::{ExtractionOutput, SceneInput, UsageMetrics};

/// A service that proposes candidate entities and relationships for a
/// scene. Implementations hold no graph state and are shared as
/// `Arc<dyn Extractor>`.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Identifier recorded on every job this extractor runs.
    fn id(&self) -> &str;

    async fn extract(&self, input: &SceneInput) -> Result<ExtractionOutput>;
}

#[derive(Clone)]
pub struct OllamaExtractor {
    id: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    cost_per_1k_tokens: f64,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

struct Generation {
    text: String,
    usage: UsageMetrics,
}

impl OllamaExtractor {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        Self {
            id: format!("ollama:{model}"),
            base_url,
            model,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
            cost_per_1k_tokens: 0.0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, cost: f64) -> Self {
        self.cost_per_1k_tokens = cost;
        self
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ExtractError::Status(response.status().as_u16()));
        }

        let body: OllamaResponse = response.json().await?;
        let tokens = body.prompt_eval_count + body.eval_count;
        Ok(Generation {
            text: body.response,
            usage: UsageMetrics {
                prompt_tokens: body.prompt_eval_count,
                completion_tokens: body.eval_count,
                cost: tokens as f64 / 1000.0 * self.cost_per_1k_tokens,
            },
        })
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<Generation> {
        self.retry
            .retry_if("ollama_generate", || self.generate(prompt), ExtractError::is_transient)
            .await
    }
}

/// Parse model output, tolerating a markdown code fence around the JSON.
pub fn parse_output(text: &str) -> Result<ExtractionOutput> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| ExtractError::malformed(e.to_string()))
}

#[async_trait]
impl Extractor for OllamaExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, input: &SceneInput) -> Result<ExtractionOutput> {
        let prompt = prompt::build_extraction_prompt(&input.scene.id, &input.text);
        let first = self.generate_with_retry(&prompt).await?;
        let mut usage = first.usage;

        let mut output = match parse_output(&first.text) {
            Ok(output) => output,
            Err(e) => {
                // One correction round before giving up on the scene.
                warn!(
                    scene = %input.scene.id,
                    error = %e,
                    "Invalid extraction JSON, asking for a fix"
                );
                let correction =
                    prompt::build_correction_prompt(&input.scene.id, &first.text, &e.to_string());
                let fixed = self.generate_with_retry(&correction).await?;
                usage = usage + fixed.usage;
                parse_output(&fixed.text)?
            }
        };

        debug!(
            scene = %input.scene.id,
            entities = output.entities.len(),
            relationships = output.relationships.len(),
            tokens = usage.total_tokens(),
            "Extraction response parsed"
        );
        output.usage = Some(usage);
        Ok(output)
    }
}
