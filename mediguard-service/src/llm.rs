//! Generation backend abstraction. The pipeline treats the backend as an
//! opaque `generate(prompt) -> text` call and never trusts its output; all
//! responses go through the extractor before use. No retries, no streaming.

use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};

/// Opaque text-generation backend used by the identity and billing stages
/// (and the optional LLM discharge variant).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

const PREAMBLE: &str = "You are a MediGuard analysis agent. You MUST respond with \
ONLY valid JSON, no markdown, no explanations, just raw JSON.";

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// OpenRouter-backed implementation.
pub struct OpenRouterBackend {
    api_key: String,
    model: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build from `OPENROUTER_API_KEY` and optional `MODEL_NAME`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let model = std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }
}

#[async_trait]
impl GenerationBackend for OpenRouterBackend {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let client = openrouter::Client::new(&self.api_key);
        let agent = client.agent(&self.model).preamble(PREAMBLE).build();
        let response = agent.prompt(prompt).await?;
        Ok(response)
    }
}
