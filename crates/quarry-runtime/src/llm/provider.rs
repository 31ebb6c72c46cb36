use anyhow::Result;
use async_trait::async_trait;

use super::types::{GenerateConfig, GenerateResponse, Message};

/// LLM provider trait - the agent treats the model as opaque text in, text out
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a reply for the full transcript (non-streaming)
    async fn generate(
        &self,
        messages: &[Message],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse>;

    /// Provider model name for logging/tracking
    fn model_name(&self) -> &str;
}
