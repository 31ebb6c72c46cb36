pub mod failover;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod types;

pub use failover::ProviderChain;
pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use provider::LLMProvider;
pub use types::{GenerateConfig, GenerateResponse, Message, Role, Usage};
