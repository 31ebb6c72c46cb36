use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use super::provider::LLMProvider;
use super::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Chat Completions client; also speaks to any compatible server via `with_base_url`
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAIClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            url: OPENAI_API_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Full chat-completions URL, e.g. `http://localhost:11434/v1/chat/completions`
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    fn chat_request<'a>(&'a self, messages: &'a [Message], config: &'a GenerateConfig) -> ChatRequest<'a> {
        let model = Some(config.model.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model);

        let system = config
            .system_prompt
            .as_deref()
            .map(|text| ChatMessage { role: Role::System, content: text });
        let messages = system
            .into_iter()
            .chain(messages.iter().map(|m| ChatMessage {
                role: m.role,
                content: &m.text,
            }))
            .collect();

        ChatRequest {
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            messages,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ChatResponse {
    fn into_generate_response(self) -> Result<GenerateResponse> {
        let Some(choice) = self.choices.into_iter().next() else {
            bail!("No choices in OpenAI response");
        };
        if choice.finish_reason.as_deref() == Some("length") {
            warn!(model = %self.model, "Reply truncated at max_tokens");
        }

        Ok(GenerateResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: self
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            model: self.model,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn generate(
        &self,
        messages: &[Message],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.chat_request(messages, config))
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("OpenAI API error ({}): {}", status, detail);
        }

        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse OpenAI response")?
            .into_generate_response()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_leads_transcript() {
        let client = OpenAIClient::new("test-key").unwrap();
        let messages = vec![Message::user("Hello"), Message::assistant("TURN 1: hi")];
        let config = GenerateConfig {
            system_prompt: Some("Be helpful".into()),
            ..Default::default()
        };

        let body = serde_json::to_value(client.chat_request(&messages, &config)).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Be helpful");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn test_config_model_overrides_default() {
        let client = OpenAIClient::new("k").unwrap().with_model("gpt-4.1");
        let config = GenerateConfig {
            model: "gpt-4o-mini".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(client.chat_request(&[], &config)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_response_text_and_usage() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))
        .unwrap();

        let resp = resp.into_generate_response().unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.usage.total(), 15);
    }

    #[test]
    fn test_null_content_is_empty_reply() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"content": null}, "finish_reason": "length"}]
        }))
        .unwrap();
        assert!(resp.into_generate_response().unwrap().is_empty());
    }

    #[test]
    fn test_response_without_choices_fails() {
        let resp: ChatResponse =
            serde_json::from_value(json!({"model": "gpt-4o", "choices": []})).unwrap();
        assert!(resp.into_generate_response().is_err());
    }
}
