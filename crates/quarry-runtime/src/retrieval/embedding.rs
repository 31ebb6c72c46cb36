use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Abstraction for text → vector embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible embedding endpoint (text-embedding-3-small by default).
pub struct OpenAIEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
}

impl OpenAIEmbedding {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            url: OPENAI_EMBEDDINGS_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str, dims: usize) -> Self {
        self.model = model.to_string();
        self.dims = dims;
        self
    }

    /// Point at a compatible server; `base` is the `/v1` root
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.url = format!("{}/embeddings", base.trim_end_matches('/'));
        self
    }
}

/// Inputs per request; larger batches are split
const MAX_BATCH: usize = 64;
const MAX_RETRIES: u32 = 3;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedding {
    /// One request. 429, 5xx and transport errors are retried with backoff.
    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };
        let mut attempt = 0u32;

        loop {
            let failure = match self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => {
                    let mut data: EmbeddingResponse =
                        r.json().await.context("Failed to parse embedding response")?;
                    if data.data.len() != input.len() {
                        bail!(
                            "Embedding count mismatch: sent {}, got {}",
                            input.len(),
                            data.data.len()
                        );
                    }
                    data.data.sort_by_key(|d| d.index);
                    return Ok(data.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(r) => {
                    let status = r.status();
                    let detail = r.text().await.unwrap_or_default();
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        bail!("Embedding API error {}: {}", status, detail);
                    }
                    format!("status {}", status)
                }
                Err(e) => e.to_string(),
            };

            if attempt >= MAX_RETRIES {
                bail!("Embedding request failed after {} retries: {}", MAX_RETRIES, failure);
            }
            let delay = Duration::from_millis(500 * 2u64.pow(attempt));
            warn!(attempt, reason = %failure, delay_ms = delay.as_millis() as u64, "Embedding request failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Empty embedding response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            out.extend(self.request(batch).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Deterministic bag-of-words embedding for tests: each lowercase word is
/// hashed into one bucket, so texts sharing words point the same way.
#[cfg(test)]
pub struct MockEmbedding {
    dims: usize,
}

#[cfg(test)]
impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use sha2::{Digest, Sha256};
        let mut vec = vec![0.0f32; self.dims];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u16::from_le_bytes([hash[0], hash[1]]) as usize % self.dims;
            vec[bucket] += 1.0;
        }
        Ok(vec)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
