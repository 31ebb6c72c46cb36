use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::provider::LLMProvider;
use super::types::*;

const ATTEMPTS_PER_PROVIDER: usize = 3;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_RETRY_AFTER_SECS: u64 = 300;

/// Consecutive failures for one provider, and when it last tripped
#[derive(Default)]
struct Health {
    failures: usize,
    tripped_at: Option<Instant>,
}

/// Ordered list of providers. Each gets a few attempts on transient errors
/// before the next one is tried. A provider that keeps failing is skipped
/// until its cooldown passes.
pub struct ProviderChain {
    providers: Vec<Arc<dyn LLMProvider>>,
    health: Mutex<HashMap<String, Health>>,
    max_failures: usize,
    cooldown: Duration,
    base_backoff: Duration,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LLMProvider>>) -> Self {
        Self {
            providers,
            health: Mutex::new(HashMap::new()),
            max_failures: 5,
            cooldown: Duration::from_secs(60),
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    pub fn with_max_failures(mut self, max: usize) -> Self {
        self.max_failures = max.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    fn is_usable(&self, name: &str) -> bool {
        let Ok(health) = self.health.lock() else {
            return true;
        };
        match health.get(name).and_then(|h| h.tripped_at) {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    fn record(&self, name: &str, ok: bool) {
        let Ok(mut health) = self.health.lock() else {
            return;
        };
        let entry = health.entry(name.to_string()).or_default();
        if ok {
            *entry = Health::default();
            return;
        }
        entry.failures += 1;
        if entry.failures >= self.max_failures {
            if entry.tripped_at.is_none() {
                warn!(provider = name, failures = entry.failures, "Provider disabled");
            }
            entry.tripped_at = Some(Instant::now());
        }
    }

    fn backoff(&self, attempt: usize, error: &str) -> Duration {
        retry_after(error).unwrap_or_else(|| self.base_backoff * 2u32.pow(attempt as u32))
    }

    /// Up to ATTEMPTS_PER_PROVIDER calls; permanent errors stop early
    async fn attempt(
        &self,
        provider: &dyn LLMProvider,
        messages: &[Message],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse> {
        let mut attempt = 0;
        loop {
            match provider.generate(messages, config).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let message = e.to_string();
                    attempt += 1;
                    warn!(provider = provider.model_name(), attempt, error = %message, "LLM request failed");
                    if attempt >= ATTEMPTS_PER_PROVIDER || !is_transient(&message) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.backoff(attempt - 1, &message)).await;
                }
            }
        }
    }
}

#[async_trait]
impl LLMProvider for ProviderChain {
    async fn generate(
        &self,
        messages: &[Message],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse> {
        let mut last_error = None;
        let mut tried = 0;

        for provider in &self.providers {
            let name = provider.model_name();
            if !self.is_usable(name) {
                continue;
            }
            tried += 1;

            match self.attempt(provider.as_ref(), messages, config).await {
                Ok(response) => {
                    self.record(name, true);
                    if tried > 1 {
                        info!(provider = name, "LLM request served by fallback provider");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    self.record(name, false);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("All LLM providers are cooling down after repeated failures")))
    }

    fn model_name(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.model_name())
            .unwrap_or("chain")
    }
}

/// Delay from a `Retry-After: N` hint in an error message
fn retry_after(error: &str) -> Option<Duration> {
    let lower = error.to_ascii_lowercase();
    let rest = &lower[lower.find("retry-after")? + "retry-after".len()..];
    let secs: u64 = rest
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Rate limits and server-side errors; auth and request errors are permanent
fn is_transient(error: &str) -> bool {
    const MARKERS: [&str; 6] = ["429", "500", "502", "503", "rate limit", "overloaded"];
    let lower = error.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
