//! The LLM-backed oracle.
//!
//! Wraps an Anthropic-Messages-compatible endpoint behind the [`Oracle`]
//! trait: a ring of credentials rotated on rate-limit/auth rejections,
//! per-credential token buckets, exponential backoff on transient faults,
//! and schema-validated JSON output with one corrective re-prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{OracleError, OracleResult};
use crate::ratelimit::TokenBucket;
use crate::retry::{backoff_delay, is_retryable_status, is_rotation_status};
use crate::schema::{ResponseSchema, extract_json};

/// Default Anthropic API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The single component allowed to talk to the LLM provider.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce a JSON object conforming to `schema` for the given prompt.
    async fn decide(&self, prompt: &str, schema: &ResponseSchema) -> OracleResult<Value>;
}

/// Oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Ordered credential list; rotated on 429/auth/quota rejections.
    pub api_keys: Vec<String>,
    /// Base URL of the provider.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-credential requests-per-minute quota.
    pub rate_per_minute: u32,
    /// Maximum retry attempts on one credential before rotating.
    pub max_attempts_per_key: u32,
    /// Per-attempt HTTP timeout.
    pub attempt_timeout: Duration,
    /// Max tokens per response.
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: DEFAULT_BASE_URL.into(),
            model: "claude-sonnet-4-20250514".into(),
            rate_per_minute: 60,
            max_attempts_per_key: 5,
            attempt_timeout: Duration::from_secs(30),
            max_tokens: 4096,
        }
    }
}

/// HTTP-backed [`Oracle`] implementation.
pub struct LlmOracle {
    config: OracleConfig,
    http: reqwest::Client,
    /// Rotation pointer into the credential ring.
    ring: AtomicUsize,
    /// One token bucket per credential.
    buckets: Vec<Mutex<TokenBucket>>,
}

impl LlmOracle {
    /// Create an oracle. Fails if no credentials are configured.
    pub fn new(config: OracleConfig) -> OracleResult<Self> {
        if config.api_keys.is_empty() {
            return Err(OracleError::MissingCredentials);
        }

        let http = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()?;

        let buckets = config
            .api_keys
            .iter()
            .map(|_| Mutex::new(TokenBucket::new(config.rate_per_minute)))
            .collect();

        Ok(Self {
            config,
            http,
            ring: AtomicUsize::new(0),
            buckets,
        })
    }

    /// Send one prompt through the retry/rotation machinery and return the
    /// raw text reply.
    async fn complete(&self, prompt: &str) -> OracleResult<String> {
        let key_count = self.config.api_keys.len();
        let max_total = self.config.max_attempts_per_key * key_count as u32;

        let mut attempts_on_key = 0u32;
        let mut backoff_round = 0u32;

        for total in 0..max_total {
            let idx = self.ring.load(Ordering::Relaxed) % key_count;
            self.acquire_token(idx).await;

            match self.attempt(idx, prompt).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Rotate(status)) => {
                    warn!(credential = idx, status, "rotating oracle credential");
                    self.ring.fetch_add(1, Ordering::Relaxed);
                    attempts_on_key = 0;
                }
                Err(AttemptError::Transient(reason)) => {
                    debug!(credential = idx, %reason, "transient oracle failure");
                    attempts_on_key += 1;
                    if attempts_on_key >= self.config.max_attempts_per_key {
                        self.ring.fetch_add(1, Ordering::Relaxed);
                        attempts_on_key = 0;
                    }
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }

            if total + 1 < max_total {
                tokio::time::sleep(backoff_delay(backoff_round)).await;
                backoff_round += 1;
            }
        }

        Err(OracleError::Exhausted {
            attempts: max_total,
        })
    }

    /// Wait until the credential's token bucket admits one request.
    async fn acquire_token(&self, idx: usize) {
        loop {
            let wait = {
                let mut bucket = self.buckets[idx].lock().await;
                match bucket.try_acquire() {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!(credential = idx, ?wait, "rate limited, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// One HTTP attempt against the provider.
    async fn attempt(&self, idx: usize, prompt: &str) -> Result<String, AttemptError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut headers = HeaderMap::new();
        let key = &self.config.api_keys[idx];
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(key).map_err(|e| {
                AttemptError::Fatal(OracleError::RequestFailed {
                    reason: format!("invalid API key header: {e}"),
                })
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        if is_rotation_status(status) {
            return Err(AttemptError::Rotate(status));
        }
        if is_retryable_status(status) {
            return Err(AttemptError::Transient(format!("provider returned {status}")));
        }
        if !(200..300).contains(&status) {
            return Err(AttemptError::Fatal(OracleError::RequestFailed {
                reason: format!("provider returned {status}: {text}"),
            }));
        }

        parse_text_content(&text).map_err(AttemptError::Fatal)
    }
}

/// Classification of a single attempt's failure.
enum AttemptError {
    /// Advance the credential ring (rate limit / auth / quota).
    Rotate(u16),
    /// Retry after backoff.
    Transient(String),
    /// Give up immediately.
    Fatal(OracleError),
}

/// Pull the concatenated text blocks out of a Messages API response body.
fn parse_text_content(body: &str) -> OracleResult<String> {
    let v: Value = serde_json::from_str(body).map_err(|e| OracleError::ParseFailed {
        reason: format!("invalid JSON response body: {e}"),
    })?;

    let content = v["content"]
        .as_array()
        .ok_or_else(|| OracleError::ParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let text: String = content
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    if text.is_empty() {
        return Err(OracleError::ParseFailed {
            reason: "response contained no text blocks".into(),
        });
    }
    Ok(text)
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn decide(&self, prompt: &str, schema: &ResponseSchema) -> OracleResult<Value> {
        let mut current_prompt = prompt.to_string();
        let mut last_mismatch = String::new();

        // First pass, then one corrective re-prompt on schema mismatch.
        for round in 0..2 {
            let reply = self.complete(&current_prompt).await?;

            let mismatch = match extract_json(&reply) {
                Some(value) => match schema.validate(&value) {
                    Ok(()) => return Ok(value),
                    Err(m) => m,
                },
                None => "no JSON object found in response".to_string(),
            };

            debug!(round, %mismatch, "oracle response did not match schema");
            last_mismatch = mismatch;
            current_prompt = format!(
                "{prompt}\n\nYour previous response did not match the expected format \
                 ({last_mismatch}). Return ONLY a valid JSON object matching: {}.",
                schema.describe()
            );
        }

        Err(OracleError::BadOracleResponse {
            reason: last_mismatch,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
