//! Remote embeddings over an OpenAI-compatible `/embeddings` endpoint.
//!
//! Runs on compute workers, so it uses the blocking client and sleeps between retries.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::Embedder;

/// Where and what to embed with.
#[derive(Debug, Clone)]
pub struct EmbeddingEndpoint {
    /// Bearer token.
    pub api_key: String,
    /// API root such as `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Requested output width, for models that support shortening.
    pub dimensions: Option<usize>,
}

/// Blocking embeddings client with retry on throttling and server errors.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
    dimensions: Option<usize>,
    attempts: usize,
    batch_size: usize,
}

enum Attempt {
    Done(Vec<Vec<f32>>),
    Retry(String),
}

impl OpenAiEmbedder {
    /// Builds a client; three attempts per batch and 64 inputs per request by default.
    pub fn new(endpoint: EmbeddingEndpoint, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!endpoint.api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!endpoint.model.trim().is_empty(), "missing embedding model name");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key.trim()))
                .context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.base_url.trim_end_matches('/')),
            model: endpoint.model,
            dimensions: endpoint.dimensions,
            attempts: 3,
            batch_size: 64,
        })
    }

    /// Total tries per batch (at least one).
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Inputs per request (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn send(&self, inputs: &[&str]) -> Result<Attempt> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = match self.client.post(&self.url).json(&request).send() {
            Ok(resp) => resp,
            Err(err) if transient_error(&err) => return Ok(Attempt::Retry(err.to_string())),
            Err(err) => return Err(err).context("embedding request failed"),
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            if transient_status(status) {
                return Ok(Attempt::Retry(format!("status {status}")));
            }
            anyhow::bail!("embedding endpoint returned {status}: {body}");
        }
        let parsed: EmbeddingResponse = resp.json().context("malformed embedding response")?;
        Ok(Attempt::Done(parsed.into_ordered(inputs.len())?))
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut last = String::new();
        for attempt in 0..self.attempts {
            if attempt > 0 {
                let wait = backoff(attempt);
                tracing::warn!(attempt, error = %last, wait_ms = wait.as_millis() as u64, "embedding batch failed, retrying");
                thread::sleep(wait);
            }
            match self.send(inputs)? {
                Attempt::Done(vectors) => return Ok(vectors),
                Attempt::Retry(reason) => last = reason,
            }
        }
        anyhow::bail!("embedding batch failed after {} attempts: {last}", self.attempts)
    }
}

fn transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(500 << attempt.min(5))
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Rows come back in any order; each input index must appear exactly once.
    fn into_ordered(self, expected: usize) -> Result<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
        for row in self.data {
            let slot = slots
                .get_mut(row.index)
                .with_context(|| format!("embedding index {} out of range", row.index))?;
            anyhow::ensure!(slot.is_none(), "duplicate embedding index {}", row.index);
            *slot = Some(row.embedding);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| slot.with_context(|| format!("missing embedding for input {idx}")))
            .collect()
    }
}
