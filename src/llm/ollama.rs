//! Ollama `/api/chat` client with NDJSON streaming.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{byte_lines, CompletionClient, GenerationOptions, TokenStream};

pub(crate) const DEFAULT_HOST: &str = "http://localhost:11434";

/// Streams chat completions from a local Ollama server.
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    options: GenerationOptions,
}

impl OllamaClient {
    /// Creates a client for `host` (e.g. `http://localhost:11434`).
    pub fn new(host: &str, model: &str, options: GenerationOptions) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing Ollama model name");
        let client = Client::builder()
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.to_string(),
            options,
        })
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn stream_complete(&self, prompt: &str, system: Option<&str>) -> Result<TokenStream> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            options: ChatOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("failed to call Ollama chat API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Ollama returned {}: {}", status, text);
        }
        let tokens = byte_lines(resp.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_line(&line),
                    Err(err) => Some(Err(err)),
                }
            })
            .boxed();
        Ok(tokens)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Parses one NDJSON line into a token; blank lines and empty deltas yield nothing.
fn parse_line(line: &str) -> Option<Result<String>> {
    if line.trim().is_empty() {
        return None;
    }
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(err) => return Some(Err(anyhow!(err).context("malformed Ollama stream line"))),
    };
    if let Some(error) = chunk.error {
        return Some(Err(anyhow!("Ollama stream error: {error}")));
    }
    chunk
        .message
        .map(|message| message.content)
        .filter(|content| !content.is_empty())
        .map(Ok)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<AssistantMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}
