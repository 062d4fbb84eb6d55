//! OpenAI-compatible chat completions with SSE streaming.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{byte_lines, CompletionClient, GenerationOptions, TokenStream};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streams chat completions from any OpenAI-compatible endpoint.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    model: String,
    options: GenerationOptions,
}

impl OpenAiClient {
    /// Builds a client; `base_url` is the API root such as `https://api.openai.com/v1`.
    pub fn new(api_key: &str, base_url: &str, model: &str, options: GenerationOptions) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            options,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
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
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stream: true,
            messages,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("failed to call OpenAI chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("OpenAI returned {}: {}", status, text);
        }
        let tokens = byte_lines(resp.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_event(&line),
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

/// Parses one SSE line. Only `data:` payloads carry tokens; `[DONE]` and keep-alives yield
/// nothing.
fn parse_event(line: &str) -> Option<Result<String>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => return Some(Err(anyhow!(err).context("malformed OpenAI stream event"))),
    };
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    (!content.is_empty()).then_some(Ok(content))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_events() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"rating"}}]}"#;
        assert_eq!(parse_event(line).expect("token").expect("ok"), "rating");
    }

    #[test]
    fn ignores_done_comments_and_role_only_deltas() {
        assert!(parse_event("data: [DONE]").is_none());
        assert!(parse_event(": keep-alive").is_none());
        assert!(parse_event("").is_none());
        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert!(parse_event(role_only).is_none());
    }

    #[test]
    fn rejects_missing_key() {
        let options = GenerationOptions {
            temperature: 0.0,
            max_tokens: 16,
        };
        assert!(OpenAiClient::new("", DEFAULT_BASE_URL, "gpt-4o-mini", options).is_err());
    }
}
