//! Anthropic messages API client (non-streaming).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionClient, GenerationOptions, TokenStream};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Calls the Anthropic messages API; streaming yields the whole answer at once.
pub struct AnthropicClient {
    client: Client,
    model: String,
    options: GenerationOptions,
}

impl AnthropicClient {
    /// Builds a client.
    pub fn new(api_key: &str, model: &str, options: GenerationOptions) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            client,
            model: model.to_string(),
            options,
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn stream_complete(&self, prompt: &str, system: Option<&str>) -> Result<TokenStream> {
        let answer = self.complete(prompt, system).await?;
        Ok(stream::iter([Ok(answer)]).boxed())
    }

    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(MESSAGES_URL)
            .json(&body)
            .send()
            .await
            .context("failed to call Anthropic messages API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Anthropic returned {}: {}", status, text);
        }
        let parsed: AnthropicResponse = resp
            .json()
            .await
            .context("failed to parse Anthropic response")?;
        collect_text(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn collect_text(parsed: AnthropicResponse) -> Result<String> {
    let answer = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicResponseBlock::Text { text } => Some(text),
            AnthropicResponseBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if answer.is_empty() {
        bail!("Anthropic response missing text content");
    }
    Ok(answer)
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let parsed: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"first"},{"type":"tool_use","id":"t"},{"type":"text","text":"second"}]}"#,
        )
        .expect("json");
        assert_eq!(collect_text(parsed).expect("text"), "first\nsecond");
    }

    #[test]
    fn empty_content_is_an_error() {
        let parsed: AnthropicResponse = serde_json::from_str(r#"{"content":[]}"#).expect("json");
        assert!(collect_text(parsed).is_err());
    }

    #[test]
    fn system_prompt_is_omitted_when_absent() {
        let body = AnthropicRequest {
            model: "claude",
            max_tokens: 8,
            temperature: 0.0,
            system: None,
            messages: Vec::new(),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert!(json.get("system").is_none());
    }
}
