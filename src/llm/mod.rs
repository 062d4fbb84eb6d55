//! Text-completion clients used for query generation, summaries and explanations.

mod anthropic;
mod ollama;
mod openai;
pub mod prompts;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use prompts::PromptSet;

use crate::controls::LlmControls;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Token stream from a streaming completion.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// An LLM that turns a prompt into text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Streams the completion token by token.
    async fn stream_complete(&self, prompt: &str, system: Option<&str>) -> Result<TokenStream>;

    /// Full completion; collects [`CompletionClient::stream_complete`] by default.
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let mut tokens = self.stream_complete(prompt, system).await?;
        let mut reply = String::new();
        while let Some(token) = tokens.next().await {
            reply.push_str(&token?);
        }
        Ok(reply)
    }

    /// Model identifier for logs.
    fn model(&self) -> &str;
}

/// Built-in completion backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProviderKind {
    /// Local Ollama server (`/api/chat`).
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "open-ai",
            Self::Anthropic => "anthropic",
        })
    }
}

/// Shared generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
}

/// Builds the configured client.
pub fn build_client(controls: &LlmControls) -> Result<Arc<dyn CompletionClient>> {
    let options = GenerationOptions {
        temperature: controls.temperature(),
        max_tokens: controls.max_tokens(),
    };
    let client: Arc<dyn CompletionClient> = match controls.provider() {
        LlmProviderKind::Ollama => Arc::new(OllamaClient::new(
            controls.base_url().unwrap_or(ollama::DEFAULT_HOST),
            controls.model(),
            options,
        )?),
        LlmProviderKind::OpenAi => Arc::new(OpenAiClient::new(
            controls.api_key().context("OpenAI provider requires an API key")?,
            controls.base_url().unwrap_or(openai::DEFAULT_BASE_URL),
            controls.model(),
            options,
        )?),
        LlmProviderKind::Anthropic => Arc::new(AnthropicClient::new(
            controls
                .api_key()
                .context("Anthropic provider requires an API key")?,
            controls.model(),
            options,
        )?),
    };
    tracing::info!(provider = %controls.provider(), model = client.model(), "completion client ready");
    Ok(client)
}

/// Splits a byte stream into lines (without terminators). A trailing partial line is yielded at
/// the end; a transport error ends the stream after being yielded.
pub(crate) fn byte_lines<S, B, E>(bytes: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    struct State<S> {
        inner: std::pin::Pin<Box<S>>,
        buffer: Vec<u8>,
        done: bool,
    }

    let state = State {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(text), state));
            }
            if state.done {
                if state.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut state.buffer);
                return Some((Ok(String::from_utf8_lossy(&rest).into_owned()), state));
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    state.done = true;
                    state.buffer.clear();
                    return Some((Err(anyhow::Error::new(err).context("completion stream broke")), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}
