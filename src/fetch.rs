//! Page fetching with media stripped through `lol_html`.

use async_trait::async_trait;
use futures_util::StreamExt;
use lol_html::{element, HtmlRewriter, Settings};
use reqwest::Client;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;

const USER_AGENT: &str = "fastcheck/0.1 (+https://github.com/aaronlifton/fastcrawl)";

/// Result of fetching one page. Exactly one of `content` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedHtml {
    /// URL that was requested.
    pub url: String,
    /// Cleaned HTML on success.
    pub content: Option<String>,
    /// Failure description otherwise.
    pub error: Option<String>,
}

impl FetchedHtml {
    /// Successful fetch.
    pub fn ok(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: Some(content.into()),
            error: None,
        }
    }

    /// Failed fetch.
    pub fn failed(url: impl Into<String>, error: impl ToString) -> Self {
        Self {
            url: url.into(),
            content: None,
            error: Some(error.to_string()),
        }
    }
}

/// Retrieves HTML for candidate URLs. Implementations report failures inside [`FetchedHtml`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`.
    async fn fetch(&self, url: &str) -> FetchedHtml;
}

/// reqwest-based fetcher following up to five redirects.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Builds a fetcher with a per-request timeout and a body size cap.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, max_bytes })
    }

    async fn fetch_inner(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(FetchError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::Http)?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        strip_media(&body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchedHtml {
        match self.fetch_inner(url).await {
            Ok(html) => {
                tracing::debug!(url, bytes = html.len(), "fetched page");
                FetchedHtml::ok(url, html)
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "fetch failed");
                FetchedHtml::failed(url, err)
            }
        }
    }
}

/// Removes `img`, `picture`, `svg` and `source` elements from an HTML body.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn strip_media(body: &[u8]) -> Result<String, FetchError> {
    let mut output = Vec::with_capacity(body.len());
    let handler = element!("img, picture, svg, source", |el| {
        el.remove();
        Ok(())
    });
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![handler],
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    for piece in body.chunks(16 * 1024) {
        rewriter.write(piece).map_err(FetchError::Rewrite)?;
    }
    rewriter.end().map_err(FetchError::Rewrite)?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Errors surfaced while fetching a page.
#[derive(Debug)]
pub enum FetchError {
    /// Sending the request or reading the body failed.
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Status(u16),
    /// The body exceeded the configured cap.
    TooLarge(usize),
    /// The HTML rewriter encountered malformed markup.
    Rewrite(lol_html::errors::RewritingError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Status(code) => write!(f, "unexpected status {code}"),
            Self::TooLarge(limit) => write!(f, "body larger than {limit} bytes"),
            Self::Rewrite(err) => write!(f, "html rewrite error: {err}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Rewrite(err) => Some(err),
            Self::Status(_) | Self::TooLarge(_) => None,
        }
    }
}
