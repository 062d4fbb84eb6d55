use super::{is_domain_match, ProviderError, SearchEngine, SearchProvider, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;

/// MediaWiki full-text search against one language edition.
pub struct WikipediaProvider {
    client: Client,
    language: String,
}

impl WikipediaProvider {
    /// Provider for `language` (e.g. `en`, `de`).
    pub fn new(client: Client, language: &str) -> Self {
        let language = language.trim().to_ascii_lowercase();
        Self {
            client,
            language: if language.is_empty() { "en".to_string() } else { language },
        }
    }

    fn host(&self) -> String {
        format!("{}.wikipedia.org", self.language)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    query: Option<ApiQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    search: Vec<ApiHit>,
}

#[derive(Debug, Deserialize)]
struct ApiHit {
    title: String,
    #[serde(default)]
    snippet: String,
}

fn strip_markup(fragment: &str) -> String {
    Html::parse_fragment(fragment)
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn article_url(host: &str, title: &str) -> String {
    format!("https://{host}/wiki/{}", title.trim().replace(' ', "_"))
}

fn parse(host: &str, body: &str, max_results: usize) -> Result<Vec<SearchResult>, ProviderError> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Malformed(err.to_string()))?;
    let hits = parsed.query.map(|q| q.search).unwrap_or_default();
    Ok(hits
        .into_iter()
        .take(max_results)
        .map(|hit| SearchResult {
            url: article_url(host, &hit.title),
            snippet: strip_markup(&hit.snippet),
            title: hit.title,
            engine: SearchEngine::Wikipedia,
        })
        .collect())
}

#[async_trait]
impl SearchProvider for WikipediaProvider {
    fn engine(&self) -> SearchEngine {
        SearchEngine::Wikipedia
    }

    async fn query(
        &self,
        query: &str,
        domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let host = self.host();
        // Only one site is searchable here; other domains cannot match.
        if let Some(domain) = domain {
            if !is_domain_match(&format!("https://{host}"), domain) {
                return Ok(Vec::new());
            }
        }
        let limit = max_results.max(1).to_string();
        let resp = self
            .client
            .get(format!("https://{host}/w/api.php"))
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("format", "json"),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse(&host, &body, max_results)
    }
}
