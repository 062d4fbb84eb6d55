use super::{normalize_url, ProviderError, SearchEngine, SearchProvider, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
// The JSON API caps `num` at 10.
const MAX_PAGE: usize = 10;

/// Google Custom Search JSON API.
pub struct GoogleApiProvider {
    client: Client,
    api_key: String,
    engine_id: String,
}

impl GoogleApiProvider {
    /// Provider for a programmable search engine `engine_id` (the `cx` parameter).
    pub fn new(client: Client, api_key: &str, engine_id: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
        }
    }
}

fn scoped_query(query: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) => format!("{query} site:{domain} -filetype:pdf"),
        None => query.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

fn parse(body: &str, max_results: usize) -> Result<Vec<SearchResult>, ProviderError> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Malformed(err.to_string()))?;
    Ok(parsed
        .items
        .into_iter()
        .filter(|item| !item.link.is_empty())
        .take(max_results)
        .map(|item| SearchResult {
            url: normalize_url(&item.link),
            title: item.title.trim().to_string(),
            snippet: item.snippet.trim().to_string(),
            engine: SearchEngine::GoogleApi,
        })
        .collect())
}

#[async_trait]
impl SearchProvider for GoogleApiProvider {
    fn engine(&self) -> SearchEngine {
        SearchEngine::GoogleApi
    }

    async fn query(
        &self,
        query: &str,
        domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let num = max_results.clamp(1, MAX_PAGE).to_string();
        let q = scoped_query(query, domain);
        let resp = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("q", q.as_str()),
                ("cx", self.engine_id.as_str()),
                ("num", num.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse(&body, max_results)
    }
}
