use super::{normalize_url, ProviderError, SearchEngine, SearchProvider, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::OnceLock;

const ENDPOINT: &str = "https://www.bing.com/search";

struct Selectors {
    result: Selector,
    link: Selector,
    snippet: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        result: Selector::parse("li.b_algo").expect("valid result selector"),
        link: Selector::parse("h2 a").expect("valid link selector"),
        snippet: Selector::parse(".b_caption p").expect("valid snippet selector"),
    })
}

/// Bing's web results page.
pub struct BingProvider {
    client: Client,
}

impl BingProvider {
    /// Provider sharing `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn collapse<'a>(text: impl Iterator<Item = &'a str>) -> String {
    text.flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bing answers every query with a page, so an empty row set is simply no results.
fn parse(body: &str, limit: usize) -> Vec<SearchResult> {
    let doc = Html::parse_document(body);
    let sel = selectors();
    doc.select(&sel.result)
        .filter_map(|row| {
            let link = row.select(&sel.link).next()?;
            let href = link.value().attr("href")?;
            if !href.starts_with("http") {
                return None;
            }
            Some(SearchResult {
                url: normalize_url(href),
                title: collapse(link.text()),
                snippet: row
                    .select(&sel.snippet)
                    .next()
                    .map(|p| collapse(p.text()))
                    .unwrap_or_default(),
                engine: SearchEngine::Bing,
            })
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SearchProvider for BingProvider {
    fn engine(&self) -> SearchEngine {
        SearchEngine::Bing
    }

    async fn query(
        &self,
        query: &str,
        domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let q = match domain {
            Some(domain) => format!("{query} site:{domain}"),
            None => query.to_string(),
        };
        let resp = self.client.get(ENDPOINT).query(&[("q", q.as_str())]).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        // Over-collect so client-side domain filtering still has enough rows.
        Ok(parse(&body, max_results.saturating_mul(2)))
    }
}
