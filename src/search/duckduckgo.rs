use super::domain::decode_redirect;
use super::{normalize_url, ProviderError, SearchEngine, SearchProvider, SearchResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::sync::OnceLock;

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";

struct Selectors {
    result: Selector,
    link: Selector,
    snippet: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        result: Selector::parse(".result").expect("valid result selector"),
        link: Selector::parse(".result__title a").expect("valid link selector"),
        snippet: Selector::parse(".result__snippet").expect("valid snippet selector"),
    })
}

/// DuckDuckGo's JavaScript-free HTML endpoint.
pub struct DuckDuckGoProvider {
    client: Client,
}

impl DuckDuckGoProvider {
    /// Provider sharing `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn collapse<'a>(text: impl Iterator<Item = &'a str>) -> String {
    let joined: String = text.collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a results page. An explicit "No results" page is an empty list; a page without any
/// result markup is treated as blocked.
fn parse(body: &str, max_results: usize) -> Result<Vec<SearchResult>, ProviderError> {
    let doc = Html::parse_document(body);
    let sel = selectors();
    let mut rows = doc.select(&sel.result).peekable();
    if rows.peek().is_none() {
        if body.contains("No results found") || body.contains("No  results.") {
            return Ok(Vec::new());
        }
        return Err(ProviderError::Blocked);
    }

    let mut results = Vec::new();
    for row in rows {
        if results.len() >= max_results {
            break;
        }
        let Some(link) = row.select(&sel.link).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let target = decode_redirect(href);
        // Sponsored rows link through the ad click tracker.
        if target.contains("duckduckgo.com/y.js") {
            continue;
        }
        let snippet = row
            .select(&sel.snippet)
            .next()
            .map(|s| collapse(s.text()))
            .unwrap_or_default();
        results.push(SearchResult {
            url: normalize_url(&target),
            title: collapse(link.text()),
            snippet,
            engine: SearchEngine::DuckDuckGo,
        });
    }
    Ok(results)
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn engine(&self) -> SearchEngine {
        SearchEngine::DuckDuckGo
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
        // 202 is the rate-limit interstitial.
        if status == StatusCode::ACCEPTED || !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse(&body, max_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><body><div id="links">
        <div class="result results_links">
          <h2 class="result__title"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fen.wikipedia.org%2Fwiki%2FEiffel_Tower&amp;rut=x">Eiffel   Tower - Wikipedia</a></h2>
          <a class="result__snippet" href="#">The <b>Eiffel Tower</b> is 330 m tall.</a>
        </div>
        <div class="result result--ad">
          <h2 class="result__title"><a href="https://duckduckgo.com/y.js?ad_provider=x">Ad</a></h2>
        </div>
        <div class="result">
          <h2 class="result__title"><a href="https://www.toureiffel.paris/en">Official site</a></h2>
        </div>
        <div class="result">
          <h2 class="result__title"><a href="https://example.org/third">Third</a></h2>
        </div>
    </div></body></html>"##;

    #[test]
    fn parses_rows_decodes_redirects_and_skips_ads() {
        let results = parse(PAGE, 5).expect("parse");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].url, "https://en.wikipedia.org/wiki/Eiffel_Tower");
        assert_eq!(results[0].title, "Eiffel Tower - Wikipedia");
        assert_eq!(results[0].snippet, "The Eiffel Tower is 330 m tall.");
        assert_eq!(results[1].url, "https://www.toureiffel.paris/en");
        assert_eq!(results[1].snippet, "");
    }

    #[test]
    fn stops_at_max_results() {
        assert_eq!(parse(PAGE, 1).expect("parse").len(), 1);
    }

    #[test]
    fn no_results_page_is_definitive() {
        let page = "<html><body><div class=\"no-results\">No results found for <b>xyzzy</b>.</div></body></html>";
        assert!(parse(page, 5).expect("parse").is_empty());
    }

    #[test]
    fn page_without_markup_is_blocked() {
        let page = "<html><body><form id=\"challenge-form\">Please verify</form></body></html>";
        assert!(matches!(parse(page, 5), Err(ProviderError::Blocked)));
    }
}
