//! Federated web search over unreliable backends.
//!
//! Each [`SearchProvider`] performs one raw attempt. [`SearchFederator`] layers the shared
//! policy on top: per-attempt timeout, retry with exponential backoff for transient failures,
//! client-side domain filtering with a single unscoped re-query, and fallback across engines.

mod bing;
pub mod domain;
mod duckduckgo;
mod google_api;
mod wikipedia;

pub use bing::BingProvider;
pub use domain::{extract_domain, is_domain_match, normalize_url};
pub use duckduckgo::DuckDuckGoProvider;
pub use google_api::GoogleApiProvider;
pub use wikipedia::WikipediaProvider;

use crate::controls::SearchControls;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Supported search backends, in registry (fallback) order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SearchEngine {
    /// Google Custom Search JSON API.
    GoogleApi,
    /// DuckDuckGo HTML endpoint.
    DuckDuckGo,
    /// Bing web results page.
    Bing,
    /// MediaWiki full-text search.
    Wikipedia,
}

impl SearchEngine {
    /// Every engine in registry order.
    pub const ALL: [SearchEngine; 4] = [
        SearchEngine::GoogleApi,
        SearchEngine::DuckDuckGo,
        SearchEngine::Bing,
        SearchEngine::Wikipedia,
    ];
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GoogleApi => "google-api",
            Self::DuckDuckGo => "duck-duck-go",
            Self::Bing => "bing",
            Self::Wikipedia => "wikipedia",
        })
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Normalized result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Snippet text, possibly empty.
    pub snippet: String,
    /// Engine that produced the row.
    pub engine: SearchEngine,
}

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-success HTTP status.
    #[error("unexpected status {0}")]
    Status(u16),
    /// Transport-level failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The attempt exceeded the search timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The page carried no result markup at all (captcha or anomaly page).
    #[error("response had no result markup")]
    Blocked,
    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The engine is not in the registry.
    #[error("engine {0} is not registered")]
    Unregistered(SearchEngine),
}

impl ProviderError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status(code) => {
                let status = StatusCode::from_u16(*code).ok();
                status.is_some_and(|s| {
                    s == StatusCode::TOO_MANY_REQUESTS || s == StatusCode::ACCEPTED || s.is_server_error()
                })
            }
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request() || err.is_body(),
            Self::Timeout(_) | Self::Blocked => true,
            Self::Malformed(_) | Self::Unregistered(_) => false,
        }
    }
}

/// Contract violations of the federated search API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    /// The preferred engine has no registered provider.
    #[error("search engine {0} is not registered")]
    EngineNotRegistered(SearchEngine),
}

/// One search backend. `query` performs a single raw attempt without retries or filtering.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Engine this provider serves.
    fn engine(&self) -> SearchEngine;

    /// Issues `query`, scoped to `domain` through native syntax when given, and parses up to
    /// `max_results` rows. A definitive "no results" answer is `Ok(vec![])`.
    async fn query(
        &self,
        query: &str,
        domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Read-only map from engine to provider, built once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<SearchEngine, Arc<dyn SearchProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the provider for its engine.
    pub fn register(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.insert(provider.engine(), provider);
        self
    }

    /// Registers every built-in engine that is configured. Google is skipped without an API key
    /// and engine id.
    pub fn from_controls(controls: &SearchControls) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        let mut registry = Self::new();
        match (controls.google_api_key(), controls.google_engine_id()) {
            (Some(key), Some(cx)) => {
                registry = registry.register(Arc::new(GoogleApiProvider::new(client.clone(), key, cx)));
            }
            _ => tracing::debug!("google api search not configured"),
        }
        registry = registry
            .register(Arc::new(DuckDuckGoProvider::new(client.clone())))
            .register(Arc::new(BingProvider::new(client.clone())))
            .register(Arc::new(WikipediaProvider::new(
                client,
                controls.wikipedia_language(),
            )));
        Ok(registry)
    }

    /// Provider for `engine`.
    pub fn get(&self, engine: SearchEngine) -> Option<&Arc<dyn SearchProvider>> {
        self.providers.get(&engine)
    }

    /// Registered engines in registry order.
    pub fn engines(&self) -> Vec<SearchEngine> {
        self.providers.keys().copied().collect()
    }
}

/// Retry and fallback over a [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct SearchFederator {
    registry: Arc<ProviderRegistry>,
    controls: SearchControls,
    timeout: Duration,
}

impl SearchFederator {
    /// Wraps a registry; `timeout` bounds every single provider attempt.
    pub fn new(registry: Arc<ProviderRegistry>, controls: SearchControls, timeout: Duration) -> Self {
        Self {
            registry,
            controls,
            timeout,
        }
    }

    /// Settings in use.
    pub fn controls(&self) -> &SearchControls {
        &self.controls
    }

    /// Registry in use.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.controls.retry_delay() * 2u32.saturating_pow(attempt.min(16))
    }

    async fn attempt(
        &self,
        provider: &dyn SearchProvider,
        query: &str,
        domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, provider.query(query, domain, max_results)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };
            match outcome {
                Ok(results) => return Ok(results),
                Err(err) if err.is_transient() && (attempt as usize) < self.controls.retry_count() => {
                    let wait = self.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        engine = %provider.engine(),
                        error = %err,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "search attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs one engine with retries and domain filtering.
    ///
    /// When filtering removes every raw row, the engine is queried once more without the domain
    /// and those results are returned unfiltered.
    pub async fn search(
        &self,
        query: &str,
        domain_filter: Option<&str>,
        engine: SearchEngine,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let provider = self
            .registry
            .get(engine)
            .ok_or(ProviderError::Unregistered(engine))?;
        let raw = self
            .attempt(provider.as_ref(), query, domain_filter, max_results)
            .await?;
        let Some(domain) = domain_filter else {
            return Ok(truncate(raw, max_results));
        };

        let raw_count = raw.len();
        let filtered: Vec<SearchResult> = raw
            .into_iter()
            .filter(|result| is_domain_match(&result.url, domain))
            .collect();
        if filtered.is_empty() && raw_count > 0 {
            tracing::info!(%engine, domain, raw_count, "no results left after domain filter, broadening");
            let broad = self.attempt(provider.as_ref(), query, None, max_results).await?;
            return Ok(truncate(broad, max_results));
        }
        Ok(truncate(filtered, max_results))
    }

    /// Tries `preferred`, then each engine of `fallback_chain` once, stopping at the first
    /// non-empty result. The chain defaults to every other registered engine in registry order.
    pub async fn federated_search(
        &self,
        query: &str,
        domain_filter: Option<&str>,
        preferred: SearchEngine,
        fallback_chain: Option<&[SearchEngine]>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if self.registry.get(preferred).is_none() {
            return Err(SearchError::EngineNotRegistered(preferred));
        }
        let fallback = match fallback_chain {
            Some(chain) => chain.to_vec(),
            None => self.registry.engines(),
        };
        let mut chain = vec![preferred];
        for engine in fallback {
            if !chain.contains(&engine) {
                chain.push(engine);
            }
        }

        let max_results = self.controls.max_results();
        for engine in chain {
            if self.registry.get(engine).is_none() {
                tracing::debug!(%engine, "fallback engine not registered, skipping");
                continue;
            }
            match self.search(query, domain_filter, engine, max_results).await {
                Ok(results) if !results.is_empty() => {
                    tracing::debug!(%engine, count = results.len(), "search succeeded");
                    return Ok(results);
                }
                Ok(_) => tracing::debug!(%engine, "no results, trying next in chain"),
                Err(err) => {
                    tracing::warn!(%engine, error = %err, "provider failed, trying next in chain")
                }
            }
        }
        tracing::info!(query, domain = domain_filter.unwrap_or(""), "no search results from any engine");
        Ok(Vec::new())
    }

    /// General search plus one domain-scoped search per extra domain, deduplicated by normalized
    /// URL, without `exclude_url`, capped at `max_results × (1 + extra domains)`.
    pub async fn gather(
        &self,
        query: &str,
        extra_domains: &[String],
        exclude_url: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let preferred = self.controls.preferred_engine();
        let fallback = self.controls.fallback_chain();
        let mut batches = vec![self.federated_search(query, None, preferred, fallback).await?];
        for domain in extra_domains {
            batches.push(
                self.federated_search(query, Some(domain), preferred, fallback)
                    .await?,
            );
        }

        let cap = self.controls.max_results() * (1 + extra_domains.len());
        let mut seen: HashSet<String> = exclude_url.map(normalize_url).into_iter().collect();
        let mut merged = Vec::new();
        for result in batches.into_iter().flatten() {
            if merged.len() >= cap {
                break;
            }
            if seen.insert(normalize_url(&result.url)) {
                merged.push(result);
            }
        }
        Ok(merged)
    }
}

fn truncate(mut results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    results.truncate(max_results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Scripted = Result<Vec<SearchResult>, ProviderError>;

    struct MockProvider {
        engine: SearchEngine,
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
        domains: Mutex<Vec<Option<String>>>,
    }

    impl MockProvider {
        fn new(engine: SearchEngine, script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                engine,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                domains: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchProvider for MockProvider {
        fn engine(&self) -> SearchEngine {
            self.engine
        }

        async fn query(
            &self,
            _query: &str,
            domain: Option<&str>,
            _max_results: usize,
        ) -> Result<Vec<SearchResult>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.domains
                .lock()
                .expect("domains")
                .push(domain.map(str::to_string));
            self.script
                .lock()
                .expect("script")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn hit(url: &str, engine: SearchEngine) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: format!("title of {url}"),
            snippet: String::new(),
            engine,
        }
    }

    fn federator(providers: &[Arc<MockProvider>]) -> SearchFederator {
        let registry = providers.iter().fold(ProviderRegistry::new(), |reg, p| {
            reg.register(Arc::clone(p) as Arc<dyn SearchProvider>)
        });
        let controls = SearchControls::default()
            .with_preferred_engine(SearchEngine::DuckDuckGo)
            .with_retry(2, Duration::from_millis(100));
        SearchFederator::new(Arc::new(registry), controls, Duration::from_secs(10))
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn all_empty_calls_each_engine_once() {
        let ddg = MockProvider::new(SearchEngine::DuckDuckGo, vec![]);
        let bing = MockProvider::new(SearchEngine::Bing, vec![]);
        let wiki = MockProvider::new(SearchEngine::Wikipedia, vec![]);
        let fed = federator(&[ddg.clone(), bing.clone(), wiki.clone()]);
        let results = fed
            .federated_search("q", None, SearchEngine::DuckDuckGo, None)
            .await
            .expect("registered");
        assert!(results.is_empty());
        assert_eq!((ddg.calls(), bing.calls(), wiki.calls()), (1, 1, 1));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transient_failures_retry_then_fall_back() {
        let ddg = MockProvider::new(
            SearchEngine::DuckDuckGo,
            vec![
                Err(ProviderError::Status(503)),
                Err(ProviderError::Status(429)),
                Err(ProviderError::Status(202)),
            ],
        );
        let bing = MockProvider::new(
            SearchEngine::Bing,
            vec![Ok(vec![hit("https://b.example/1", SearchEngine::Bing)])],
        );
        let fed = federator(&[ddg.clone(), bing.clone()]);
        let started = tokio::time::Instant::now();
        let results = fed
            .federated_search("q", None, SearchEngine::DuckDuckGo, None)
            .await
            .expect("registered");
        assert_eq!(ddg.calls(), 3);
        assert_eq!(results[0].engine, SearchEngine::Bing);
        // 100ms then 200ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let ddg = MockProvider::new(
            SearchEngine::DuckDuckGo,
            vec![Err(ProviderError::Malformed("bad json".into()))],
        );
        let fed = federator(&[ddg.clone()]);
        let err = fed
            .search("q", None, SearchEngine::DuckDuckGo, 5)
            .await
            .expect_err("malformed");
        assert!(!err.is_transient());
        assert_eq!(ddg.calls(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fully_filtered_results_trigger_unscoped_requery() {
        let ddg = MockProvider::new(
            SearchEngine::DuckDuckGo,
            vec![
                Ok(vec![hit("https://other.example/a", SearchEngine::DuckDuckGo)]),
                Ok(vec![
                    hit("https://other.example/a", SearchEngine::DuckDuckGo),
                    hit("https://third.example/b", SearchEngine::DuckDuckGo),
                ]),
            ],
        );
        let fed = federator(&[ddg.clone()]);
        let results = fed
            .search("q", Some("wanted.example"), SearchEngine::DuckDuckGo, 5)
            .await
            .expect("results");
        assert_eq!(results.len(), 2);
        let domains = ddg.domains.lock().expect("domains").clone();
        assert_eq!(domains, vec![Some("wanted.example".to_string()), None]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn domain_filter_keeps_subdomains() {
        let ddg = MockProvider::new(
            SearchEngine::DuckDuckGo,
            vec![Ok(vec![
                hit("https://news.wanted.example/a", SearchEngine::DuckDuckGo),
                hit("https://elsewhere.example/b", SearchEngine::DuckDuckGo),
            ])],
        );
        let fed = federator(&[ddg.clone()]);
        let results = fed
            .search("q", Some("wanted.example"), SearchEngine::DuckDuckGo, 5)
            .await
            .expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(ddg.calls(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unregistered_preferred_engine_fails_fast() {
        let fed = federator(&[MockProvider::new(SearchEngine::Bing, vec![])]);
        assert_eq!(
            fed.federated_search("q", None, SearchEngine::GoogleApi, None).await,
            Err(SearchError::EngineNotRegistered(SearchEngine::GoogleApi))
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_provider_times_out_and_falls_back() {
        struct Stalled;

        #[async_trait]
        impl SearchProvider for Stalled {
            fn engine(&self) -> SearchEngine {
                SearchEngine::DuckDuckGo
            }

            async fn query(
                &self,
                _query: &str,
                _domain: Option<&str>,
                _max_results: usize,
            ) -> Result<Vec<SearchResult>, ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }

        let wiki = MockProvider::new(
            SearchEngine::Wikipedia,
            vec![Ok(vec![hit("https://en.wikipedia.org/wiki/Paris", SearchEngine::Wikipedia)])],
        );
        let registry = ProviderRegistry::new()
            .register(Arc::new(Stalled))
            .register(wiki.clone());
        let controls = SearchControls::default().with_retry(0, Duration::from_millis(1));
        let fed = SearchFederator::new(Arc::new(registry), controls, Duration::from_secs(2));
        let results = fed
            .federated_search("paris", None, SearchEngine::DuckDuckGo, None)
            .await
            .expect("registered");
        assert_eq!(results[0].engine, SearchEngine::Wikipedia);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn gather_merges_dedups_and_excludes_origin() {
        let ddg = MockProvider::new(
            SearchEngine::DuckDuckGo,
            vec![
                Ok(vec![
                    hit("https://origin.example/page", SearchEngine::DuckDuckGo),
                    hit("https://a.example/1", SearchEngine::DuckDuckGo),
                    hit("https://wiki.example/x", SearchEngine::DuckDuckGo),
                ]),
                Ok(vec![
                    hit("https://wiki.example/x/", SearchEngine::DuckDuckGo),
                    hit("https://wiki.example/y", SearchEngine::DuckDuckGo),
                ]),
            ],
        );
        let fed = federator(&[ddg.clone()]);
        let results = fed
            .gather("q", &["wiki.example".to_string()], Some("https://ORIGIN.example/page#top"))
            .await
            .expect("gather");
        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/1", "https://wiki.example/x", "https://wiki.example/y"]
        );
    }
}
