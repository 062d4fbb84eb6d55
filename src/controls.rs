//! Verification pipeline knobs: typed settings, the shared CLI, and TOML loading.

use crate::embedder::EmbedderKind;
use crate::llm::{LlmProviderKind, PromptSet};
use crate::search::SearchEngine;
use crate::selector::StrategyKind;
use crate::verifier::BestMatchPolicy;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Rejected or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for these settings.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Chunk bounds are inverted or zero.
    #[error("min_chunk_size {min} must be positive and not exceed max_chunk_size {max}")]
    ChunkBounds {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A ratio lies outside `[0, 1]`.
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange {
        /// Offending setting.
        field: &'static str,
        /// Configured value.
        value: f64,
    },
    /// A count that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Chunk size bounds in characters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentControls {
    min_chunk_size: usize,
    max_chunk_size: usize,
}

impl SegmentControls {
    /// Bounds for every chunk except possibly a document's last one.
    pub fn new(min_chunk_size: usize, max_chunk_size: usize) -> Self {
        Self {
            min_chunk_size,
            max_chunk_size,
        }
    }

    /// Smallest chunk the packer aims for.
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// Hard upper bound on chunk length.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl Default for SegmentControls {
    fn default() -> Self {
        Self::new(250, 500)
    }
}

/// Which chunks get compared, and how many.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorControls {
    strategy: StrategyKind,
    lambda: f64,
    centrality_weight: f64,
    min_topic_similarity: f64,
    claims: usize,
    candidate_chunks: usize,
    best_match: BestMatchPolicy,
    embedder: EmbedderKind,
    embedding_model: String,
    embedding_base_url: Option<String>,
    embedding_api_key: Option<String>,
}

impl SelectorControls {
    /// Importance strategy.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// MMR trade-off between importance (1.0) and diversity (0.0).
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Weight of centrality against centroid proximity in the centroid strategy.
    pub fn centrality_weight(&self) -> f64 {
        self.centrality_weight
    }

    /// Similarity needed to share a topic in topic-covering selection.
    pub fn min_topic_similarity(&self) -> f64 {
        self.min_topic_similarity
    }

    /// Claims selected from the user's page.
    pub fn claims(&self) -> usize {
        self.claims
    }

    /// Chunks selected and retrieved per candidate page.
    pub fn candidate_chunks(&self) -> usize {
        self.candidate_chunks
    }

    /// Reduction used to pick the best match.
    pub fn best_match(&self) -> BestMatchPolicy {
        self.best_match
    }

    /// Embedding backend for the centroid strategy.
    pub fn embedder(&self) -> EmbedderKind {
        self.embedder
    }

    /// Remote embedding model name.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Remote embedding API root.
    pub fn embedding_base_url(&self) -> Option<&str> {
        self.embedding_base_url.as_deref()
    }

    /// Remote embedding API key.
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding_api_key.as_deref()
    }

    /// Replaces the strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces λ.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Replaces the claim and per-candidate chunk counts.
    pub fn with_counts(mut self, claims: usize, candidate_chunks: usize) -> Self {
        self.claims = claims;
        self.candidate_chunks = candidate_chunks;
        self
    }

    /// Replaces the best-match policy.
    pub fn with_best_match(mut self, policy: BestMatchPolicy) -> Self {
        self.best_match = policy;
        self
    }

    /// Uses a remote embedding backend.
    pub fn with_remote_embedder(
        mut self,
        model: impl Into<String>,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        self.embedder = EmbedderKind::OpenAi;
        self.embedding_model = model.into();
        self.embedding_base_url = base_url;
        self.embedding_api_key = api_key;
        self
    }
}

impl Default for SelectorControls {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            lambda: 0.6,
            centrality_weight: 0.3,
            min_topic_similarity: 0.15,
            claims: 3,
            candidate_chunks: 3,
            best_match: BestMatchPolicy::default(),
            embedder: EmbedderKind::default(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_base_url: None,
            embedding_api_key: None,
        }
    }
}

/// Search engines, retries and result limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchControls {
    preferred_engine: SearchEngine,
    fallback_chain: Option<Vec<SearchEngine>>,
    max_results: usize,
    retry_count: usize,
    #[serde(with = "secs")]
    retry_delay: Duration,
    extra_domains: Vec<String>,
    google_api_key: Option<String>,
    google_engine_id: Option<String>,
    wikipedia_language: String,
}

impl SearchControls {
    /// Engine tried first.
    pub fn preferred_engine(&self) -> SearchEngine {
        self.preferred_engine
    }

    /// Explicit fallback order; `None` means every registered engine in registry order.
    pub fn fallback_chain(&self) -> Option<&[SearchEngine]> {
        self.fallback_chain.as_deref()
    }

    /// Results kept per engine call.
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Retries after the first attempt for transient failures.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// Base backoff, doubled per retry.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Domains searched in addition to the general query.
    pub fn extra_domains(&self) -> &[String] {
        &self.extra_domains
    }

    /// Google Custom Search API key.
    pub fn google_api_key(&self) -> Option<&str> {
        self.google_api_key.as_deref()
    }

    /// Google programmable search engine id (`cx`).
    pub fn google_engine_id(&self) -> Option<&str> {
        self.google_engine_id.as_deref()
    }

    /// Wikipedia edition searched by the Wikipedia engine.
    pub fn wikipedia_language(&self) -> &str {
        &self.wikipedia_language
    }

    /// Replaces the preferred engine.
    pub fn with_preferred_engine(mut self, engine: SearchEngine) -> Self {
        self.preferred_engine = engine;
        self
    }

    /// Replaces the fallback chain.
    pub fn with_fallback_chain(mut self, chain: Option<Vec<SearchEngine>>) -> Self {
        self.fallback_chain = chain;
        self
    }

    /// Replaces the per-call result cap.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Replaces retry count and base delay.
    pub fn with_retry(mut self, retry_count: usize, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    /// Replaces the extra domains.
    pub fn with_extra_domains(mut self, domains: Vec<String>) -> Self {
        self.extra_domains = domains;
        self
    }

    /// Enables the Google API engine.
    pub fn with_google(mut self, api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        self.google_api_key = Some(api_key.into());
        self.google_engine_id = Some(engine_id.into());
        self
    }
}

impl Default for SearchControls {
    fn default() -> Self {
        Self {
            preferred_engine: SearchEngine::DuckDuckGo,
            fallback_chain: None,
            max_results: 5,
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            extra_domains: Vec::new(),
            google_api_key: None,
            google_engine_id: None,
            wikipedia_language: "en".to_string(),
        }
    }
}

/// Per-call timeouts, the request deadline and concurrency bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutControls {
    #[serde(with = "secs")]
    search_timeout: Duration,
    #[serde(with = "secs")]
    fetch_timeout: Duration,
    #[serde(with = "secs")]
    llm_timeout: Duration,
    #[serde(with = "secs")]
    request_deadline: Duration,
    max_concurrent_candidates: usize,
    compute_threads: usize,
    max_page_bytes: usize,
}

impl TimeoutControls {
    /// Bound on one search provider attempt.
    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    /// Bound on one page fetch.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Bound on one LLM call, including streaming.
    pub fn llm_timeout(&self) -> Duration {
        self.llm_timeout
    }

    /// Bound on one whole claim verification.
    pub fn request_deadline(&self) -> Duration {
        self.request_deadline
    }

    /// Candidate pages processed at once.
    pub fn max_concurrent_candidates(&self) -> usize {
        self.max_concurrent_candidates
    }

    /// Compute pool size.
    pub fn compute_threads(&self) -> usize {
        self.compute_threads
    }

    /// Largest page body accepted by the fetcher.
    pub fn max_page_bytes(&self) -> usize {
        self.max_page_bytes
    }

    /// Replaces the per-call timeouts.
    pub fn with_call_timeouts(mut self, search: Duration, fetch: Duration, llm: Duration) -> Self {
        self.search_timeout = search;
        self.fetch_timeout = fetch;
        self.llm_timeout = llm;
        self
    }

    /// Replaces the request deadline.
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// Replaces the concurrency bounds.
    pub fn with_concurrency(mut self, candidates: usize, compute_threads: usize) -> Self {
        self.max_concurrent_candidates = candidates;
        self.compute_threads = compute_threads;
        self
    }
}

impl Default for TimeoutControls {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(15),
            llm_timeout: Duration::from_secs(90),
            request_deadline: Duration::from_secs(300),
            max_concurrent_candidates: 4,
            compute_threads: 4,
            max_page_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Completion backend selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmControls {
    provider: LlmProviderKind,
    model: String,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmControls {
    /// Backend kind.
    pub fn provider(&self) -> LlmProviderKind {
        self.provider
    }

    /// Model name passed to the backend.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// API root override.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// API key, required by hosted backends.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Sampling temperature.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Generated token cap.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Replaces provider and model.
    pub fn with_backend(mut self, provider: LlmProviderKind, model: impl Into<String>) -> Self {
        self.provider = provider;
        self.model = model.into();
        self
    }

    /// Replaces endpoint and credentials.
    pub fn with_endpoint(mut self, base_url: Option<String>, api_key: Option<String>) -> Self {
        self.base_url = base_url;
        self.api_key = api_key;
        self
    }

    /// Replaces sampling settings.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for LlmControls {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: "tulu3".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.1,
            max_tokens: 512,
        }
    }
}

/// Everything one verifier needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierControls {
    segment: SegmentControls,
    selector: SelectorControls,
    search: SearchControls,
    timeouts: TimeoutControls,
    llm: LlmControls,
    prompts: PromptSet,
}

impl VerifierControls {
    /// Assembles controls from their parts with default prompts.
    pub fn new(
        segment: SegmentControls,
        selector: SelectorControls,
        search: SearchControls,
        timeouts: TimeoutControls,
        llm: LlmControls,
    ) -> Self {
        Self {
            segment,
            selector,
            search,
            timeouts,
            llm,
            prompts: PromptSet::default(),
        }
    }

    /// Parses TOML; missing tables and keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let controls: Self = toml::from_str(text)?;
        controls.validate()?;
        Ok(controls)
    }

    /// Reads and parses a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects settings no run could honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.segment.min_chunk_size, self.segment.max_chunk_size);
        if min == 0 || min > max {
            return Err(ConfigError::ChunkBounds { min, max });
        }
        for (field, value) in [
            ("lambda", self.selector.lambda),
            ("centrality_weight", self.selector.centrality_weight),
            ("min_topic_similarity", self.selector.min_topic_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        if self.timeouts.compute_threads == 0 {
            return Err(ConfigError::Zero("compute_threads"));
        }
        if self.timeouts.max_concurrent_candidates == 0 {
            return Err(ConfigError::Zero("max_concurrent_candidates"));
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::Zero("max_results"));
        }
        Ok(())
    }

    /// Chunk bounds.
    pub fn segment(&self) -> &SegmentControls {
        &self.segment
    }

    /// Selection settings.
    pub fn selector(&self) -> &SelectorControls {
        &self.selector
    }

    /// Search settings.
    pub fn search(&self) -> &SearchControls {
        &self.search
    }

    /// Timeouts and concurrency.
    pub fn timeouts(&self) -> &TimeoutControls {
        &self.timeouts
    }

    /// Completion backend.
    pub fn llm(&self) -> &LlmControls {
        &self.llm
    }

    /// Prompt templates.
    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    /// Replaces the prompt templates.
    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }
}

/// Command-line interface shared by binaries that run the pipeline.
#[derive(Parser, Debug, Clone)]
#[command(name = "fastcheck", about = "Claim verification controls")]
pub struct Cli {
    /// TOML settings file; when given it replaces every flag below
    #[arg(long, env = "FASTCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Minimum chunk length in characters
    #[arg(long, env = "FASTCHECK_MIN_CHUNK", default_value_t = 250)]
    pub min_chunk_size: usize,

    /// Maximum chunk length in characters
    #[arg(long, env = "FASTCHECK_MAX_CHUNK", default_value_t = 500)]
    pub max_chunk_size: usize,

    /// Importance strategy for chunk selection
    #[arg(long, env = "FASTCHECK_STRATEGY", value_enum, default_value = "lexical")]
    pub strategy: StrategyKind,

    /// MMR trade-off between importance and diversity
    #[arg(long, env = "FASTCHECK_LAMBDA", default_value_t = 0.6)]
    pub lambda: f64,

    /// Centrality weight of the embedding-centroid strategy
    #[arg(long, env = "FASTCHECK_CENTRALITY_WEIGHT", default_value_t = 0.3)]
    pub centrality_weight: f64,

    /// Claims selected per page
    #[arg(long, env = "FASTCHECK_CLAIMS", default_value_t = 3)]
    pub claims: usize,

    /// Chunks compared per candidate page
    #[arg(long, env = "FASTCHECK_CANDIDATE_CHUNKS", default_value_t = 3)]
    pub candidate_chunks: usize,

    /// How the best match is chosen
    #[arg(long, env = "FASTCHECK_BEST_MATCH", value_enum, default_value = "max-absolute")]
    pub best_match: BestMatchPolicy,

    /// Embedding backend for the centroid strategy
    #[arg(long, env = "FASTCHECK_EMBEDDER", value_enum, default_value = "hashing")]
    pub embedder: EmbedderKind,

    /// Remote embedding model
    #[arg(long, env = "FASTCHECK_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    /// Remote embedding API root
    #[arg(long, env = "FASTCHECK_EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// Remote embedding API key
    #[arg(long, env = "FASTCHECK_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Preferred search engine
    #[arg(long, env = "FASTCHECK_ENGINE", value_enum, default_value = "duck-duck-go")]
    pub engine: SearchEngine,

    /// Fallback engines in order, comma separated (default: all registered)
    #[arg(long, env = "FASTCHECK_FALLBACK", value_enum, value_delimiter = ',')]
    pub fallback: Vec<SearchEngine>,

    /// Results kept per engine call
    #[arg(long, env = "FASTCHECK_MAX_RESULTS", default_value_t = 5)]
    pub max_results: usize,

    /// Retries after a transient search failure
    #[arg(long, env = "FASTCHECK_RETRY_COUNT", default_value_t = 2)]
    pub retry_count: usize,

    /// Base search backoff in milliseconds
    #[arg(long, env = "FASTCHECK_RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Extra domains searched besides the general query, comma separated
    #[arg(long, env = "FASTCHECK_EXTRA_DOMAINS", default_value = "")]
    pub extra_domains: String,

    /// Google Custom Search API key
    #[arg(long, env = "FASTCHECK_GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Google programmable search engine id
    #[arg(long, env = "FASTCHECK_GOOGLE_ENGINE_ID")]
    pub google_engine_id: Option<String>,

    /// Wikipedia language edition
    #[arg(long, env = "FASTCHECK_WIKIPEDIA_LANG", default_value = "en")]
    pub wikipedia_language: String,

    /// Seconds allowed per search attempt
    #[arg(long, env = "FASTCHECK_SEARCH_TIMEOUT", default_value_t = 10)]
    pub search_timeout_secs: u64,

    /// Seconds allowed per page fetch
    #[arg(long, env = "FASTCHECK_FETCH_TIMEOUT", default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    /// Seconds allowed per LLM call
    #[arg(long, env = "FASTCHECK_LLM_TIMEOUT", default_value_t = 90)]
    pub llm_timeout_secs: u64,

    /// Seconds allowed per claim verification
    #[arg(long, env = "FASTCHECK_DEADLINE", default_value_t = 300)]
    pub request_deadline_secs: u64,

    /// Candidate pages processed concurrently
    #[arg(long, env = "FASTCHECK_CONCURRENCY", default_value_t = 4)]
    pub max_concurrent_candidates: usize,

    /// Compute pool threads
    #[arg(long, env = "FASTCHECK_THREADS", default_value_t = 4)]
    pub compute_threads: usize,

    /// Completion backend
    #[arg(long, env = "FASTCHECK_LLM_PROVIDER", value_enum, default_value = "ollama")]
    pub llm_provider: LlmProviderKind,

    /// Completion model
    #[arg(long, env = "FASTCHECK_LLM_MODEL", default_value = "tulu3")]
    pub llm_model: String,

    /// Completion API root
    #[arg(long, env = "FASTCHECK_LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Completion API key
    #[arg(long, env = "FASTCHECK_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "FASTCHECK_TEMPERATURE", default_value_t = 0.1)]
    pub temperature: f32,

    /// Generated token cap
    #[arg(long, env = "FASTCHECK_MAX_TOKENS", default_value_t = 512)]
    pub max_tokens: usize,
}

impl Cli {
    /// Converts the parsed CLI into validated `VerifierControls`. A `--config` file wins.
    pub fn build_controls(&self) -> Result<VerifierControls, ConfigError> {
        if let Some(path) = &self.config {
            return VerifierControls::from_toml_file(path);
        }
        let mut selector = SelectorControls::default()
            .with_strategy(self.strategy)
            .with_lambda(self.lambda)
            .with_counts(self.claims, self.candidate_chunks)
            .with_best_match(self.best_match);
        selector.centrality_weight = self.centrality_weight;
        if self.embedder == EmbedderKind::OpenAi {
            selector = selector.with_remote_embedder(
                self.embedding_model.clone(),
                self.embedding_base_url.clone(),
                self.embedding_api_key.clone(),
            );
        }

        let mut search = SearchControls::default()
            .with_preferred_engine(self.engine)
            .with_fallback_chain((!self.fallback.is_empty()).then(|| self.fallback.clone()))
            .with_max_results(self.max_results)
            .with_retry(self.retry_count, Duration::from_millis(self.retry_delay_ms))
            .with_extra_domains(self.domains_vec());
        if let (Some(key), Some(cx)) = (&self.google_api_key, &self.google_engine_id) {
            search = search.with_google(key.clone(), cx.clone());
        }
        search.wikipedia_language = self.wikipedia_language.clone();

        let timeouts = TimeoutControls::default()
            .with_call_timeouts(
                Duration::from_secs(self.search_timeout_secs),
                Duration::from_secs(self.fetch_timeout_secs),
                Duration::from_secs(self.llm_timeout_secs),
            )
            .with_request_deadline(Duration::from_secs(self.request_deadline_secs))
            .with_concurrency(self.max_concurrent_candidates, self.compute_threads);

        let llm = LlmControls::default()
            .with_backend(self.llm_provider, self.llm_model.clone())
            .with_endpoint(self.llm_base_url.clone(), self.llm_api_key.clone())
            .with_sampling(self.temperature, self.max_tokens);

        let controls = VerifierControls::new(
            SegmentControls::new(self.min_chunk_size, self.max_chunk_size),
            selector,
            search,
            timeouts,
            llm,
        );
        controls.validate()?;
        Ok(controls)
    }

    fn domains_vec(&self) -> Vec<String> {
        self.extra_domains
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let cli = Cli::parse_from(["fastcheck"]);
        let controls = cli.build_controls().expect("valid defaults");
        assert_eq!(controls, VerifierControls::default());
    }

    #[test]
    fn cli_flags_reach_controls() {
        let cli = Cli::parse_from([
            "fastcheck",
            "--engine",
            "bing",
            "--fallback",
            "wikipedia,duck-duck-go",
            "--extra-domains",
            "wikipedia.org, ,example.org",
            "--retry-delay-ms",
            "250",
            "--strategy",
            "text-rank",
        ]);
        let controls = cli.build_controls().expect("valid");
        assert_eq!(controls.search().preferred_engine(), SearchEngine::Bing);
        assert_eq!(
            controls.search().fallback_chain(),
            Some(&[SearchEngine::Wikipedia, SearchEngine::DuckDuckGo][..])
        );
        assert_eq!(controls.search().extra_domains(), ["wikipedia.org", "example.org"]);
        assert_eq!(controls.search().retry_delay(), Duration::from_millis(250));
        assert_eq!(controls.selector().strategy(), StrategyKind::TextRank);
        assert_eq!(controls.search().google_api_key(), None);
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let controls = VerifierControls::from_toml_str(
            r#"
            [segment]
            min_chunk_size = 100

            [search]
            preferred_engine = "wikipedia"
            retry_delay = 0.5

            [timeouts]
            fetch_timeout = 2.5

            [prompts]
            explain_system = "Be strict."
            "#,
        )
        .expect("valid toml");
        assert_eq!(controls.segment().min_chunk_size(), 100);
        assert_eq!(controls.segment().max_chunk_size(), 500);
        assert_eq!(controls.search().preferred_engine(), SearchEngine::Wikipedia);
        assert_eq!(controls.search().retry_delay(), Duration::from_millis(500));
        assert_eq!(controls.timeouts().fetch_timeout(), Duration::from_millis(2500));
        assert_eq!(controls.timeouts().search_timeout(), Duration::from_secs(10));
        assert_eq!(controls.prompts().explain_system, "Be strict.");
        assert_eq!(controls.llm().model(), "tulu3");
    }

    #[test]
    fn validation_rejects_impossible_values() {
        let inverted = VerifierControls::from_toml_str("[segment]\nmin_chunk_size = 600\n");
        assert!(matches!(inverted, Err(ConfigError::ChunkBounds { min: 600, max: 500 })));

        let lambda = VerifierControls::from_toml_str("[selector]\nlambda = 1.5\n");
        assert!(matches!(
            lambda,
            Err(ConfigError::OutOfUnitRange { field: "lambda", .. })
        ));

        let threads = VerifierControls::from_toml_str("[timeouts]\ncompute_threads = 0\n");
        assert!(matches!(threads, Err(ConfigError::Zero("compute_threads"))));
    }

    #[test]
    fn unknown_engine_is_a_parse_error() {
        let err = VerifierControls::from_toml_str("[search]\npreferred_engine = \"altavista\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
