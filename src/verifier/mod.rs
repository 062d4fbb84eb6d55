//! Claim verification: select claims, search, fetch, align, explain.

mod explain;
mod outcome;

pub use explain::{explain, RatedReply};
pub use outcome::{
    AlignmentOutcome, BestMatchPolicy, CandidateReport, CandidateState, ClaimReport, SkipReason,
};

use crate::chunk::Chunk;
use crate::controls::VerifierControls;
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::llm::{build_client, CompletionClient};
use crate::model_cache::ModelCache;
use crate::pool::{ComputePool, PoolError};
use crate::retriever::AlignmentRetriever;
use crate::search::{ProviderRegistry, SearchError, SearchFederator};
use crate::segmenter::{markdown_to_plain, HtmlSegmenter, Segmenter};
use crate::selector::{ChunkSelector, SelectError};
use anyhow::Context;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

const MIN_CONTENT_CHARS: usize = 10;
const QUERY_FALLBACK_WORDS: usize = 32;
const SUMMARY_INPUT_CHARS: usize = 6000;

/// Failures that abort a verification request.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Chunk selection failed.
    #[error(transparent)]
    Select(#[from] SelectError),
    /// The compute pool failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Search was misconfigured.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// An LLM call failed where no fallback exists.
    #[error("completion failed: {0:#}")]
    Llm(#[source] anyhow::Error),
    /// An LLM call exceeded its timeout where no fallback exists.
    #[error("completion timed out after {0:?}")]
    LlmTimedOut(Duration),
    /// The whole request exceeded its deadline.
    #[error("verification exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// External services a [`Verifier`] talks to.
pub struct Collaborators {
    /// HTML to chunks.
    pub segmenter: Arc<dyn Segmenter>,
    /// Candidate page retrieval.
    pub fetcher: Arc<dyn PageFetcher>,
    /// Query generation, summaries and explanations.
    pub llm: Arc<dyn CompletionClient>,
    /// Search backends.
    pub registry: Arc<ProviderRegistry>,
    /// Shared embedder and stop words.
    pub models: Arc<ModelCache>,
}

/// Runs the verification pipeline. Stateless between requests; share it behind an `Arc`.
pub struct Verifier {
    controls: VerifierControls,
    segmenter: Arc<dyn Segmenter>,
    fetcher: Arc<dyn PageFetcher>,
    llm: Arc<dyn CompletionClient>,
    search: SearchFederator,
    selector: ChunkSelector,
    retriever: AlignmentRetriever,
    pool: ComputePool,
}

impl Verifier {
    /// Wires a verifier from explicit collaborators.
    pub fn new(controls: VerifierControls, parts: Collaborators) -> Result<Self, VerifyError> {
        let pool = ComputePool::new(controls.timeouts().compute_threads())?;
        let selector = ChunkSelector::from_controls(controls.selector(), parts.models);
        let search = SearchFederator::new(
            parts.registry,
            controls.search().clone(),
            controls.timeouts().search_timeout(),
        );
        Ok(Self {
            segmenter: parts.segmenter,
            fetcher: parts.fetcher,
            llm: parts.llm,
            search,
            selector,
            retriever: AlignmentRetriever::default(),
            pool,
            controls,
        })
    }

    /// Wires the HTTP fetcher, the HTML segmenter, the configured LLM and every configured
    /// search engine.
    pub fn from_controls(controls: VerifierControls, models: Arc<ModelCache>) -> anyhow::Result<Self> {
        let timeouts = controls.timeouts();
        let fetcher = HttpFetcher::new(timeouts.fetch_timeout(), timeouts.max_page_bytes())
            .context("failed to build page fetcher")?;
        let registry =
            ProviderRegistry::from_controls(controls.search()).context("failed to build search client")?;
        tracing::info!(engines = ?registry.engines(), "search registry ready");
        let parts = Collaborators {
            segmenter: Arc::new(HtmlSegmenter::new()),
            fetcher: Arc::new(fetcher),
            llm: build_client(controls.llm())?,
            registry: Arc::new(registry),
            models,
        };
        Ok(Self::new(controls, parts)?)
    }

    /// Replaces the alignment retriever.
    pub fn with_retriever(mut self, retriever: AlignmentRetriever) -> Self {
        self.retriever = retriever;
        self
    }

    /// Settings in use.
    pub fn controls(&self) -> &VerifierControls {
        &self.controls
    }

    async fn segment(&self, html: String, url: Option<String>) -> Result<(usize, Vec<Chunk>), PoolError> {
        let segmenter = Arc::clone(&self.segmenter);
        let (min, max) = (
            self.controls.segment().min_chunk_size(),
            self.controls.segment().max_chunk_size(),
        );
        self.pool
            .run(move || {
                let Some(markdown) = segmenter.extract_main_content(&html) else {
                    return (0, Vec::new());
                };
                let content_chars = markdown_to_plain(&markdown).chars().count();
                if content_chars < MIN_CONTENT_CHARS {
                    return (content_chars, Vec::new());
                }
                let chunks = segmenter.chunk_markdown(&markdown, url.as_deref(), min, max);
                (content_chars, chunks)
            })
            .await
    }

    /// Segments the user's page and selects its `n` most important, mutually diverse chunks.
    pub async fn select_claims(&self, html: &str, n: usize) -> Result<Vec<Chunk>, VerifyError> {
        let (_, chunks) = self.segment(html.to_string(), None).await?;
        tracing::debug!(chunks = chunks.len(), n, strategy = self.selector.strategy_name(), "selecting claims");
        Ok(self.selector.select_on(&self.pool, chunks, n).await?)
    }

    async fn ask(&self, prompt: &str, system: &str) -> Result<String, VerifyError> {
        let limit = self.controls.timeouts().llm_timeout();
        match tokio::time::timeout(limit, self.llm.complete(prompt, Some(system))).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(VerifyError::Llm(err)),
            Err(_) => Err(VerifyError::LlmTimedOut(limit)),
        }
    }

    /// Turns a claim into a search query. Falls back to the claim's first words when the LLM
    /// fails or answers with nothing usable.
    pub async fn generate_query(&self, claim: &str, context: Option<&str>) -> String {
        let prompts = self.controls.prompts();
        let prompt = prompts.render_query(claim, context);
        match self.ask(&prompt, &prompts.query_system).await {
            Ok(reply) => {
                let query = clean_query(&reply);
                if !query.is_empty() {
                    return query;
                }
                tracing::warn!("empty query reply, falling back to claim text");
            }
            Err(err) => tracing::warn!(error = %err, "query generation failed, falling back to claim text"),
        }
        claim
            .split_whitespace()
            .take(QUERY_FALLBACK_WORDS)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One-sentence main claim of `text`, used as query context.
    pub async fn summarize(&self, text: &str) -> Result<String, VerifyError> {
        let prompts = self.controls.prompts();
        let excerpt: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
        let reply = self
            .ask(&prompts.render_summary(&excerpt), &prompts.summary_system)
            .await?;
        let summary = reply.split_whitespace().collect::<Vec<_>>().join(" ");
        if summary.is_empty() {
            return Err(VerifyError::Llm(anyhow::anyhow!("empty summary reply")));
        }
        Ok(summary)
    }

    /// Fetches one candidate page and compares its best matching chunk against `claim`.
    ///
    /// Never fails: fetch and extraction problems become a skipped, zero-score report and a
    /// failed explanation leaves the score in place.
    pub async fn compare(&self, claim: &Chunk, url: &str, rank: usize) -> CandidateReport {
        let span = tracing::info_span!("candidate", rank, url);
        self.compare_inner(claim, url, rank).instrument(span).await
    }

    async fn compare_inner(&self, claim: &Chunk, url: &str, rank: usize) -> CandidateReport {
        let timeouts = self.controls.timeouts();
        let fetched = match tokio::time::timeout(timeouts.fetch_timeout(), self.fetcher.fetch(url)).await {
            Ok(fetched) => fetched,
            Err(_) => {
                tracing::info!("fetch timed out");
                return CandidateReport::skipped(url, rank, SkipReason::FetchTimedOut);
            }
        };
        let Some(html) = fetched.content else {
            tracing::info!(error = fetched.error.as_deref().unwrap_or("unknown"), "fetch failed");
            return CandidateReport::skipped(url, rank, SkipReason::FetchFailed);
        };

        let (content_chars, chunks) = match self.segment(html, Some(url.to_string())).await {
            Ok(segmented) => segmented,
            Err(err) => {
                tracing::warn!(error = %err, "segmenting candidate failed");
                return CandidateReport::skipped(url, rank, SkipReason::NoChunks);
            }
        };
        if content_chars < MIN_CONTENT_CHARS {
            tracing::info!(content_chars, "candidate has no usable content");
            return CandidateReport::skipped(url, rank, SkipReason::NoContent);
        }

        let k = self.controls.selector().candidate_chunks();
        let selected = match self.selector.select_on(&self.pool, chunks, k).await {
            Ok(selected) => selected,
            Err(err) => {
                tracing::warn!(error = %err, "candidate selection failed");
                Vec::new()
            }
        };
        let retriever = self.retriever;
        let query = claim.clone();
        let retrieved = self
            .pool
            .run(move || retriever.retrieve_top_k(&query, &selected, k))
            .await
            .unwrap_or_default();
        // Ranked best first.
        let Some((matched, score)) = retrieved.into_iter().next() else {
            tracing::info!("no candidate chunks");
            return CandidateReport::skipped(url, rank, SkipReason::NoChunks);
        };
        tracing::debug!(score, chunk = matched.id(), "best aligned chunk");

        let explained = tokio::time::timeout(
            timeouts.llm_timeout(),
            explain(self.llm.as_ref(), self.controls.prompts(), claim.text(), matched.text()),
        )
        .await;
        let mut outcome = AlignmentOutcome {
            score,
            matched_chunk: Some(matched),
            explanation: None,
            rating: None,
        };
        let state = match explained {
            Ok(Ok(reply)) => {
                outcome.rating = reply.rating;
                outcome.explanation = Some(reply.explanation).filter(|text| !text.is_empty());
                CandidateState::Completed
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "explanation failed");
                CandidateState::CompletedWithoutExplanation
            }
            Err(_) => {
                tracing::warn!("explanation timed out");
                CandidateState::CompletedWithoutExplanation
            }
        };
        CandidateReport {
            url: url.to_string(),
            rank,
            outcome,
            state,
        }
    }

    /// Searches for `claim` and compares every candidate concurrently.
    ///
    /// Candidates finish in any order; the report lists them by search rank. Dropping the
    /// returned future cancels all in-flight fetches and LLM calls.
    pub async fn verify_claim(&self, claim: &Chunk, origin_url: Option<&str>) -> Result<ClaimReport, VerifyError> {
        self.verify_with_context(claim, origin_url, None).await
    }

    async fn verify_with_context(
        &self,
        claim: &Chunk,
        origin_url: Option<&str>,
        context: Option<&str>,
    ) -> Result<ClaimReport, VerifyError> {
        let deadline = self.controls.timeouts().request_deadline();
        let span = tracing::info_span!("claim", id = claim.id());
        tokio::time::timeout(deadline, self.run_claim(claim, origin_url, context))
            .instrument(span)
            .await
            .map_err(|_| VerifyError::DeadlineExceeded(deadline))?
    }

    async fn run_claim(
        &self,
        claim: &Chunk,
        origin_url: Option<&str>,
        context: Option<&str>,
    ) -> Result<ClaimReport, VerifyError> {
        let query = self.generate_query(claim.text(), context).await;
        tracing::info!(query = %query, "searching");
        let results = self
            .search
            .gather(&query, self.controls.search().extra_domains(), origin_url)
            .await?;
        tracing::info!(candidates = results.len(), "comparing candidates");

        let width = self.controls.timeouts().max_concurrent_candidates().max(1);
        let mut candidates: Vec<CandidateReport> = stream::iter(results.iter().enumerate())
            .map(|(rank, result)| self.compare(claim, &result.url, rank))
            .buffer_unordered(width)
            .collect()
            .await;
        candidates.sort_by_key(|report| report.rank);

        Ok(ClaimReport {
            claim: claim.clone(),
            query,
            candidates,
            policy: self.controls.selector().best_match(),
            error: None,
        })
    }

    /// Selects `n` claims from the page and verifies each in turn. The page summary, when the
    /// LLM provides one, is passed as query context.
    ///
    /// A claim whose verification fails (deadline, unregistered engine) still gets a report,
    /// with no candidates and the cause in [`ClaimReport::error`].
    pub async fn verify_document(
        &self,
        html: &str,
        origin_url: Option<&str>,
        n: usize,
    ) -> Result<Vec<ClaimReport>, VerifyError> {
        let claims = self.select_claims(html, n).await?;
        if claims.is_empty() {
            tracing::info!("no claims selected");
            return Ok(Vec::new());
        }
        let text = claims.iter().map(Chunk::text).collect::<Vec<_>>().join("\n\n");
        let context = match self.summarize(&text).await {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::warn!(error = %err, "summary unavailable, continuing without context");
                None
            }
        };

        let mut reports = Vec::with_capacity(claims.len());
        for claim in &claims {
            let report = match self.verify_with_context(claim, origin_url, context.as_deref()).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(claim = claim.id(), error = %err, "claim verification failed");
                    ClaimReport {
                        claim: claim.clone(),
                        query: String::new(),
                        candidates: Vec::new(),
                        policy: self.controls.selector().best_match(),
                        error: Some(err.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        Ok(reports)
    }
}

/// First non-empty line, without wrapping quotes, with whitespace collapsed.
fn clean_query(reply: &str) -> String {
    let line = reply.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
    let unquoted = line.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '„' | '«' | '»'));
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_cleanup_strips_quotes_and_whitespace() {
        assert_eq!(clean_query("  \"Eiffel  Tower   height 1889\"  "), "Eiffel Tower height 1889");
        assert_eq!(clean_query("\n\n“Berlin museums”\nExplanation follows"), "Berlin museums");
        assert_eq!(clean_query("``"), "");
    }
}
