use anyhow::{bail, Result};
use async_trait::async_trait;
use fastcheck::llm::TokenStream;
use fastcheck::{
    CandidateState, Chunk, Collaborators, CompletionClient, FetchedHtml, HtmlSegmenter, ModelCache,
    PageFetcher, ProviderError, ProviderRegistry, SearchEngine, SearchProvider, SearchResult,
    SkipReason, Verifier, VerifierControls, VerifyError,
};
use futures_util::{stream, StreamExt};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: &str = "https://origin.example/eiffel";
const GOOD: &str = "https://encyclopedia.example/eiffel-tower";
const BROKEN: &str = "https://broken.example/page";
const TINY: &str = "https://tiny.example/";
const SLOW: &str = "https://slow.example/page";

const GOOD_PAGE: &str = r#"<html><body><nav>Home | About</nav><article>
<h1>Eiffel Tower</h1>
<p>The Eiffel Tower is 330 metres tall. It was completed in 1889 as the entrance arch to the World's Fair.</p>
<p>Gustave Eiffel's engineering company designed and built the tower over roughly two years.</p>
</article></body></html>"#;

const ORIGIN_PAGE: &str = r#"<html><body><main>
<p>The Eiffel Tower in Paris is 330 metres tall and was finished in 1889.</p>
<p>Berlin has many museums, a large zoo and a famous television tower near Alexanderplatz.</p>
<p>Sourdough bread needs a starter culture, flour, water and salt, plus a long fermentation.</p>
</main></body></html>"#;

struct StaticFetcher {
    pages: HashMap<&'static str, &'static str>,
}

impl StaticFetcher {
    fn new() -> Self {
        let pages = HashMap::from([
            (GOOD, GOOD_PAGE),
            (TINY, "<html><body><p>hi</p></body></html>"),
        ]);
        Self { pages }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> FetchedHtml {
        if url == SLOW {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        match self.pages.get(url) {
            Some(html) => FetchedHtml::ok(url, *html),
            None => FetchedHtml::failed(url, "status 404"),
        }
    }
}

struct FixedSearch {
    urls: Vec<&'static str>,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    fn engine(&self) -> SearchEngine {
        SearchEngine::DuckDuckGo
    }

    async fn query(
        &self,
        _query: &str,
        _domain: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        Ok(self
            .urls
            .iter()
            .take(max_results)
            .map(|url| SearchResult {
                url: url.to_string(),
                title: String::new(),
                snippet: String::new(),
                engine: SearchEngine::DuckDuckGo,
            })
            .collect())
    }
}

/// Answers by system prompt: query, summary or comparison.
struct ScriptedLlm {
    explain_reply: Option<&'static str>,
    summaries: AtomicUsize,
}

impl ScriptedLlm {
    fn new(explain_reply: Option<&'static str>) -> Self {
        Self {
            explain_reply,
            summaries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedLlm {
    async fn stream_complete(&self, _prompt: &str, system: Option<&str>) -> Result<TokenStream> {
        let system = system.unwrap_or_default();
        let reply = if system.contains("search engine queries") {
            "\"eiffel tower height 1889\"\n"
        } else if system.contains("summarizing") {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            "The Eiffel Tower is 330 metres tall."
        } else {
            match self.explain_reply {
                Some(reply) => reply,
                None => bail!("model unavailable"),
            }
        };
        let tokens: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|token| Ok(token.to_string()))
            .collect();
        Ok(stream::iter(tokens).boxed())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn controls(extra: &str) -> VerifierControls {
    let base = "[segment]\nmin_chunk_size = 40\nmax_chunk_size = 200\n\n";
    VerifierControls::from_toml_str(&format!("{base}{extra}")).expect("valid controls")
}

fn verifier(
    controls: VerifierControls,
    urls: Vec<&'static str>,
    llm: Arc<ScriptedLlm>,
) -> Verifier {
    let registry = ProviderRegistry::new().register(Arc::new(FixedSearch { urls }));
    Verifier::new(
        controls,
        Collaborators {
            segmenter: Arc::new(HtmlSegmenter::new()),
            fetcher: Arc::new(StaticFetcher::new()),
            llm,
            registry: Arc::new(registry),
            models: Arc::new(ModelCache::default()),
        },
    )
    .expect("verifier")
}

fn claim() -> Chunk {
    Chunk::new(
        "c0",
        "The Eiffel Tower in Paris is 330 metres tall and was finished in 1889.",
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn candidates_degrade_independently_and_keep_rank_order() {
    let llm = Arc::new(ScriptedLlm::new(Some(
        "```rating\n2\nBoth give 330 metres and 1889.\n```",
    )));
    let verifier = verifier(
        controls("[timeouts]\ncompute_threads = 2\n"),
        vec![ORIGIN, GOOD, BROKEN, TINY],
        llm,
    );

    let report = verifier
        .verify_claim(&claim(), Some(ORIGIN))
        .await
        .expect("report");

    assert_eq!(report.query, "eiffel tower height 1889");
    let summary: Vec<(&str, usize, CandidateState)> = report
        .candidates
        .iter()
        .map(|c| (c.url.as_str(), c.rank, c.state))
        .collect();
    assert_eq!(
        summary,
        vec![
            (GOOD, 0, CandidateState::Completed),
            (BROKEN, 1, CandidateState::Skipped(SkipReason::FetchFailed)),
            (TINY, 2, CandidateState::Skipped(SkipReason::NoContent)),
        ]
    );

    let best = report.best().expect("one scored candidate");
    assert_eq!(best.url, GOOD);
    assert!(best.outcome.score > 0.3, "score {}", best.outcome.score);
    assert_eq!(best.outcome.rating, Some(2));
    assert_eq!(
        best.outcome.explanation.as_deref(),
        Some("Both give 330 metres and 1889.")
    );
    let matched = best.outcome.matched_chunk.as_ref().expect("matched chunk");
    assert!(matched.text().contains("330 metres"));

    for skipped in &report.candidates[1..] {
        assert_eq!(skipped.outcome.score, 0.0);
        assert!(skipped.outcome.explanation.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_explanation_keeps_the_score() {
    let verifier = verifier(controls(""), vec![GOOD], Arc::new(ScriptedLlm::new(None)));
    let report = verifier.verify_claim(&claim(), None).await.expect("report");
    let only = &report.candidates[0];
    assert_eq!(only.state, CandidateState::CompletedWithoutExplanation);
    assert!(only.outcome.score > 0.0);
    assert!(only.outcome.explanation.is_none());
    assert!(only.outcome.rating.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_fetch_is_skipped_after_its_timeout() {
    let verifier = verifier(
        controls("[timeouts]\nfetch_timeout = 0.2\n"),
        vec![SLOW, GOOD],
        Arc::new(ScriptedLlm::new(Some("Consistent."))),
    );
    let report = verifier.verify_claim(&claim(), None).await.expect("report");
    assert_eq!(
        report.candidates[0].state,
        CandidateState::Skipped(SkipReason::FetchTimedOut)
    );
    assert_eq!(report.candidates[1].state, CandidateState::Completed);
    assert_eq!(
        report.candidates[1].outcome.explanation.as_deref(),
        Some("Consistent.")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_deadline_bounds_the_whole_claim() {
    let verifier = verifier(
        controls("[timeouts]\nfetch_timeout = 60\nrequest_deadline = 0.3\n"),
        vec![SLOW],
        Arc::new(ScriptedLlm::new(Some("unused"))),
    );
    let err = verifier
        .verify_claim(&claim(), None)
        .await
        .expect_err("deadline");
    assert!(matches!(err, VerifyError::DeadlineExceeded(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn document_verification_selects_claims_and_summarizes_once() {
    let llm = Arc::new(ScriptedLlm::new(Some("```rating\n1\nMostly consistent.\n```")));
    let verifier = verifier(controls(""), vec![GOOD], Arc::clone(&llm));

    let reports = verifier
        .verify_document(ORIGIN_PAGE, Some(ORIGIN), 2)
        .await
        .expect("reports");
    assert_eq!(reports.len(), 2);
    assert_eq!(llm.summaries.load(Ordering::SeqCst), 1);
    assert_ne!(reports[0].claim.id(), reports[1].claim.id());
    for report in &reports {
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].outcome.rating, Some(1));
    }

    assert!(verifier
        .select_claims(ORIGIN_PAGE, 0)
        .await
        .expect("empty")
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn document_verification_reports_claims_past_their_deadline() {
    let verifier = verifier(
        controls("[timeouts]\nfetch_timeout = 60\nrequest_deadline = 0.3\n"),
        vec![SLOW],
        Arc::new(ScriptedLlm::new(Some("unused"))),
    );
    let reports = verifier
        .verify_document(ORIGIN_PAGE, Some(ORIGIN), 2)
        .await
        .expect("per-claim failures stay inside the reports");
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.candidates.is_empty());
        assert!(report.best().is_none());
        let error = report.error.as_deref().expect("failure recorded");
        assert!(error.contains("deadline"), "{error}");
    }
}
