use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fastcheck::{
    AlignmentScorer, Chunk, Cli, ClaimReport, Granularity, HttpFetcher, ModelCache, PageFetcher,
    ScoringScheme, Verifier, VerifierControls,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fastcheck",
    about = "Verify claims on a web page against independent sources"
)]
struct App {
    #[command(flatten)]
    controls: Cli,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select claims from a page and verify each against search results
    Verify(VerifyArgs),
    /// Print the local alignment of two passages
    Align {
        /// First passage
        a: String,
        /// Second passage
        b: String,
        /// Align whole words instead of characters
        #[arg(long, default_value_t = false)]
        words: bool,
    },
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Page to verify; also excluded from the search results
    #[arg(long, required_unless_present_any = ["file", "claim"])]
    url: Option<String>,

    /// Local HTML file to verify instead of fetching
    #[arg(long, conflicts_with = "claim")]
    file: Option<PathBuf>,

    /// Verify this single claim text instead of selecting claims from a page
    #[arg(long)]
    claim: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let app = App::parse();
    match app.command {
        Command::Align { a, b, words } => run_align(&a, &b, words),
        Command::Verify(args) => {
            let controls = app.controls.build_controls()?;
            // Built before the runtime: the remote embedder uses a blocking client.
            let models = Arc::new(ModelCache::from_controls(controls.selector())?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let reports = runtime.block_on(run_verify(controls, Arc::clone(&models), args))?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fastcheck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_align(a: &str, b: &str, words: bool) -> Result<()> {
    let granularity = if words {
        Granularity::Words
    } else {
        Granularity::Chars
    };
    let scorer = AlignmentScorer::new(ScoringScheme::default(), granularity);
    let alignment = scorer.align(a, b);
    println!("{alignment}");
    println!("{}", serde_json::to_string_pretty(&alignment.details())?);
    Ok(())
}

async fn run_verify(
    controls: VerifierControls,
    models: Arc<ModelCache>,
    args: VerifyArgs,
) -> Result<Vec<ClaimReport>> {
    let claims = controls.selector().claims();
    let timeouts = controls.timeouts().clone();
    let verifier = Verifier::from_controls(controls, models)?;

    if let Some(text) = args.claim.as_deref() {
        let claim = Chunk::new("c0", text.trim());
        let report = verifier.verify_claim(&claim, args.url.as_deref()).await?;
        log_best(&report);
        return Ok(vec![report]);
    }

    let html = match (&args.file, &args.url) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(url)) => {
            let fetcher = HttpFetcher::new(timeouts.fetch_timeout(), timeouts.max_page_bytes())?;
            let page = fetcher.fetch(url).await;
            match page.content {
                Some(html) => html,
                None => bail!(
                    "failed to fetch {url}: {}",
                    page.error.unwrap_or_else(|| "no content".to_string())
                ),
            }
        }
        (None, None) => bail!("either --url, --file or --claim is required"),
    };

    let reports = verifier
        .verify_document(&html, args.url.as_deref(), claims)
        .await?;
    reports.iter().for_each(log_best);
    Ok(reports)
}

fn log_best(report: &ClaimReport) {
    match report.best() {
        Some(best) => tracing::info!(
            claim = report.claim.id(),
            url = %best.url,
            score = best.outcome.score,
            rating = ?best.outcome.rating,
            "best match"
        ),
        None => tracing::info!(claim = report.claim.id(), "no source aligned"),
    }
}
