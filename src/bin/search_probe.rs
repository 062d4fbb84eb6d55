use anyhow::{Context, Result};
use clap::Parser;
use fastcheck::{Cli, ProviderRegistry, SearchFederator};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "search_probe",
    about = "Run one federated search with the configured engines and print the results"
)]
struct ProbeCli {
    /// Search query
    #[arg(long)]
    query: String,

    /// Restrict results to this domain and its subdomains
    #[arg(long)]
    domain: Option<String>,

    #[command(flatten)]
    controls: Cli,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fastcheck=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = ProbeCli::parse();
    let controls = cli.controls.build_controls()?;
    let registry = ProviderRegistry::from_controls(controls.search())
        .context("failed to build search client")?;
    let federator = SearchFederator::new(
        Arc::new(registry),
        controls.search().clone(),
        controls.timeouts().search_timeout(),
    );
    let engine = controls.search().preferred_engine();
    let results = federator
        .federated_search(
            &cli.query,
            cli.domain.as_deref(),
            engine,
            controls.search().fallback_chain(),
        )
        .await?;
    tracing::info!(count = results.len(), "federated search finished");
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
