use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use dcp_common::{Config, EntityKey, EntityKind};
use dcp_scout::clock::{Clock, SystemClock};
use dcp_scout::collectors::{Collector, SocialCollector, WebSearchCollector};
use dcp_scout::extraction::LlmExtractor;
use dcp_scout::refresh::OrchestratorDeps;
use dcp_scout::scoring::Scorer;
use dcp_scout::store::{MemoryProfileStore, PgProfileStore, ProfileStore};
use dcp_scout::{LookupOptions, RefreshOrchestrator, StalePolicy};
use nitter_client::NitterClient;
use serp_client::SerpClient;

#[derive(Parser)]
#[command(name = "dcp-scout", about = "Duke company and founder profile refresh engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up one entity, refreshing it when stale.
    Lookup {
        #[arg(long)]
        kind: EntityKind,
        #[arg(long)]
        name: String,
        /// Refresh even when the stored profile is fresh.
        #[arg(long)]
        force: bool,
        /// Serve stale data immediately and refresh afterwards.
        #[arg(long)]
        background: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dcp=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let orchestrator = build_orchestrator(&config).await?;

    match cli.command {
        Command::Lookup {
            kind,
            name,
            force,
            background,
        } => {
            let key = EntityKey::new(kind, &name);
            let options = LookupOptions {
                force_refresh: force,
                stale_policy: if background {
                    StalePolicy::Background
                } else {
                    StalePolicy::Block
                },
                ..LookupOptions::default()
            };
            info!(entity = %key, force, background, "Lookup requested");

            let lookup = orchestrator.lookup(&key, options).await?;
            println!("{}", serde_json::to_string_pretty(&lookup)?);
        }
    }

    // A background refresh started above still has to persist before exit.
    orchestrator.drain().await;
    Ok(())
}

async fn build_orchestrator(config: &Config) -> Result<RefreshOrchestrator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn ProfileStore> = match &config.database_url {
        Some(url) => {
            let store = PgProfileStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("Using Postgres profile store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory profile store");
            Arc::new(MemoryProfileStore::new())
        }
    };

    let searcher = Arc::new(SerpClient::with_timeout(
        config.serpapi_key.clone(),
        config.collector.timeout,
    ));
    let timelines = Arc::new(NitterClient::new(
        config.nitter_instances.clone(),
        config.collector.timeout,
    ));
    let collectors: Vec<Arc<dyn Collector>> = vec![
        Arc::new(WebSearchCollector::new(searcher, &config.collector, clock.clone())),
        Arc::new(SocialCollector::new(timelines, &config.collector, clock.clone())),
    ];

    let model = Arc::new(
        OpenAi::new(config.openai_api_key.clone(), config.extractor.model.clone())
            .with_timeout(config.extractor.timeout),
    );
    let extractor = Arc::new(LlmExtractor::new(model, &config.extractor, clock.clone()));

    let deps = OrchestratorDeps::builder()
        .collectors(collectors)
        .extractor(extractor)
        .store(store)
        .clock(clock)
        .config(config.refresh.clone())
        .collector_timeout(collector_deadline(config))
        .scorer(Scorer::new(config.scoring))
        .build();
    Ok(RefreshOrchestrator::new(deps))
}

/// Outer deadline per collector: every attempt at the configured timeout
/// plus the capped retry waits between them.
fn collector_deadline(config: &Config) -> std::time::Duration {
    let c = &config.collector;
    let attempts = c.max_attempts.max(1);
    c.timeout * attempts + c.retry_cap * (attempts - 1)
}
