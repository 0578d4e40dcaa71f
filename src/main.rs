use std::env;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;

use omni::agents::population::{default_roster, AgentPopulation};
use omni::agents::rule_based::RuleBasedAgent;
use omni::agents::Agent;
use omni::config::Config;
use omni::data_store::DataStore;
use omni::execution::adapters::router::VenueRouter;
use omni::execution::adapters::{OnChainAdapter, RestSignedAdapter, SolanaAdapter};
use omni::execution::ExecutionLayer;
use omni::feature_pipeline::{CompositeMarketDataSource, FeaturePipeline, RestMarketDataSource};
use omni::memory::EpisodicMemory;
use omni::orchestrator::Orchestrator;
use omni::persistence::FileStore;
use omni::risk::RiskEngine;
use omni::scanner::MarketScanner;

const MEMORY_CAPACITY: usize = 5_000;
const SCANNER_CONCURRENCY: usize = 8;

#[derive(Parser)]
#[clap(author, version, about = "Autonomous multi-agent cryptocurrency trading platform", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent population against the configured venues.
    Run {
        /// Starting equity, in quote currency.
        #[clap(short, long, default_value = "1000.0")]
        equity: f64,
    },
    /// Validate the environment-derived configuration and exit.
    CheckConfig,
}

/// Builds the default roster as rule-based agents. `LlmBackedAgent` needs a
/// concrete `LlmClient`, which this crate deliberately doesn't implement.
fn build_population(max_daily_loss_pct: f64) -> AgentPopulation {
    let roster = default_roster();
    let agents: Vec<Box<dyn Agent>> = roster
        .into_iter()
        .enumerate()
        .map(|(i, (specialization, personality))| -> Box<dyn Agent> {
            Box::new(RuleBasedAgent::new(format!("agent-{i}-{specialization:?}").to_lowercase(), specialization, personality))
        })
        .collect();
    AgentPopulation::new(agents, max_daily_loss_pct)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::CheckConfig => {
            info!(symbols = ?config.symbols, decision_interval_seconds = config.decision_interval_seconds, "configuration valid");
            Ok(())
        }
        Commands::Run { equity } => run(config, equity).await,
    }
}

async fn run(config: Config, equity: f64) -> anyhow::Result<()> {
    let rest_source = Arc::new(RestMarketDataSource::new(config.rest_base_url.clone()));
    let source = Arc::new(CompositeMarketDataSource::new(rest_source, config.symbols.clone()));
    let pipeline = Arc::new(FeaturePipeline::new(source));
    let data_store = Arc::new(DataStore::new(pipeline.clone(), vec![]));
    let scanner = MarketScanner::new(pipeline.clone(), SCANNER_CONCURRENCY);

    let risk = Arc::new(RiskEngine::new(equity, &config));

    let api_key = config.aster_api_key.clone().unwrap_or_default();
    let api_secret = config.aster_api_secret.clone().unwrap_or_default();
    let router = VenueRouter::new(
        config.symbols.clone(),
        vec![],
        vec![],
        Arc::new(RestSignedAdapter::new(api_key, api_secret, config.rest_base_url.clone())),
        Arc::new(OnChainAdapter::new("https://api.mainnet-beta.solana.com".to_string())),
        Arc::new(SolanaAdapter::new("https://api.mainnet-beta.solana.com".to_string())),
    );
    let execution = Arc::new(ExecutionLayer::new(router, risk.clone(), None));

    let population = Arc::new(tokio::sync::RwLock::new(build_population(config.max_daily_loss_pct)));
    let memory = EpisodicMemory::new(MEMORY_CAPACITY);
    let store: Arc<dyn omni::persistence::Store> = Arc::new(FileStore::new("./data"));

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let orchestrator = Orchestrator::new(
        config,
        population.clone(),
        scanner,
        data_store,
        risk,
        execution,
        memory,
        store,
        shutdown_rx,
    );

    let mut cio = omni::cio::CioLoop::new();
    let cio_population = population.clone();
    tokio::spawn(async move {
        cio.run(cio_population).await;
    });

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler, running until killed");
            return;
        }
        info!("shutdown signal received");
        let _ = _shutdown_tx.send(true);
    });

    orchestrator.load_inherited_positions().await;
    orchestrator.run().await;
    Ok(())
}
