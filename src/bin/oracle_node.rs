//! Oracle node CLI
//!
//! Runs the oracle node or performs one-shot maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use oracle_node::chain::{ChainClient, InMemoryChain, JsonRpcChainClient};
use oracle_node::config::NodeConfig;
use oracle_node::consensus::{ConsensusCoordinator, CoordinatorEvent};
use oracle_node::node::OracleNode;
use oracle_node::oracle::{ReqwestJsonClient, SourceFetcher};

/// Off-chain oracle node: ingestion, validator consensus and on-chain submission
#[derive(Parser)]
#[command(name = "oracle-node")]
#[command(version = oracle_node::VERSION)]
#[command(about = "Oracle network node", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "ORACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Chain RPC endpoint
    #[arg(long, env = "ORACLE_RPC_URL")]
    rpc_url: Option<String>,

    /// Use a simulated in-process chain instead of RPC
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted
    Run,

    /// Fetch every configured source once and print the results
    Fetch,

    /// Print the effective configuration
    Config,

    /// Print the current gas price
    Gas,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => run(config, cli.simulate).await,
        Commands::Fetch => fetch(config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Gas => {
            let chain = chain_client(&config, cli.simulate)?;
            let price = chain.gas_price().await.context("gas price query failed")?;
            println!("{}", price);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => NodeConfig::default(),
    };
    config.apply_env();
    if let Some(url) = &cli.rpc_url {
        config.chain.rpc_url = url.clone();
    }

    config.validate()?;
    Ok(config)
}

fn chain_client(config: &NodeConfig, simulate: bool) -> anyhow::Result<Arc<dyn ChainClient>> {
    if simulate {
        return Ok(Arc::new(InMemoryChain::with_validators([
            ("0xsim-validator-1", 100),
            ("0xsim-validator-2", 200),
            ("0xsim-validator-3", 300),
        ])));
    }
    Ok(Arc::new(JsonRpcChainClient::new(&config.chain)?))
}

async fn run(config: NodeConfig, simulate: bool) -> anyhow::Result<()> {
    let chain = chain_client(&config, simulate)?;
    let http = Arc::new(ReqwestJsonClient::new(&config.fetch.http)?);
    let node = Arc::new(OracleNode::new(config, chain, http));

    if simulate {
        spawn_simulated_validators(node.coordinator().clone());
    }

    node.start().await.context("failed to start oracle node")?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    node.stop().await;

    let stats = node.stats();
    info!(
        rounds = stats.rounds,
        submitted = stats.submissions.submitted,
        failures = stats.submissions.failures,
        "Final statistics"
    );
    Ok(())
}

/// Every simulated validator echoes the proposed value
fn spawn_simulated_validators(coordinator: Arc<ConsensusCoordinator>) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let CoordinatorEvent::RoundCreated { round_id, .. } = event else {
                continue;
            };
            let Some(round) = coordinator.round(&round_id) else {
                continue;
            };
            for validator in &round.participants {
                if let Err(e) = coordinator.submit(&round_id, validator, round.request.payload.clone()) {
                    warn!(validator = %validator, error = %e, "Simulated submission rejected");
                }
            }
        }
    });
}

async fn fetch(config: NodeConfig) -> anyhow::Result<()> {
    let http = Arc::new(ReqwestJsonClient::new(&config.fetch.http)?);
    let fetcher = SourceFetcher::new(http);
    for definition in &config.fetch.sources {
        fetcher.add_source(definition.build());
    }

    let results = fetcher.fetch_all(&config.fetch.options()).await;
    for (name, value) in &results {
        let reliability = fetcher.source_reliability(name)?.unwrap_or_default();
        match value {
            Some(value) => println!("{:<20} {:<24} reliability {:.2}", name, value, reliability),
            None => println!("{:<20} {:<24} reliability {:.2}", name, "<no data>", reliability),
        }
    }
    Ok(())
}
