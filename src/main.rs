// Agent chain node
// Main entry point for running a single-process validator node

use agc_chain::consensus::Ed25519Signer;
use agc_chain::{GenesisValidator, KeyPair, Node, NodeConfig, Policy, PrivateKey};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "agc-node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and produce blocks
    Start {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Hex-encoded Ed25519 private key of the proposer (a fresh key is generated if omitted)
        #[arg(long)]
        validator: Option<String>,
        /// Override the block interval
        #[arg(long)]
        block_time_ms: Option<u64>,
    },
    /// Generate a proposer key pair
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            validator,
            block_time_ms,
        } => start_node(config, validator, block_time_ms).await,
        Commands::Keygen => {
            generate_keys();
            Ok(())
        }
    }
}

async fn start_node(
    config_path: Option<PathBuf>,
    validator: Option<String>,
    block_time_ms: Option<u64>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(ms) = block_time_ms {
        config.block_interval_ms = ms;
    }

    let keypair = match validator {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key.trim_start_matches("0x")).context("decoding validator key")?;
            KeyPair::from_private_key(PrivateKey::from_bytes(&bytes).context("parsing validator key")?)
        }
        None => {
            warn!("No validator key supplied, using an ephemeral key");
            KeyPair::generate()
        }
    };
    let proposer = keypair.address();

    if !config.genesis_validators.iter().any(|v| v.address == proposer) {
        info!("Registering {} as a genesis validator with the minimum stake", proposer);
        config.genesis_validators.push(GenesisValidator {
            address: proposer,
            public_key: keypair.public_key.to_bytes().to_vec(),
            stake: Policy::MIN_VALIDATOR_STAKE,
            reputation_score: 0.0,
        });
    }

    let node = Node::new(config)
        .await
        .context("initializing node")?
        .with_producer(|producer| producer.with_signer(Arc::new(Ed25519Signer::new(keypair))))
        .context("attaching block signer")?;

    let mut blocks = node.subscribe().await;
    node.start(proposer).await.context("starting node")?;
    info!("Node running as {} - press Ctrl+C to stop", proposer);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            received = blocks.recv() => match received {
                Ok(block) => info!(
                    "Block #{} {} ({} transactions)",
                    block.height(),
                    block.hash(),
                    block.transactions().len()
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} block announcements", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    node.stop().await.context("stopping node")?;
    Ok(())
}

fn generate_keys() {
    let keypair = KeyPair::generate();
    println!("private key: {}", hex::encode(keypair.private_key.to_bytes()));
    println!("public key:  {}", keypair.public_key.to_hex());
    println!("address:     {}", keypair.address());
}
