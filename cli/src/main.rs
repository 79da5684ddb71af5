//! timelockd: command-line entry point of the timelock flow engine.
//!
//! # Commands
//! ```text
//! timelockd run          --config <engine.yaml>
//! timelockd check-config --config <engine.yaml>
//! timelockd resync       --config <engine.yaml> --chain-id <n> --standard <std> --contract <addr>
//! timelockd decode-log   --chain-id <n> --address <addr> --topics <...> --data <hex> [--rpc <url>]
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use timelock_core::Standard;
use timelock_engine::config::WebhookConfig;
use timelock_engine::{init_tracing, Engine, EngineConfig, LogConfig};
use timelock_evm::{ChainEventDecoder, EnrichmentPipeline, RawLog, RecoveryScheme, SenderSource};
use timelock_rpc::{GatewayConfig, RpcGateway};

#[derive(Parser)]
#[command(
    name = "timelockd",
    about = "Timelock flow reconciliation engine",
    long_about = "
Tracks Compound and OpenZeppelin timelock proposals across chains: ingests
indexer webhooks, polls the indexer for missed events and promotes flows as
their eta and grace period pass.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log filter
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Run {
        /// Path to the engine YAML config
        #[arg(short, long, env = "TIMELOCK_CONFIG")]
        config: String,
    },

    /// Validate a config file and print what it enables
    #[command(name = "check-config")]
    CheckConfig {
        #[arg(short, long, env = "TIMELOCK_CONFIG")]
        config: String,
    },

    /// Resync one contract from the indexer, then promote what is due
    Resync {
        #[arg(short, long, env = "TIMELOCK_CONFIG")]
        config: String,
        #[arg(long)]
        chain_id: u64,
        /// compound | openzeppelin
        #[arg(long)]
        standard: Standard,
        #[arg(long)]
        contract: String,
    },

    /// Decode a timelock event log from raw topics + data
    #[command(name = "decode-log")]
    DecodeLog {
        #[arg(long, default_value_t = 1)]
        chain_id: u64,
        /// Emitting contract
        #[arg(long)]
        address: String,
        /// topics[0] = event signature hash, topics[1..] = indexed params
        #[arg(long, num_args = 1..)]
        topics: Vec<String>,
        /// Non-indexed params (hex, 0x-prefixed)
        #[arg(long, default_value = "0x")]
        data: String,
        #[arg(long, default_value = "0x0")]
        tx_hash: String,
        #[arg(long)]
        block_number: Option<u64>,
        /// Enrich through this RPC endpoint (timestamp, sender, receipt status)
        #[arg(long)]
        rpc: Option<String>,
        /// Sender recovery schemes to try, e.g. `eip1559 eip155`
        #[arg(long, num_args = 1..)]
        recover: Vec<String>,
        /// Compound grace period in seconds
        #[arg(long)]
        grace_period: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
        Commands::Resync {
            config,
            chain_id,
            standard,
            contract,
        } => cmd_resync(&config, chain_id, standard, &contract).await,
        Commands::DecodeLog {
            chain_id,
            address,
            topics,
            data,
            tx_hash,
            block_number,
            rpc,
            recover,
            grace_period,
        } => {
            let log = RawLog {
                address,
                topics,
                data: hex::decode(data.strip_prefix("0x").unwrap_or(&data))
                    .context("invalid data hex")?,
                transaction_hash: tx_hash,
                block_number,
                log_index: None,
            };
            cmd_decode_log(chain_id, &log, rpc.as_deref(), &recover, grace_period).await
        }
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn load_config(path: &str) -> Result<EngineConfig> {
    EngineConfig::load(path).with_context(|| format!("loading config '{path}'"))
}

async fn cmd_run(path: &str) -> Result<()> {
    let config = load_config(path)?;
    init_tracing(&config.log)?;

    let handle = Engine::from_config(config)
        .await
        .context("building engine")?
        .start()
        .await
        .context("starting engine")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("interrupt received");
    if let Some(err) = handle.last_poll_error() {
        info!(error = %err, "last poll tick had errors");
    }
    handle.stop().await;
    Ok(())
}

fn cmd_check_config(path: &str) -> Result<()> {
    let config = load_config(path)?;

    println!("Config OK: {path}");
    println!(
        "  poll every {}s, promote every {}s (batch {})",
        config.poll_interval_secs, config.promotion_interval_secs, config.promotion_batch_size
    );
    println!("  storage: {:?}", config.storage.backend);
    if config.webhook.enabled {
        println!("  webhook: {}", config.webhook.listen);
    } else {
        println!("  webhook: disabled");
    }
    println!("  chains:");
    for chain in &config.chains {
        let contracts = config
            .registry
            .contracts
            .iter()
            .filter(|c| c.chain_id == chain.chain_id && c.active)
            .count();
        println!(
            "    {:>8}  {:<12} rpc={} indexer={} contracts={}",
            chain.chain_id,
            chain.name,
            chain.rpc_urls.len(),
            if chain.indexer_url.is_some() { "yes" } else { "no" },
            contracts
        );
    }
    Ok(())
}

async fn cmd_resync(path: &str, chain_id: u64, standard: Standard, contract: &str) -> Result<()> {
    let mut config = load_config(path)?;
    init_tracing(&LogConfig {
        level: "warn".into(),
        ..config.log.clone()
    })?;
    if config.chain(chain_id).and_then(|c| c.indexer_url.as_ref()).is_none() {
        bail!("chain {chain_id} has no indexer configured");
    }
    config.webhook = WebhookConfig {
        enabled: false,
        ..config.webhook
    };

    let handle = Engine::from_config(config).await?.start().await?;
    let result = handle
        .sync()
        .resync_contract(chain_id, standard, contract)
        .await;
    handle.stop().await;

    let (stats, promoted) = result.context("resync failed")?;
    println!(
        "fetched={} applied={} unchanged={} skipped={} failed={}",
        stats.fetched, stats.applied, stats.unchanged, stats.skipped, stats.failed
    );
    for change in promoted {
        println!(
            "  {} {} → {}",
            change.flow_id,
            change.old_status.map(|s| s.as_str()).unwrap_or("-"),
            change.new_status
        );
    }
    Ok(())
}

async fn cmd_decode_log(
    chain_id: u64,
    log: &RawLog,
    rpc: Option<&str>,
    recover: &[String],
    grace_period: Option<u64>,
) -> Result<()> {
    let mut decoder = ChainEventDecoder::new();
    if let Some(secs) = grace_period {
        decoder = decoder.with_grace_period(secs);
    }
    let mut event = decoder.decode(chain_id, log)?;

    if let Some(url) = rpc {
        let schemes = recover
            .iter()
            .map(|s| {
                serde_json::from_value::<RecoveryScheme>(serde_json::Value::String(s.to_lowercase()))
                    .with_context(|| format!("unknown recovery scheme '{s}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        let sender = if schemes.is_empty() {
            SenderSource::NodeReported
        } else {
            SenderSource::Recover(schemes)
        };
        let gateway = RpcGateway::from_urls(GatewayConfig::default(), [(chain_id, vec![url.to_string()])])?;
        let pipeline = EnrichmentPipeline::new(Arc::new(gateway), sender);

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        pipeline
            .enrich(&mut event, &cancel)
            .await
            .context("enrichment failed")?;
    }

    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}
