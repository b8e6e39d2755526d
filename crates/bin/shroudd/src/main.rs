//! shroud node daemon
//!
//! wires the store, commitment tree, validation queue and transact service
//! together and runs until interrupted.

use anyhow::Context;
use clap::Parser;
use shroud_node::hostdir::{HostDir, HostDirConfig};
use shroud_node::service::{Service, TransactConfig, TransactService};
use shroud_node::validate::spawn_state_validator;
use shroud_node::{NodeContext, NodeParams};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "shroudd")]
#[command(about = "shroud node daemon: transaction server with integrated exchange book")]
struct Cli {
    /// Data directory for the node store
    #[arg(long, env = "SHROUD_DATA_DIR", default_value = "shroud-data")]
    datadir: PathBuf,

    /// Blockchain number (1 = mainnet, anything else a testnet)
    #[arg(long, env = "SHROUD_BLOCKCHAIN", default_value = "1")]
    blockchain: u64,

    /// Transact listen address
    #[arg(long, env = "SHROUD_TRANSACT_LISTEN", default_value = "127.0.0.1:9220")]
    transact_listen: SocketAddr,

    /// Proof-of-work difficulty for queries (0 disables)
    #[arg(long, default_value = "0")]
    query_work_difficulty: u64,

    /// Proof-of-work difficulty for transactions (0 disables)
    #[arg(long, default_value = "0")]
    tx_work_difficulty: u64,

    /// Proof-of-work difficulty for crosschain payment advices (0 disables)
    #[arg(long, default_value = "0")]
    xcx_pay_work_difficulty: u64,

    /// Seconds without network activity before refusing transactions
    /// (0 disables the check)
    #[arg(long, default_value = "0")]
    max_net_sec: u64,

    /// Maximum age of the last indelible block timestamp (0 disables)
    #[arg(long, default_value = "0")]
    max_block_sec: u64,

    /// File listing rendezvous directory servers, one hostname per line
    #[arg(long, env = "SHROUD_RENDEZVOUS_FILE")]
    rendezvous_file: Option<PathBuf>,

    /// Local anonymity-network proxy port
    #[arg(long, default_value = "9050")]
    proxy_port: u16,

    /// Rendezvous query proof-of-work difficulty
    #[arg(long, default_value = "0")]
    rendezvous_difficulty: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("shroudd=info".parse().expect("literal directive"))
                .add_directive("shroud_node=info".parse().expect("literal directive")),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!("starting shroud node, blockchain {}", cli.blockchain);

    let params = NodeParams {
        blockchain: cli.blockchain,
        tx_work_difficulty: cli.tx_work_difficulty,
        xcx_pay_work_difficulty: cli.xcx_pay_work_difficulty,
        ..Default::default()
    };

    let ctx = NodeContext::open(params, &cli.datadir)
        .with_context(|| format!("opening node store in {}", cli.datadir.display()))?;

    // optional host directory for peer discovery
    if let Some(path) = &cli.rendezvous_file {
        let hostdir = HostDir::load(
            HostDirConfig {
                proxy_port: cli.proxy_port,
                difficulty: cli.rendezvous_difficulty,
                ..Default::default()
            },
            path,
        )
        .context("loading rendezvous server list")?;
        // fetched lazily by the relay side; verify we can compose a query
        if hostdir.prepare_query().is_none() {
            tracing::warn!("rendezvous list is empty, peer discovery disabled");
        }
    }

    let validator = spawn_state_validator(ctx.clone());

    let mut service = TransactService::new(TransactConfig {
        enabled: true,
        listen: cli.transact_listen,
        max_net_sec: cli.max_net_sec,
        max_block_sec: cli.max_block_sec,
        query_work_difficulty: cli.query_work_difficulty,
    });
    if let Some(svc) = std::sync::Arc::get_mut(&mut service) {
        svc.preset();
        svc.postset().context("transact configuration")?;
    }

    let addr = service
        .start(ctx.clone(), validator)
        .await
        .context("starting transact service")?;
    tracing::info!("transact service ready on {addr}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
        _ = async {
            let mut shutdown = ctx.chain.shutdown_signal();
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        } => {
            tracing::info!("fatal error raised, shutting down");
        }
    }

    ctx.chain.start_shutdown();
    service.start_shutdown();
    service.wait_for_shutdown().await;
    ctx.store.flush().ok();
    tracing::info!("shutdown complete");
    Ok(())
}
