use anyhow::Result;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wabisabi::api::ArenaApi;
use wabisabi::client::{CoinJoinClient, CoinJoinClientConfig, HttpArenaApi, KeyChain, OwnedCoin, RoundStateUpdater};
use wabisabi::config::{default_data_dir, CoordinatorConfig};
use wabisabi::coordinator::{Arena, ArenaRequestHandler, BitcoindRpc, MemoryUtxoSet, Prison, UtxoProvider};
use wabisabi::*;

#[derive(Parser)]
#[command(name = "wabisabi")]
#[command(about = "WabiSabi coinjoin coordinator and client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a coordinator
    Coordinator {
        #[arg(long, default_value_os_t = default_data_dir())]
        data_dir: PathBuf,
        /// Defaults to <data_dir>/config.json
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "37127")]
        rpc_port: u16,
        /// bitcoind JSON-RPC endpoint for input lookups
        #[arg(long)]
        bitcoind_url: Option<String>,
        #[arg(long)]
        bitcoind_user: Option<String>,
        #[arg(long)]
        bitcoind_password: Option<String>,
    },

    /// List the rounds of a running coordinator
    Rounds {
        #[arg(long, default_value = "37127")]
        rpc_port: u16,
    },

    /// Run an in-process coordinator and mix random coins through it
    Simulate {
        #[arg(long, default_value = "3")]
        participants: usize,
        #[arg(long, default_value = "1")]
        outputs_per_coin: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wabisabi=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Coordinator { data_dir, config, rpc_port, bitcoind_url, bitcoind_user, bitcoind_password } => {
            let bitcoind = bitcoind_url.map(|url| BitcoindRpc::new(url, bitcoind_user, bitcoind_password));
            run_coordinator(data_dir, config, rpc_port, bitcoind).await
        }
        Command::Rounds { rpc_port } => list_rounds(rpc_port).await,
        Command::Simulate { participants, outputs_per_coin } => simulate(participants, outputs_per_coin).await,
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
        }
        token.cancel();
    });
    cancel
}

async fn run_coordinator(
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
    rpc_port: u16,
    bitcoind: Option<BitcoindRpc>,
) -> Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let config_path = config_path.unwrap_or_else(|| data_dir.join("config.json"));
    let config = CoordinatorConfig::load_or_create(&config_path)?;
    config.validate()?;

    let prison = Arc::new(Prison::open(data_dir.join("prison"))?);
    let utxos: Arc<dyn UtxoProvider> = match bitcoind {
        Some(rpc) => Arc::new(rpc),
        None => {
            tracing::warn!("No bitcoind configured; only coins added in-process can register");
            Arc::new(MemoryUtxoSet::new())
        }
    };

    let arena = Arc::new(Arena::new(config, prison.clone()));
    let handler = Arc::new(ArenaRequestHandler::new(arena.clone(), utxos));
    let cancel = shutdown_on_ctrl_c();

    let rpc_server = rpc::RpcServer::new(rpc_port);
    let rpc_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = rpc_server.run(handler, rpc_cancel).await {
            tracing::error!("RPC server error: {}", e);
        }
    });
    tracing::info!("Coordinator started (data: {}, rpc: {})", data_dir.display(), rpc_port);

    arena.run(cancel).await;
    prison.flush()?;
    Ok(())
}

async fn list_rounds(rpc_port: u16) -> Result<()> {
    let api = HttpArenaApi::new(format!("http://127.0.0.1:{}", rpc_port));
    let rounds = api.get_status().await?;
    if rounds.is_empty() {
        println!("No rounds");
        return Ok(());
    }
    for round in rounds {
        println!("Round {}", round.id);
        println!("  Phase:     {}", round.phase);
        println!("  Fee rate:  {} sat/kvB", round.parameters.fee_rate.sat_per_kvb);
        println!("  Inputs:    {} ({} confirmed)", round.input_count, round.confirmed_count);
        println!("  Outputs:   {}", round.coinjoin.outputs.len());
        if let Some(reason) = round.end_reason {
            println!("  Ended:     {:?}", reason);
        }
    }
    Ok(())
}

async fn simulate(participants: usize, outputs_per_coin: usize) -> Result<()> {
    if participants == 0 {
        anyhow::bail!("Need at least one participant");
    }
    let config = CoordinatorConfig {
        min_input_count_by_round: participants,
        max_input_count_by_round: participants,
        tick_interval_millis: 100,
        ..CoordinatorConfig::default()
    };
    config.validate()?;

    let utxos = Arc::new(MemoryUtxoSet::new());
    let arena = Arc::new(Arena::new(config, Arc::new(Prison::in_memory())));
    let handler: Arc<dyn ArenaApi> = Arc::new(ArenaRequestHandler::new(arena.clone(), utxos.clone()));
    let cancel = shutdown_on_ctrl_c();
    tokio::spawn(arena.clone().run(cancel.clone()));

    let secp = Secp256k1::signing_only();
    let client_config = CoinJoinClientConfig {
        min_confirm_delay: Duration::from_millis(50),
        max_confirm_delay: Duration::from_millis(300),
        outputs_per_coin,
        ..CoinJoinClientConfig::default()
    };
    let mut attempts = Vec::with_capacity(participants);
    for i in 0..participants {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let outpoint = outpoint_from_seed(format!("simulated coin {}", i).as_bytes(), 0);
        let value = 1_000_000 * (i as u64 + 1);
        let coin = Coin::new(outpoint, txout(value, p2wpkh_script(&secret_key.public_key(&secp))));
        utxos.add(outpoint, coin.txout.clone());

        let client = CoinJoinClient::new(
            handler.clone(),
            RoundStateUpdater::new(arena.subscribe()),
            Arc::new(KeyChain::random()),
            client_config.clone(),
        );
        let cancel = cancel.clone();
        attempts.push(async move { client.start_coinjoin(vec![OwnedCoin::new(coin, secret_key)], &cancel).await });
    }

    for (i, result) in join_all(attempts).await.into_iter().enumerate() {
        match result {
            Ok(result) => println!(
                "Participant {}: round {} ended in {} ({} outputs)",
                i,
                result.round_id,
                result.final_phase,
                result.outputs.len()
            ),
            Err(e) => println!("Participant {}: {}", i, e),
        }
    }
    arena.metrics().report();
    cancel.cancel();
    Ok(())
}
