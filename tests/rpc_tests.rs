use bitcoin::secp256k1::{Secp256k1, SecretKey};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wabisabi::api::*;
use wabisabi::client::{
    ArenaClient, ClientError, CoinJoinClient, CoinJoinClientConfig, HttpArenaApi, KeyChain, OwnedCoin,
    RoundStateUpdater,
};
use wabisabi::config::CoordinatorConfig;
use wabisabi::coordinator::{Arena, ArenaRequestHandler, MemoryUtxoSet, Prison};
use wabisabi::core::*;
use wabisabi::error::ArenaError;
use wabisabi::rpc::RpcServer;

struct Server {
    port: u16,
    arena: Arc<Arena>,
    utxos: Arc<MemoryUtxoSet>,
    cancel: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a coordinator + RPC server on a random port.
async fn start_rpc(config: CoordinatorConfig, run_arena: bool) -> Server {
    let arena = Arc::new(Arena::new(config, Arc::new(Prison::in_memory())));
    let utxos = Arc::new(MemoryUtxoSet::new());
    let handler = Arc::new(ArenaRequestHandler::new(arena.clone(), utxos.clone()));
    let cancel = CancellationToken::new();

    // Use a random high port to reduce collisions.
    let port = 18500 + (rand::random::<u16>() % 1000);
    let rpc_server = RpcServer::new(port);
    let rpc_cancel = cancel.clone();
    tokio::spawn(async move {
        rpc_server.run(handler, rpc_cancel).await.unwrap();
    });
    if run_arena {
        tokio::spawn(arena.clone().run(cancel.clone()));
    } else {
        arena.create_round().await;
    }

    // Give the server time to bind
    tokio::time::sleep(Duration::from_millis(150)).await;

    Server { port, arena, utxos, cancel }
}

fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

fn single_input_config() -> CoordinatorConfig {
    CoordinatorConfig {
        min_input_count_by_round: 1,
        max_input_count_by_round: 1,
        tick_interval_millis: 50,
        ..CoordinatorConfig::default()
    }
}

fn fund(utxos: &MemoryUtxoSet, seed: &str, value: u64) -> (Coin, SecretKey) {
    let sk = SecretKey::new(&mut rand::thread_rng());
    let script = p2wpkh_script(&sk.public_key(&Secp256k1::signing_only()));
    let coin = Coin::new(outpoint_from_seed(seed.as_bytes(), 0), txout(value, script));
    utxos.add(coin.outpoint, coin.txout.clone());
    (coin, sk)
}

#[tokio::test]
async fn test_rpc_health() {
    let server = start_rpc(CoordinatorConfig::default(), false).await;
    let resp = reqwest::get(format!("{}/health", base_url(server.port))).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_rpc_status() {
    let server = start_rpc(CoordinatorConfig::default(), false).await;
    let resp = reqwest::get(format!("{}/wabisabi/status", base_url(server.port))).await.unwrap();
    assert!(resp.status().is_success());

    let json: serde_json::Value = resp.json().await.unwrap();
    let rounds = json.as_array().unwrap();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0]["phase"], "InputRegistration");
    assert_eq!(rounds[0]["id"].as_str().unwrap().len(), 64);

    let api = HttpArenaApi::new(base_url(server.port));
    let states = api.get_status().await.unwrap();
    assert_eq!(states, server.arena.round_states().await);
}

#[tokio::test]
async fn test_rpc_rejection_carries_the_reason() {
    let server = start_rpc(CoordinatorConfig::default(), false).await;
    let api = HttpArenaApi::new(base_url(server.port));
    let state = api.get_status().await.unwrap().remove(0);
    let client = ArenaClient::new(&state, Arc::new(api));

    // Coin the coordinator has never seen.
    let sk = SecretKey::new(&mut rand::thread_rng());
    let outpoint = outpoint_from_seed(b"unknown", 0);
    let err = client.register_input(outpoint, &sk).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ArenaError::InputSpent(op)) if op == outpoint));

    let err = client.remove_input(AliceId::random()).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ArenaError::AliceNotFound(_))));
}

#[tokio::test]
async fn test_rpc_malformed_body() {
    let server = start_rpc(CoordinatorConfig::default(), false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/wabisabi/input-registration", base_url(server.port)))
        .json(&serde_json::json!({ "round_id": "zz" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_rpc_round_over_http() {
    let server = start_rpc(single_input_config(), false).await;
    let (coin, sk) = fund(&server.utxos, "http coin", 10_000_000);
    let api: Arc<dyn ArenaApi> = Arc::new(HttpArenaApi::new(base_url(server.port)));
    let state = api.get_status().await.unwrap().remove(0);
    let client = ArenaClient::new(&state, api.clone());
    let fee_rate = state.parameters.fee_rate;

    let registration = client.register_input(coin.outpoint, &sk).await.unwrap();
    server.arena.trigger_round_step().await;

    let effective = coin.effective_value(fee_rate) as u64;
    let budget = state.parameters.max_weight_per_alice - input_weight();
    let credentials = client
        .confirm_connection(registration.alice_id, &[effective], &[budget], &registration.credentials)
        .await
        .unwrap()
        .unwrap();
    server.arena.trigger_round_step().await;

    let (_, script) = KeyChain::random().next_output();
    let value = effective - fee_rate.fee(P2WPKH_OUTPUT_VSIZE);
    client.register_output(script.clone(), value, &credentials).await.unwrap();
    server.arena.trigger_round_step().await;

    let signing = api.get_status().await.unwrap().into_iter().find(|r| r.id == state.id).unwrap();
    assert_eq!(signing.phase, Phase::TransactionSigning);
    assert!(signing.coinjoin.contains_outputs(&[txout(value, script)]));
    let tx = signing.coinjoin.unsigned_transaction();
    let witness = sign_p2wpkh_input(&tx, 0, &signing.coinjoin.inputs[0], &sk).unwrap();
    client
        .sign_transaction(vec![InputWitness { outpoint: coin.outpoint, witness }])
        .await
        .unwrap();
    server.arena.trigger_round_step().await;

    assert_eq!(server.arena.round_state(&state.id).await.unwrap().phase, Phase::Success);
}

#[tokio::test]
async fn test_rpc_coinjoin_client_with_polling() {
    let server = start_rpc(single_input_config(), true).await;
    let (coin, sk) = fund(&server.utxos, "polled coin", 10_000_000);
    let api: Arc<dyn ArenaApi> = Arc::new(HttpArenaApi::new(base_url(server.port)));
    let cancel = CancellationToken::new();
    let updater = RoundStateUpdater::spawn_polling(api.clone(), Duration::from_millis(20), cancel.clone());

    let config = CoinJoinClientConfig {
        min_confirm_delay: Duration::from_millis(1),
        max_confirm_delay: Duration::from_millis(20),
        attempt_timeout: Duration::from_secs(30),
        ..CoinJoinClientConfig::default()
    };
    let client = CoinJoinClient::new(api, updater, Arc::new(KeyChain::random()), config);
    let result = client.start_coinjoin(vec![OwnedCoin::new(coin.clone(), sk)], &cancel).await.unwrap();
    cancel.cancel();

    assert!(result.is_success());
    assert_eq!(result.signed_inputs, vec![coin.outpoint]);
}
