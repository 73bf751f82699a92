use bitcoin::secp256k1::{Secp256k1, SecretKey};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wabisabi::api::ArenaApi;
use wabisabi::client::{ClientError, CoinJoinClient, CoinJoinClientConfig, KeyChain, OwnedCoin, RoundStateUpdater};
use wabisabi::config::CoordinatorConfig;
use wabisabi::coordinator::prison::unix_now;
use wabisabi::coordinator::{Arena, ArenaRequestHandler, MemoryUtxoSet, Offense, Prison};
use wabisabi::core::*;

struct Harness {
    arena: Arc<Arena>,
    api: Arc<dyn ArenaApi>,
    utxos: Arc<MemoryUtxoSet>,
    cancel: CancellationToken,
}

impl Harness {
    fn start(inputs: usize) -> Self {
        let config = CoordinatorConfig {
            min_input_count_by_round: inputs,
            max_input_count_by_round: inputs,
            tick_interval_millis: 50,
            ..CoordinatorConfig::default()
        };
        let arena = Arc::new(Arena::new(config, Arc::new(Prison::in_memory())));
        let utxos = Arc::new(MemoryUtxoSet::new());
        let api: Arc<dyn ArenaApi> = Arc::new(ArenaRequestHandler::new(arena.clone(), utxos.clone()));
        let cancel = CancellationToken::new();
        tokio::spawn(arena.clone().run(cancel.clone()));
        Self { arena, api, utxos, cancel }
    }

    fn owned_coin(&self, seed: &str, value: u64) -> OwnedCoin {
        let sk = SecretKey::new(&mut rand::thread_rng());
        let script = p2wpkh_script(&sk.public_key(&Secp256k1::signing_only()));
        let coin = Coin::new(outpoint_from_seed(seed.as_bytes(), 0), txout(value, script));
        self.utxos.add(coin.outpoint, coin.txout.clone());
        OwnedCoin::new(coin, sk)
    }

    fn client(&self, updater: RoundStateUpdater, outputs_per_coin: usize) -> CoinJoinClient {
        let config = CoinJoinClientConfig {
            min_confirm_delay: Duration::from_millis(1),
            max_confirm_delay: Duration::from_millis(20),
            request_timeout: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
            outputs_per_coin,
        };
        CoinJoinClient::new(self.api.clone(), updater, Arc::new(KeyChain::random()), config)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn three_participants_mix() {
    let harness = Harness::start(3);
    let cancel = CancellationToken::new();
    let attempts = (0..3).map(|i| {
        let coin = harness.owned_coin(&format!("participant {}", i), 2_000_000 + i as u64 * 100_000);
        let client = harness.client(RoundStateUpdater::new(harness.arena.subscribe()), 1);
        let cancel = cancel.clone();
        async move { client.start_coinjoin(vec![coin], &cancel).await }
    });

    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();
    let round_id = results[0].round_id;
    for result in &results {
        assert!(result.is_success());
        assert_eq!(result.round_id, round_id);
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.signed_inputs, result.registered_inputs);
    }

    let state = harness.arena.round_state(&round_id).await.unwrap();
    assert_eq!(state.phase, Phase::Success);
    assert_eq!(state.coinjoin.inputs.len(), 3);
    assert_eq!(state.coinjoin.outputs.len(), 3);
    assert!(state.coinjoin.is_fully_signed());
    assert_eq!(harness.arena.metrics().rounds_succeeded(), 1);
}

#[tokio::test]
async fn coin_split_into_two_outputs() {
    let harness = Harness::start(1);
    let coin = harness.owned_coin("split", 100_000_000);
    let client = harness.client(RoundStateUpdater::new(harness.arena.subscribe()), 2);

    let result = client.start_coinjoin(vec![coin], &CancellationToken::new()).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.outputs.len(), 2);

    let state = harness.arena.round_state(&result.round_id).await.unwrap();
    assert_eq!(state.coinjoin.inputs.len(), 1);
    assert_eq!(state.coinjoin.outputs.len(), 2);
    assert!(state.coinjoin.contains_outputs(&result.outputs));
}

#[tokio::test]
async fn banned_coin_is_dropped_and_the_rest_continue() {
    let harness = Harness::start(1);
    let banned = harness.owned_coin("banned", 3_000_000);
    let good = harness.owned_coin("good", 3_000_000);
    harness.arena.prison().punish(
        banned.coin.outpoint,
        Offense::FailedToSign,
        RoundId::random(),
        Duration::from_secs(3_600),
        unix_now(),
    );

    let client = harness.client(RoundStateUpdater::new(harness.arena.subscribe()), 1);
    let result = client.start_coinjoin(vec![banned, good.clone()], &CancellationToken::new()).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.registered_inputs, vec![good.coin.outpoint]);
    assert_eq!(result.signed_inputs, vec![good.coin.outpoint]);
}

#[tokio::test]
async fn refuses_to_sign_when_outputs_are_missing() {
    let harness = Harness::start(1);
    let coin = harness.owned_coin("victim", 3_000_000);

    // A coordinator view that drops every output once signing starts.
    let mut source = harness.arena.subscribe();
    let (tx, rx) = watch::channel(Vec::new());
    tokio::spawn(async move {
        loop {
            let mut states = source.borrow_and_update().clone();
            for state in &mut states {
                if state.phase == Phase::TransactionSigning {
                    state.coinjoin.outputs.clear();
                }
            }
            tx.send_replace(states);
            if source.changed().await.is_err() {
                return;
            }
        }
    });

    let client = harness.client(RoundStateUpdater::new(rx), 1);
    let err = client.start_coinjoin(vec![coin.clone()], &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::MissingOutputs { missing: 1, expected: 1 }));

    let rounds = harness.arena.round_states().await;
    let round = rounds.iter().find(|r| r.phase == Phase::TransactionSigning).unwrap();
    let index = round.coinjoin.input_index(&coin.coin.outpoint).unwrap();
    assert!(!round.coinjoin.is_signed(index));
}

#[tokio::test]
async fn dust_coins_are_not_registered() {
    let harness = Harness::start(1);
    let dust = harness.owned_coin("dust", 5_500);
    let client = harness.client(RoundStateUpdater::new(harness.arena.subscribe()), 1);

    let err = client.start_coinjoin(vec![dust], &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::NoParticipants(_)));
}

#[tokio::test]
async fn cancellation_ends_the_attempt() {
    // The client never hears of a round.
    let (_tx, rx) = watch::channel(Vec::new());
    let harness = Harness::start(1);
    let coin = harness.owned_coin("patient", 3_000_000);
    let client = harness.client(RoundStateUpdater::new(rx), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = client.start_coinjoin(vec![coin], &cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}
