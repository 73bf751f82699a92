//! One participation attempt in one round.
//!
//! Per-coin and per-output work fans out with `join_all` and each item's
//! failure only removes that item. Anything that leaves no sensible way
//! forward in the current round ends the attempt; retrying against a new
//! round is up to the caller.

use super::alice::AliceClient;
use super::arena_client::ArenaClient;
use super::bob::BobClient;
use super::keys::KeyChain;
use super::round_state::RoundStateUpdater;
use super::ClientError;
use crate::api::ArenaApi;
use crate::core::*;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, TxOut};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct CoinJoinClientConfig {
    /// Bounds of the random delay before each connection confirmation.
    pub min_confirm_delay: Duration,
    pub max_confirm_delay: Duration,
    pub request_timeout: Duration,
    /// Upper bound on a whole attempt, from waiting for a round to its end.
    pub attempt_timeout: Duration,
    /// Outputs each coin is split into when its value allows.
    pub outputs_per_coin: usize,
}

impl Default for CoinJoinClientConfig {
    fn default() -> Self {
        Self {
            min_confirm_delay: Duration::from_millis(100),
            max_confirm_delay: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(3 * 3_600),
            outputs_per_coin: 1,
        }
    }
}

/// A coin together with the key that spends it.
#[derive(Clone, Debug)]
pub struct OwnedCoin {
    pub coin: Coin,
    pub secret_key: SecretKey,
}

impl OwnedCoin {
    pub fn new(coin: Coin, secret_key: SecretKey) -> Self {
        Self { coin, secret_key }
    }
}

#[derive(Clone, Debug)]
pub struct CoinJoinResult {
    pub round_id: RoundId,
    pub registered_inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOut>,
    pub signed_inputs: Vec<OutPoint>,
    pub final_phase: Phase,
}

impl CoinJoinResult {
    pub fn is_success(&self) -> bool {
        self.final_phase == Phase::Success
    }
}

/// Planned participation of one coin.
struct CoinPlan {
    owned: OwnedCoin,
    effective_value: u64,
    outputs: Vec<TxOut>,
}

pub struct CoinJoinClient {
    api: Arc<dyn ArenaApi>,
    updater: RoundStateUpdater,
    keys: Arc<KeyChain>,
    config: CoinJoinClientConfig,
}

impl CoinJoinClient {
    pub fn new(
        api: Arc<dyn ArenaApi>,
        updater: RoundStateUpdater,
        keys: Arc<KeyChain>,
        config: CoinJoinClientConfig,
    ) -> Self {
        Self { api, updater, keys, config }
    }

    /// Take `coins` through the next round that opens for input
    /// registration. Cancelling `cancel` abandons the attempt; Alices
    /// already registered are left to the coordinator's deadlines.
    pub async fn start_coinjoin(
        &self,
        coins: Vec<OwnedCoin>,
        cancel: &CancellationToken,
    ) -> Result<CoinJoinResult, ClientError> {
        let attempt = cancel.child_token();
        tokio::select! {
            _ = attempt.cancelled() => Err(ClientError::Cancelled),
            r = tokio::time::timeout(self.config.attempt_timeout, self.participate(coins, &attempt)) => {
                r.unwrap_or(Err(ClientError::Timeout("coinjoin attempt")))
            }
        }
    }

    async fn participate(
        &self,
        coins: Vec<OwnedCoin>,
        cancel: &CancellationToken,
    ) -> Result<CoinJoinResult, ClientError> {
        let state = self
            .updater
            .wait_for_round(|r| r.phase == Phase::InputRegistration, cancel)
            .await?;
        let round_id = state.id;
        let parameters = state.parameters.clone();
        let arena = ArenaClient::new(&state, self.api.clone()).with_request_timeout(self.config.request_timeout);
        tracing::info!("Round {}: joining with {} coins", round_id, coins.len());

        // ─── Plan ───────────────────────────────────────────────────────
        let weight_budget = parameters.max_weight_per_alice.saturating_sub(input_weight());
        let max_outputs = (weight_budget / output_weight(&p2wpkh_placeholder())).max(1) as usize;
        let plans: Vec<CoinPlan> = coins
            .into_iter()
            .filter_map(|owned| {
                let effective_value = owned.coin.effective_value(parameters.fee_rate);
                let values = decompose(
                    effective_value,
                    parameters.fee_rate,
                    parameters.min_output_amount,
                    self.config.outputs_per_coin.clamp(1, max_outputs),
                );
                if values.is_empty() {
                    tracing::warn!("Round {}: coin {} too small to mix", round_id, owned.coin.outpoint);
                    return None;
                }
                let outputs = values
                    .into_iter()
                    .map(|value| txout(value, self.keys.next_output().1))
                    .collect();
                Some(CoinPlan { owned, effective_value: effective_value as u64, outputs })
            })
            .collect();
        if plans.is_empty() {
            return Err(ClientError::NoParticipants("output planning"));
        }

        // ─── Input registration ────────────────────────────────────────
        let registrations = join_all(
            plans
                .iter()
                .map(|p| AliceClient::register(arena.clone(), p.owned.coin.clone(), p.owned.secret_key)),
        )
        .await;
        let mut alices: Vec<(AliceClient, CoinPlan)> = Vec::new();
        for (result, plan) in registrations.into_iter().zip(plans) {
            match result {
                Ok(alice) => alices.push((alice, plan)),
                Err(e) => tracing::warn!(
                    "Round {}: dropping coin {}: {}",
                    round_id,
                    plan.owned.coin.outpoint,
                    e
                ),
            }
        }
        if alices.is_empty() {
            return Err(ClientError::NoParticipants("input registration"));
        }
        let registered_inputs: Vec<OutPoint> = alices.iter().map(|(a, _)| a.coin().outpoint).collect();

        // ─── Connection confirmation ───────────────────────────────────
        let weights = [weight_budget];
        let confirmations = join_all(alices.iter_mut().map(|(alice, plan)| {
            let amounts = [plan.effective_value];
            let updater = &self.updater;
            let (min, max) = (self.config.min_confirm_delay, self.config.max_confirm_delay);
            async move { alice.confirm_connection(&amounts, &weights, updater, min, max, cancel).await }
        }))
        .await;
        let mut confirmed = Vec::new();
        let mut unconfirmed = Vec::new();
        for (result, (alice, plan)) in confirmations.into_iter().zip(alices) {
            match result {
                Ok(()) => confirmed.push((alice, plan)),
                Err(e) => {
                    tracing::warn!("Round {}: alice {} not confirmed: {}", round_id, alice.alice_id(), e);
                    unconfirmed.push(alice);
                }
            }
        }
        // Removal is only legal while the round still confirms connections.
        for result in join_all(unconfirmed.into_iter().map(|alice| alice.remove())).await {
            if let Err(e) = result {
                tracing::debug!("Round {}: could not remove alice: {}", round_id, e);
            }
        }
        if confirmed.is_empty() {
            return Err(ClientError::NoParticipants("connection confirmation"));
        }

        // ─── Output registration ───────────────────────────────────────
        self.updater.await_phase(round_id, Phase::OutputRegistration, cancel).await?;
        let registered = join_all(confirmed.iter_mut().map(|(alice, plan)| {
            let credentials = alice.take_credentials();
            let bob = BobClient::new(arena.clone());
            async move {
                let mut credentials = credentials;
                let mut registered = Vec::new();
                for output in &plan.outputs {
                    match bob
                        .register_output(output.script_pubkey.clone(), output.value.to_sat(), &credentials)
                        .await
                    {
                        Ok(change) => {
                            credentials = change;
                            registered.push(output.clone());
                        }
                        Err(e) => {
                            tracing::warn!("Round {}: output registration failed: {}", round_id, e);
                            break;
                        }
                    }
                }
                registered
            }
        }))
        .await;
        let outputs: Vec<TxOut> = registered.into_iter().flatten().collect();
        if outputs.is_empty() {
            return Err(ClientError::NoParticipants("output registration"));
        }

        // ─── Signing ───────────────────────────────────────────────────
        let signing = self.updater.await_phase(round_id, Phase::TransactionSigning, cancel).await?;
        let missing = signing.coinjoin.missing_outputs(&outputs);
        if missing > 0 {
            tracing::error!(
                "Round {}: coordinator dropped {} of our {} outputs, refusing to sign",
                round_id,
                missing,
                outputs.len()
            );
            return Err(ClientError::MissingOutputs { missing, expected: outputs.len() });
        }
        let signatures = join_all(confirmed.iter().map(|(alice, _)| alice.sign(&signing.coinjoin))).await;
        let mut signed_inputs = Vec::new();
        for (result, (alice, _)) in signatures.into_iter().zip(&confirmed) {
            match result {
                Ok(()) => signed_inputs.push(alice.coin().outpoint),
                Err(e) => tracing::warn!("Round {}: signing {} failed: {}", round_id, alice.coin().outpoint, e),
            }
        }

        let ended = self.updater.await_end(round_id, cancel).await?;
        tracing::info!(
            "Round {} finished in {} ({} inputs, {} outputs ours)",
            round_id,
            ended.phase,
            signed_inputs.len(),
            outputs.len()
        );
        Ok(CoinJoinResult {
            round_id,
            registered_inputs,
            outputs,
            signed_inputs,
            final_phase: ended.phase,
        })
    }
}

fn p2wpkh_placeholder() -> bitcoin::ScriptBuf {
    bitcoin::ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([0; 20]))
}

/// Split `effective_value` into at most `parts` P2WPKH output values, each
/// net of its own output fee and at least `min_output`. The outputs' total
/// cost equals `effective_value` exactly. Falls back to fewer parts when
/// the value is too small; empty when even one output is below minimum.
pub fn decompose(effective_value: i64, fee_rate: FeeRate, min_output: u64, parts: usize) -> Vec<u64> {
    if effective_value <= 0 {
        return Vec::new();
    }
    let total = effective_value as u64;
    let output_fee = fee_rate.fee(P2WPKH_OUTPUT_VSIZE);
    for n in (1..=parts.max(1) as u64).rev() {
        let share = total / n;
        let last_share = total - share * (n - 1);
        if share < output_fee + min_output {
            continue;
        }
        let mut values = vec![share - output_fee; (n - 1) as usize];
        values.push(last_share - output_fee);
        return values;
    }
    Vec::new()
}
