use super::arena_client::{ArenaClient, CredentialPair};
use super::round_state::RoundStateUpdater;
use super::ClientError;
use crate::api::InputWitness;
use crate::core::{p2wpkh_script, sign_p2wpkh_input, AliceId, Coin, CoinjoinTemplate, Phase};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One registered input and the credentials it currently holds.
pub struct AliceClient {
    arena: ArenaClient,
    alice_id: AliceId,
    coin: Coin,
    secret_key: SecretKey,
    credentials: CredentialPair,
    confirmed: bool,
}

impl AliceClient {
    pub async fn register(arena: ArenaClient, coin: Coin, secret_key: SecretKey) -> Result<Self, ClientError> {
        let script = p2wpkh_script(&secret_key.public_key(&Secp256k1::signing_only()));
        if script != coin.txout.script_pubkey {
            return Err(ClientError::NotCoinOwner(coin.outpoint));
        }
        let registration = arena.register_input(coin.outpoint, &secret_key).await?;
        tracing::info!(
            "Round {}: registered input {} as alice {}",
            arena.round_id(),
            coin.outpoint,
            registration.alice_id
        );
        Ok(Self {
            arena,
            alice_id: registration.alice_id,
            coin,
            secret_key,
            credentials: registration.credentials,
            confirmed: false,
        })
    }

    pub fn alice_id(&self) -> AliceId {
        self.alice_id
    }

    pub fn coin(&self) -> &Coin {
        &self.coin
    }

    pub fn credentials(&self) -> &CredentialPair {
        &self.credentials
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Hand the held credentials to the caller, leaving none behind.
    pub fn take_credentials(&mut self) -> CredentialPair {
        std::mem::take(&mut self.credentials)
    }

    /// The input's contribution after paying for its own inclusion.
    pub fn effective_value(&self) -> u64 {
        self.coin.effective_value(self.arena.fee_rate()).max(0) as u64
    }

    /// Keep the registration alive until the round moves to connection
    /// confirmation, then trade the zero credentials for `amounts` and
    /// `weights`. Sends at random intervals in `[min_delay, max_delay)`.
    pub async fn confirm_connection(
        &mut self,
        amounts: &[u64],
        weights: &[u64],
        updater: &RoundStateUpdater,
        min_delay: Duration,
        max_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let round_id = self.arena.round_id();
        loop {
            let delay = if max_delay > min_delay {
                rand::thread_rng().gen_range(min_delay..max_delay)
            } else {
                min_delay
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(state) = updater.round(&round_id) {
                if state.phase.is_ended() || state.phase > Phase::ConnectionConfirmation {
                    return Err(ClientError::PhaseMissed {
                        round: round_id,
                        expected: Phase::ConnectionConfirmation,
                        actual: state.phase,
                    });
                }
            }

            let issued = self
                .arena
                .confirm_connection(self.alice_id, amounts, weights, &self.credentials)
                .await?;
            if let Some(credentials) = issued {
                self.credentials = credentials;
                self.confirmed = true;
                tracing::info!("Round {}: alice {} confirmed", round_id, self.alice_id);
                return Ok(());
            }
            tracing::debug!("Round {}: alice {} kept alive", round_id, self.alice_id);
        }
    }

    /// Sign this input in `template` and send the witness.
    pub async fn sign(&self, template: &CoinjoinTemplate) -> Result<(), ClientError> {
        let index = template
            .input_index(&self.coin.outpoint)
            .ok_or(ClientError::InputNotInTransaction(self.coin.outpoint))?;
        let coin = &template.inputs[index];
        if coin.txout != self.coin.txout {
            return Err(ClientError::NotCoinOwner(self.coin.outpoint));
        }
        let tx = template.unsigned_transaction();
        let witness = sign_p2wpkh_input(&tx, index, coin, &self.secret_key)?;
        self.arena
            .sign_transaction(vec![InputWitness { outpoint: self.coin.outpoint, witness }])
            .await?;
        tracing::info!("Round {}: signed input {}", self.arena.round_id(), self.coin.outpoint);
        Ok(())
    }

    pub async fn remove(self) -> Result<(), ClientError> {
        self.arena.remove_input(self.alice_id).await?;
        tracing::info!("Round {}: removed input {}", self.arena.round_id(), self.coin.outpoint);
        Ok(())
    }
}
