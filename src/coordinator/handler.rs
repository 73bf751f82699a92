use super::arena::Arena;
use super::idempotency::IdempotencyCache;
use super::prison::unix_now;
use super::utxo::UtxoProvider;
use crate::api::*;
use crate::core::{Coin, Phase};
use crate::crypto::CredentialsResponse;
use crate::error::{ArenaError, Result};
use async_trait::async_trait;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Instant;

/// Entry point for every participant request.
///
/// Checks that only need external data (prison, UTXO lookups, ownership
/// proofs) run before the round lock is taken; everything touching round
/// state runs under it. Successful responses are cached by request body.
pub struct ArenaRequestHandler {
    arena: Arc<Arena>,
    utxos: Arc<dyn UtxoProvider>,
    cache: IdempotencyCache,
}

impl ArenaRequestHandler {
    pub fn new(arena: Arc<Arena>, utxos: Arc<dyn UtxoProvider>) -> Self {
        let cache = IdempotencyCache::new(arena.config().idempotency_ttl());
        Self { arena, utxos, cache }
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    fn rejected<T>(&self, kind: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!("{} rejected: {}", kind, e);
            self.arena.metrics().inc_requests_rejected();
        }
        result
    }

    fn count_issued(&self, amount: &CredentialsResponse, weight: &CredentialsResponse) {
        self.arena.metrics().add_credentials_issued(amount.issued.len() + weight.issued.len());
    }

    async fn register_input_inner(&self, request: InputRegistrationRequest) -> Result<InputRegistrationResponse> {
        let outpoint = request.outpoint;
        if let Some(until) = self.arena.prison().banned_until(&outpoint, unix_now()) {
            return Err(ArenaError::InputBanned { outpoint, until });
        }

        let round = self.arena.round(&request.round_id).await?;
        let parameters = {
            let round = round.lock().await;
            round.check_phase(&[Phase::InputRegistration])?;
            round.parameters().clone()
        };

        let utxo = self
            .utxos
            .get_utxo(&outpoint)
            .await
            .map_err(|e| ArenaError::UtxoLookup(e.to_string()))?
            .ok_or(ArenaError::InputSpent(outpoint))?;
        let config = self.arena.config();
        if utxo.confirmations < config.min_input_confirmations {
            return Err(ArenaError::InputUnconfirmed(outpoint));
        }
        if utxo.is_coinbase && utxo.confirmations < config.coinbase_maturity {
            return Err(ArenaError::InputImmature(outpoint));
        }
        if !utxo.txout.script_pubkey.is_p2wpkh() {
            return Err(ArenaError::NonStandardInput(outpoint));
        }
        let value = utxo.txout.value.to_sat();
        if value < parameters.min_registrable_amount || value > parameters.max_registrable_amount {
            return Err(ArenaError::InputValueOutOfRange {
                value,
                min: parameters.min_registrable_amount,
                max: parameters.max_registrable_amount,
            });
        }
        let coin = Coin::new(outpoint, utxo.txout);
        if coin.effective_value(parameters.fee_rate) <= 0 {
            return Err(ArenaError::InputValueOutOfRange {
                value,
                min: parameters.min_registrable_amount,
                max: parameters.max_registrable_amount,
            });
        }
        if !request.ownership_proof.verify(&request.round_id, &outpoint, &coin.txout.script_pubkey) {
            return Err(ArenaError::WrongOwnershipProof);
        }

        self.arena.claim_input(outpoint, request.round_id)?;
        let result = round.lock().await.register_input(
            coin,
            request.ownership_proof,
            &request.zero_amount_credential_requests,
            &request.zero_weight_credential_requests,
            Instant::now(),
            &mut OsRng,
        );
        match &result {
            Ok(response) => {
                self.arena.metrics().inc_inputs_registered();
                self.count_issued(&response.amount_credentials, &response.weight_credentials);
                tracing::info!("Round {}: input {} registered as alice {}", request.round_id, outpoint, response.alice_id);
            }
            Err(_) => self.arena.release_input(&outpoint),
        }
        result
    }

    async fn confirm_connection_inner(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse> {
        let round = self.arena.round(&request.round_id).await?;
        let response = round.lock().await.confirm_connection(&request, Instant::now(), &mut OsRng)?;
        if let (Some(amount), Some(weight)) = (&response.amount_credentials, &response.weight_credentials) {
            self.count_issued(amount, weight);
        }
        Ok(response)
    }

    async fn register_output_inner(&self, request: OutputRegistrationRequest) -> Result<OutputRegistrationResponse> {
        let round = self.arena.round(&request.round_id).await?;
        let response = round.lock().await.register_output(&request, &mut OsRng)?;
        self.arena.metrics().inc_outputs_registered();
        self.count_issued(&response.amount_credentials, &response.weight_credentials);
        Ok(response)
    }

    async fn reissue_credentials_inner(&self, request: ReissueCredentialRequest) -> Result<ReissueCredentialResponse> {
        let round = self.arena.round(&request.round_id).await?;
        let response = round.lock().await.reissue_credentials(&request, &mut OsRng)?;
        self.count_issued(&response.amount_credentials, &response.weight_credentials);
        Ok(response)
    }

    async fn remove_input_inner(&self, request: InputsRemovalRequest) -> Result<()> {
        let round = self.arena.round(&request.round_id).await?;
        let outpoint = round.lock().await.remove_input(&request.alice_id)?;
        self.arena.release_input(&outpoint);
        Ok(())
    }

    async fn sign_transaction_inner(&self, request: TransactionSignaturesRequest) -> Result<()> {
        let round = self.arena.round(&request.round_id).await?;
        let mut round = round.lock().await;
        round.sign_transaction(&request.input_witnesses)
    }
}

#[async_trait]
impl ArenaApi for ArenaRequestHandler {
    async fn register_input(&self, request: InputRegistrationRequest) -> Result<InputRegistrationResponse, ApiError> {
        let result = self
            .cache
            .get_or_compute("input-registration", &request, || self.register_input_inner(request.clone()))
            .await;
        Ok(self.rejected("input registration", result)?)
    }

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse, ApiError> {
        let result = self
            .cache
            .get_or_compute("connection-confirmation", &request, || self.confirm_connection_inner(request.clone()))
            .await;
        Ok(self.rejected("connection confirmation", result)?)
    }

    async fn register_output(&self, request: OutputRegistrationRequest) -> Result<OutputRegistrationResponse, ApiError> {
        let result = self
            .cache
            .get_or_compute("output-registration", &request, || self.register_output_inner(request.clone()))
            .await;
        Ok(self.rejected("output registration", result)?)
    }

    async fn reissue_credentials(&self, request: ReissueCredentialRequest) -> Result<ReissueCredentialResponse, ApiError> {
        let result = self
            .cache
            .get_or_compute("credential-issuance", &request, || self.reissue_credentials_inner(request.clone()))
            .await;
        Ok(self.rejected("credential issuance", result)?)
    }

    async fn remove_input(&self, request: InputsRemovalRequest) -> Result<(), ApiError> {
        let result = self
            .cache
            .get_or_compute("input-unregistration", &request, || self.remove_input_inner(request.clone()))
            .await;
        Ok(self.rejected("input removal", result)?)
    }

    async fn sign_transaction(&self, request: TransactionSignaturesRequest) -> Result<(), ApiError> {
        let result = self
            .cache
            .get_or_compute("transaction-signature", &request, || self.sign_transaction_inner(request.clone()))
            .await;
        Ok(self.rejected("transaction signature", result)?)
    }

    async fn get_status(&self) -> Result<Vec<RoundState>, ApiError> {
        Ok(self.arena.round_states().await)
    }
}
