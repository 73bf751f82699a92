use super::ClientError;
use crate::api::*;
use crate::core::{output_vsize, output_weight, AliceId, FeeRate, OwnershipProof, RoundId};
use crate::crypto::{Credential, CredentialClient, CredentialsResponse, CredentialsResponseValidation};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, ScriptBuf};
use rand::rngs::OsRng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials of both denominations returned by one request.
#[derive(Clone, Debug, Default)]
pub struct CredentialPair {
    pub amount: Vec<Credential>,
    pub weight: Vec<Credential>,
}

impl CredentialPair {
    pub fn amount_value(&self) -> u64 {
        self.amount.iter().map(|c| c.value).sum()
    }

    pub fn weight_value(&self) -> u64 {
        self.weight.iter().map(|c| c.value).sum()
    }
}

#[derive(Clone, Debug)]
pub struct InputRegistration {
    pub alice_id: AliceId,
    pub credentials: CredentialPair,
}

/// Builds and sends requests for one round. Keeps no state between calls.
#[derive(Clone)]
pub struct ArenaClient {
    round_id: RoundId,
    fee_rate: FeeRate,
    amount_client: CredentialClient,
    weight_client: CredentialClient,
    api: Arc<dyn ArenaApi>,
    request_timeout: Duration,
}

impl ArenaClient {
    pub fn new(round: &RoundState, api: Arc<dyn ArenaApi>) -> Self {
        let amount_client = CredentialClient::new(
            round.amount_credential_parameters,
            round.parameters.max_amount_credential_value,
            crate::core::CREDENTIAL_COUNT,
        );
        let weight_client = CredentialClient::new(
            round.weight_credential_parameters,
            round.parameters.max_weight_credential_value,
            crate::core::CREDENTIAL_COUNT,
        );
        Self {
            round_id: round.id,
            fee_rate: round.parameters.fee_rate,
            amount_client,
            weight_client,
            api,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    pub fn amount_client(&self) -> &CredentialClient {
        &self.amount_client
    }

    pub fn weight_client(&self) -> &CredentialClient {
        &self.weight_client
    }

    pub fn api(&self) -> &Arc<dyn ArenaApi> {
        &self.api
    }

    async fn call<T, F>(&self, what: &'static str, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout(what)),
        }
    }

    pub async fn register_input(
        &self,
        outpoint: OutPoint,
        secret_key: &SecretKey,
    ) -> Result<InputRegistration, ClientError> {
        let ownership_proof = OwnershipProof::create(&self.round_id, &outpoint, secret_key);
        let (zero_amount, amount_validation) = self.amount_client.create_zero_request(&mut OsRng);
        let (zero_weight, weight_validation) = self.weight_client.create_zero_request(&mut OsRng);
        let request = InputRegistrationRequest {
            round_id: self.round_id,
            outpoint,
            ownership_proof,
            zero_amount_credential_requests: zero_amount,
            zero_weight_credential_requests: zero_weight,
        };
        let response = self.call("input registration", self.api.register_input(request)).await?;
        let credentials = self.handle_pair(
            &response.amount_credentials,
            amount_validation,
            &response.weight_credentials,
            weight_validation,
        )?;
        Ok(InputRegistration { alice_id: response.alice_id, credentials })
    }

    /// Confirm (or keep alive) an Alice. Returns `None` while the round is
    /// still in input registration.
    pub async fn confirm_connection(
        &self,
        alice_id: AliceId,
        amounts: &[u64],
        weights: &[u64],
        presented: &CredentialPair,
    ) -> Result<Option<CredentialPair>, ClientError> {
        let (amount_request, amount_validation) =
            self.amount_client.create_request(amounts, &presented.amount, &mut OsRng)?;
        let (weight_request, weight_validation) =
            self.weight_client.create_request(weights, &presented.weight, &mut OsRng)?;
        let request = ConnectionConfirmationRequest {
            round_id: self.round_id,
            alice_id,
            amount_credential_requests: amount_request,
            weight_credential_requests: weight_request,
        };
        let response = self.call("connection confirmation", self.api.confirm_connection(request)).await?;
        match (response.amount_credentials, response.weight_credentials) {
            (Some(amount), Some(weight)) => Ok(Some(self.handle_pair(
                &amount,
                amount_validation,
                &weight,
                weight_validation,
            )?)),
            _ => Ok(None),
        }
    }

    /// Spend `presented` into an output of `value` paying to `script`. The
    /// rest comes back as change credentials.
    pub async fn register_output(
        &self,
        script: ScriptBuf,
        value: u64,
        presented: &CredentialPair,
    ) -> Result<CredentialPair, ClientError> {
        let amount_cost = value
            .checked_add(self.fee_rate.fee(output_vsize(&script)))
            .ok_or(crate::crypto::CredentialError::InsufficientValue)?;
        let weight_cost = output_weight(&script);
        let amount_change = presented
            .amount_value()
            .checked_sub(amount_cost)
            .ok_or(crate::crypto::CredentialError::InsufficientValue)?;
        let weight_change = presented
            .weight_value()
            .checked_sub(weight_cost)
            .ok_or(crate::crypto::CredentialError::InsufficientValue)?;

        let (amount_request, amount_validation) =
            self.amount_client.create_request(&[amount_change], &presented.amount, &mut OsRng)?;
        let (weight_request, weight_validation) =
            self.weight_client.create_request(&[weight_change], &presented.weight, &mut OsRng)?;
        let request = OutputRegistrationRequest {
            round_id: self.round_id,
            script,
            value,
            amount_credential_requests: amount_request,
            weight_credential_requests: weight_request,
        };
        let response = self.call("output registration", self.api.register_output(request)).await?;
        self.handle_pair(
            &response.amount_credentials,
            amount_validation,
            &response.weight_credentials,
            weight_validation,
        )
    }

    /// Exchange `presented` for credentials of the given values. Totals must
    /// match per denomination.
    pub async fn reissue_credentials(
        &self,
        amounts: &[u64],
        weights: &[u64],
        presented: &CredentialPair,
    ) -> Result<CredentialPair, ClientError> {
        let (amount_request, amount_validation) =
            self.amount_client.create_request(amounts, &presented.amount, &mut OsRng)?;
        let (weight_request, weight_validation) =
            self.weight_client.create_request(weights, &presented.weight, &mut OsRng)?;
        let request = ReissueCredentialRequest {
            round_id: self.round_id,
            amount_credential_requests: amount_request,
            weight_credential_requests: weight_request,
        };
        let response = self.call("credential issuance", self.api.reissue_credentials(request)).await?;
        self.handle_pair(
            &response.amount_credentials,
            amount_validation,
            &response.weight_credentials,
            weight_validation,
        )
    }

    pub async fn remove_input(&self, alice_id: AliceId) -> Result<(), ClientError> {
        let request = InputsRemovalRequest { round_id: self.round_id, alice_id };
        self.call("input removal", self.api.remove_input(request)).await
    }

    pub async fn sign_transaction(&self, input_witnesses: Vec<InputWitness>) -> Result<(), ClientError> {
        let request = TransactionSignaturesRequest { round_id: self.round_id, input_witnesses };
        self.call("transaction signature", self.api.sign_transaction(request)).await
    }

    fn handle_pair(
        &self,
        amount: &CredentialsResponse,
        amount_validation: CredentialsResponseValidation,
        weight: &CredentialsResponse,
        weight_validation: CredentialsResponseValidation,
    ) -> Result<CredentialPair, ClientError> {
        Ok(CredentialPair {
            amount: self.amount_client.handle_response(amount, amount_validation)?,
            weight: self.weight_client.handle_response(weight, weight_validation)?,
        })
    }
}
