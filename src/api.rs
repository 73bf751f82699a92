//! Protocol messages exchanged between participants and the coordinator,
//! and the [`ArenaApi`] trait both the in-process handler and the HTTP
//! client implement.

use crate::config::CoordinatorConfig;
use crate::core::{AliceId, CoinjoinTemplate, FeeRate, OwnershipProof, Phase, RoundId};
use crate::crypto::{CredentialIssuerParameters, CredentialsResponse, RealCredentialsRequest, ZeroCredentialsRequest};
use crate::error::ArenaError;
use async_trait::async_trait;
use bitcoin::{OutPoint, ScriptBuf, Witness};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Policy fixed for the lifetime of one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundParameters {
    pub fee_rate: FeeRate,
    pub min_input_count: usize,
    pub max_input_count: usize,
    pub min_registrable_amount: u64,
    pub max_registrable_amount: u64,
    pub min_output_amount: u64,
    pub max_weight_per_alice: u64,
    pub max_amount_credential_value: u64,
    pub max_weight_credential_value: u64,
    pub input_registration_timeout: Duration,
    pub connection_confirmation_timeout: Duration,
    pub output_registration_timeout: Duration,
    pub transaction_signing_timeout: Duration,
    pub alice_keepalive_timeout: Duration,
}

impl RoundParameters {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            fee_rate: config.fee_rate(),
            min_input_count: config.min_input_count_by_round,
            max_input_count: config.max_input_count_by_round,
            min_registrable_amount: config.min_registrable_amount,
            max_registrable_amount: config.max_registrable_amount,
            min_output_amount: config.min_output_amount,
            max_weight_per_alice: config.max_weight_per_alice,
            max_amount_credential_value: config.max_amount_credential_value,
            max_weight_credential_value: config.max_weight_credential_value,
            input_registration_timeout: config.input_registration_timeout(),
            connection_confirmation_timeout: config.connection_confirmation_timeout(),
            output_registration_timeout: config.output_registration_timeout(),
            transaction_signing_timeout: config.transaction_signing_timeout(),
            alice_keepalive_timeout: config.alice_keepalive_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndRoundReason {
    Success,
    NotEnoughInputs,
    NotEnoughConfirmations,
    NoOutputs,
    NotEnoughFunds,
    SigningTimeout,
}

/// Public snapshot of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    pub id: RoundId,
    pub phase: Phase,
    pub parameters: RoundParameters,
    pub amount_credential_parameters: CredentialIssuerParameters,
    pub weight_credential_parameters: CredentialIssuerParameters,
    pub input_count: usize,
    pub confirmed_count: usize,
    pub coinjoin: CoinjoinTemplate,
    pub end_reason: Option<EndRoundReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRegistrationRequest {
    pub round_id: RoundId,
    pub outpoint: OutPoint,
    pub ownership_proof: OwnershipProof,
    pub zero_amount_credential_requests: ZeroCredentialsRequest,
    pub zero_weight_credential_requests: ZeroCredentialsRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRegistrationResponse {
    pub alice_id: AliceId,
    pub amount_credentials: CredentialsResponse,
    pub weight_credentials: CredentialsResponse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
    pub round_id: RoundId,
    pub alice_id: AliceId,
    pub amount_credential_requests: RealCredentialsRequest,
    pub weight_credential_requests: RealCredentialsRequest,
}

/// Credentials are only present once the round is confirming connections;
/// during input registration a confirmation just keeps the Alice alive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfirmationResponse {
    pub amount_credentials: Option<CredentialsResponse>,
    pub weight_credentials: Option<CredentialsResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationRequest {
    pub round_id: RoundId,
    pub script: ScriptBuf,
    pub value: u64,
    pub amount_credential_requests: RealCredentialsRequest,
    pub weight_credential_requests: RealCredentialsRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRegistrationResponse {
    pub amount_credentials: CredentialsResponse,
    pub weight_credentials: CredentialsResponse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReissueCredentialRequest {
    pub round_id: RoundId,
    pub amount_credential_requests: RealCredentialsRequest,
    pub weight_credential_requests: RealCredentialsRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReissueCredentialResponse {
    pub amount_credentials: CredentialsResponse,
    pub weight_credentials: CredentialsResponse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputsRemovalRequest {
    pub round_id: RoundId,
    pub alice_id: AliceId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputWitness {
    pub outpoint: OutPoint,
    pub witness: Witness,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionSignaturesRequest {
    pub round_id: RoundId,
    pub input_witnesses: Vec<InputWitness>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("transport error: {0}")]
    Transport(String),
}

/// The request/response contract of the coordinator.
#[async_trait]
pub trait ArenaApi: Send + Sync {
    async fn register_input(&self, request: InputRegistrationRequest) -> Result<InputRegistrationResponse, ApiError>;

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse, ApiError>;

    async fn register_output(&self, request: OutputRegistrationRequest) -> Result<OutputRegistrationResponse, ApiError>;

    async fn reissue_credentials(&self, request: ReissueCredentialRequest) -> Result<ReissueCredentialResponse, ApiError>;

    async fn remove_input(&self, request: InputsRemovalRequest) -> Result<(), ApiError>;

    async fn sign_transaction(&self, request: TransactionSignaturesRequest) -> Result<(), ApiError>;

    async fn get_status(&self) -> Result<Vec<RoundState>, ApiError>;
}
