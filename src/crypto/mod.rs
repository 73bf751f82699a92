//! Anonymous value credentials (keyed-verification anonymous credentials
//! over Ristretto) used to move amount and weight from inputs to outputs
//! without linking them.
//!
//! A round runs two independent [`CredentialIssuer`]s, one per
//! denomination. Participants hold [`Credential`]s, present them in
//! randomized form, and receive fresh ones of equal total value plus the
//! delta the coordinator authorises for the request.

pub mod client;
pub mod credential;
pub mod generators;
pub mod issuer;
pub mod mac;
pub mod proof;
pub mod range;
pub mod transcript;

pub use client::{CredentialClient, CredentialsResponseValidation};
pub use credential::{
    Credential, CredentialPresentation, CredentialsResponse, IssuanceRequest, RealCredentialsRequest,
    ZeroCredentialsRequest,
};
pub use issuer::CredentialIssuer;
pub use mac::{CredentialIssuerParameters, CredentialIssuerSecretKey, Mac};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialError {
    #[error("expected {expected} credentials, got {got}")]
    InvalidCredentialCount { expected: usize, got: usize },
    #[error("credential value {value} exceeds the maximum of {max}")]
    ValueOutOfRange { value: u64, max: u64 },
    #[error("request delta {got} does not match the authorised {expected}")]
    DeltaMismatch { expected: i64, got: i64 },
    #[error("proof verification failed: {reason}")]
    InvalidProof { reason: String },
    #[error("serial number was already used")]
    SerialNumberReused,
    #[error("serial number appears twice in one request")]
    DuplicateSerialNumber,
    #[error("issuance would exceed the value registered with this issuer")]
    InsufficientBalance,
    #[error("presented credential values do not cover the request")]
    InsufficientValue,
}

impl CredentialError {
    pub(crate) fn invalid_proof(reason: impl Into<String>) -> Self {
        CredentialError::InvalidProof { reason: reason.into() }
    }
}
