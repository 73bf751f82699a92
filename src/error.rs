use crate::core::{AliceId, Phase, RoundId};
use crate::crypto::CredentialError;
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections returned by the coordinator. Serializable so the exact
/// reason survives the HTTP boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum ArenaError {
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("round {round} is in {actual}, request needs {expected:?}")]
    WrongPhase { round: RoundId, actual: Phase, expected: Vec<Phase> },
    #[error("alice {0} not found")]
    AliceNotFound(AliceId),
    #[error("alice {0} already confirmed")]
    AliceAlreadyConfirmed(AliceId),
    #[error("alice {0} already confirmed and can no longer be removed")]
    AliceCannotBeRemoved(AliceId),
    #[error("input {outpoint} is banned until {until}")]
    InputBanned { outpoint: OutPoint, until: u64 },
    #[error("input {0} is already registered")]
    AliceAlreadyRegistered(OutPoint),
    #[error("input {0} is unknown or spent")]
    InputSpent(OutPoint),
    #[error("input {0} does not have enough confirmations")]
    InputUnconfirmed(OutPoint),
    #[error("input {0} is an immature coinbase")]
    InputImmature(OutPoint),
    #[error("input {0} is not a P2WPKH output")]
    NonStandardInput(OutPoint),
    #[error("input value {value} is outside [{min}, {max}]")]
    InputValueOutOfRange { value: u64, min: u64, max: u64 },
    #[error("ownership proof is invalid")]
    WrongOwnershipProof,
    #[error("round is full")]
    TooManyInputs,
    #[error("output script is not P2WPKH or P2TR")]
    NonStandardOutput,
    #[error("output value {value} is below the minimum of {min}")]
    OutputBelowMinimum { value: u64, min: u64 },
    #[error("output value {value} is above the maximum of {max}")]
    OutputAboveMaximum { value: u64, max: u64 },
    #[error("output script is already registered")]
    AlreadyRegisteredScript,
    #[error("input {0} is not in the coinjoin")]
    InputNotInTransaction(OutPoint),
    #[error("input {0} is already signed")]
    WitnessAlreadyProvided(OutPoint),
    #[error("invalid witness for input {outpoint}: {reason}")]
    WrongSignature { outpoint: OutPoint, reason: String },
    #[error("credential request rejected: {0}")]
    Credential(CredentialError),
    #[error("utxo lookup failed: {0}")]
    UtxoLookup(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CredentialError> for ArenaError {
    fn from(e: CredentialError) -> Self {
        ArenaError::Credential(e)
    }
}

pub type Result<T, E = ArenaError> = std::result::Result<T, E>;
