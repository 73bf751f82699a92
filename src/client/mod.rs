//! Participant side of the protocol.
//!
//! [`ArenaClient`] turns credential operations into coordinator requests,
//! [`AliceClient`] and [`BobClient`] drive one input and one output through
//! a round, and [`CoinJoinClient`] orchestrates a whole participation.

pub mod alice;
pub mod arena_client;
pub mod bob;
pub mod coinjoin;
pub mod http;
pub mod keys;
pub mod round_state;

pub use alice::AliceClient;
pub use arena_client::{ArenaClient, CredentialPair};
pub use bob::BobClient;
pub use coinjoin::{CoinJoinClient, CoinJoinClientConfig, CoinJoinResult, OwnedCoin};
pub use http::HttpArenaApi;
pub use keys::KeyChain;
pub use round_state::RoundStateUpdater;

use crate::api::ApiError;
use crate::core::{Phase, RoundId, WitnessError};
use crate::crypto::CredentialError;
use crate::error::ArenaError;
use bitcoin::OutPoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("coordinator rejected the request: {0}")]
    Rejected(ArenaError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Witness(#[from] WitnessError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("participation cancelled")]
    Cancelled,
    #[error("input {0} is not in the coinjoin")]
    InputNotInTransaction(OutPoint),
    #[error("key does not own coin {0}")]
    NotCoinOwner(OutPoint),
    #[error("coordinator transaction is missing {missing} of our {expected} outputs")]
    MissingOutputs { missing: usize, expected: usize },
    #[error("round {round} ended in {phase}")]
    RoundEnded { round: RoundId, phase: Phase },
    #[error("round {round} is already in {actual}, expected {expected}")]
    PhaseMissed { round: RoundId, expected: Phase, actual: Phase },
    #[error("no participant made it through {0}")]
    NoParticipants(&'static str),
}

impl From<ApiError> for ClientError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Arena(e) => ClientError::Rejected(e),
            ApiError::Transport(e) => ClientError::Transport(e),
        }
    }
}
