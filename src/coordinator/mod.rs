//! Coordinator side: the arena of rounds, the request handler in front of
//! it, and the prison consulted at input registration.

pub mod arena;
pub mod handler;
pub mod idempotency;
pub mod prison;
pub mod round;
pub mod utxo;

pub use arena::Arena;
pub use handler::ArenaRequestHandler;
pub use idempotency::IdempotencyCache;
pub use prison::{Offense, Prison};
pub use round::Round;
pub use utxo::{BitcoindRpc, MemoryUtxoSet, UtxoInfo, UtxoProvider};
