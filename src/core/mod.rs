pub mod transaction;
pub mod types;

pub use transaction::{sign_p2wpkh_input, verify_p2wpkh_witness, CoinjoinTemplate, WitnessError};
pub use types::*;
