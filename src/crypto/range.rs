use super::generators::Generators;
use super::CredentialError;
use bulletproofs::{BulletproofGens, PedersenGens, RangeProof};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use std::sync::OnceLock;

const RANGE_BITS: usize = 64;

fn bulletproof_gens() -> &'static BulletproofGens {
    static GENS: OnceLock<BulletproofGens> = OnceLock::new();
    GENS.get_or_init(|| BulletproofGens::new(RANGE_BITS, 2))
}

/// Prove `0 <= value <= max` for the commitment `value·Gg + blinding·Gh`.
///
/// Both `value` and `max - value` are shown to be 64-bit, which bounds the
/// committed value from both sides.
pub fn prove_range(
    transcript: &mut Transcript,
    value: u64,
    blinding: &Scalar,
    max: u64,
) -> Result<RangeProof, CredentialError> {
    if value > max {
        return Err(CredentialError::ValueOutOfRange { value, max });
    }
    let (proof, _commitments) = RangeProof::prove_multiple(
        bulletproof_gens(),
        &PedersenGens::default(),
        transcript,
        &[value, max - value],
        &[*blinding, -blinding],
        RANGE_BITS,
    )
    .map_err(|e| CredentialError::invalid_proof(format!("range proof: {e}")))?;
    Ok(proof)
}

pub fn verify_range(
    transcript: &mut Transcript,
    commitment: &RistrettoPoint,
    max: u64,
    proof: &RangeProof,
) -> Result<(), CredentialError> {
    let g = Generators::get();
    let complement = Scalar::from(max) * g.gg - commitment;
    proof
        .verify_multiple(
            bulletproof_gens(),
            &PedersenGens::default(),
            transcript,
            &[commitment.compress(), complement.compress()],
            RANGE_BITS,
        )
        .map_err(|_| CredentialError::invalid_proof("range proof rejected"))
}
