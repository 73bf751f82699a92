//! Proofs of knowledge for systems of linear relations over Ristretto.
//!
//! A [`Statement`] is a list of equations `P_j = Σ_i w_i · G_ji` sharing one
//! secret witness vector `w`. Every credential proof (issuance, show,
//! balance, zero) is an instance of this, so one prover and one verifier
//! cover the whole protocol.

use super::transcript::TranscriptProtocol;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct Equation {
    pub public: RistrettoPoint,
    pub generators: Vec<RistrettoPoint>,
}

#[derive(Clone, Debug)]
pub struct Statement {
    witness_len: usize,
    equations: Vec<Equation>,
}

impl Statement {
    pub fn new(witness_len: usize) -> Self {
        Self { witness_len, equations: Vec::new() }
    }

    /// Add `public = Σ w_i · generators[i]`. Absent terms use the identity.
    pub fn equation(mut self, public: RistrettoPoint, generators: Vec<RistrettoPoint>) -> Self {
        debug_assert_eq!(generators.len(), self.witness_len);
        self.equations.push(Equation { public, generators });
        self
    }

    pub fn witness_len(&self) -> usize {
        self.witness_len
    }

    fn commit_to(&self, transcript: &mut Transcript) {
        transcript.append_u64(b"equations", self.equations.len() as u64);
        transcript.append_u64(b"witness-len", self.witness_len as u64);
        for eq in &self.equations {
            transcript.append_points(b"public", std::iter::once(&eq.public));
            transcript.append_points(b"generator", &eq.generators);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub nonces: Vec<CompressedRistretto>,
    pub responses: Vec<Scalar>,
}

pub fn prove<R: RngCore + CryptoRng>(
    transcript: &mut Transcript,
    label: &'static [u8],
    statement: &Statement,
    witness: &[Scalar],
    rng: &mut R,
) -> Proof {
    debug_assert_eq!(witness.len(), statement.witness_len);
    transcript.domain_sep(label);
    statement.commit_to(transcript);

    let randomness: Vec<Scalar> = (0..statement.witness_len).map(|_| Scalar::random(rng)).collect();
    let nonces: Vec<CompressedRistretto> = statement
        .equations
        .iter()
        .map(|eq| RistrettoPoint::vartime_multiscalar_mul(&randomness, &eq.generators).compress())
        .collect();
    for nonce in &nonces {
        transcript.append_point(b"nonce", nonce);
    }

    let challenge = transcript.challenge_scalar(b"challenge");
    let responses = randomness
        .iter()
        .zip(witness)
        .map(|(k, w)| k + challenge * w)
        .collect();

    Proof { nonces, responses }
}

pub fn verify(
    transcript: &mut Transcript,
    label: &'static [u8],
    statement: &Statement,
    proof: &Proof,
) -> bool {
    if proof.nonces.len() != statement.equations.len() || proof.responses.len() != statement.witness_len {
        return false;
    }
    transcript.domain_sep(label);
    statement.commit_to(transcript);
    for nonce in &proof.nonces {
        transcript.append_point(b"nonce", nonce);
    }
    let challenge = transcript.challenge_scalar(b"challenge");

    statement.equations.iter().zip(&proof.nonces).all(|(eq, nonce)| {
        let Some(nonce) = nonce.decompress() else {
            return false;
        };
        let lhs = RistrettoPoint::vartime_multiscalar_mul(&proof.responses, &eq.generators);
        lhs == nonce + challenge * eq.public
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generators::Generators;
    use rand::rngs::OsRng;

    fn pedersen_statement(x: Scalar, r: Scalar) -> Statement {
        let g = Generators::get();
        Statement::new(2).equation(x * g.gg + r * g.gh, vec![g.gg, g.gh])
    }

    #[test]
    fn valid_proof_verifies() {
        let (x, r) = (Scalar::from(42u64), Scalar::random(&mut OsRng));
        let statement = pedersen_statement(x, r);
        let proof = prove(&mut Transcript::new(b"test"), b"p", &statement, &[x, r], &mut OsRng);
        assert!(verify(&mut Transcript::new(b"test"), b"p", &statement, &proof));
    }

    #[test]
    fn wrong_witness_fails() {
        let (x, r) = (Scalar::from(42u64), Scalar::random(&mut OsRng));
        let statement = pedersen_statement(x, r);
        let proof = prove(&mut Transcript::new(b"test"), b"p", &statement, &[x + Scalar::ONE, r], &mut OsRng);
        assert!(!verify(&mut Transcript::new(b"test"), b"p", &statement, &proof));
    }

    #[test]
    fn proof_is_bound_to_transcript() {
        let (x, r) = (Scalar::from(7u64), Scalar::random(&mut OsRng));
        let statement = pedersen_statement(x, r);
        let proof = prove(&mut Transcript::new(b"one"), b"p", &statement, &[x, r], &mut OsRng);
        assert!(!verify(&mut Transcript::new(b"two"), b"p", &statement, &proof));
    }

    #[test]
    fn shape_mismatch_fails() {
        let (x, r) = (Scalar::from(7u64), Scalar::random(&mut OsRng));
        let statement = pedersen_statement(x, r);
        let mut proof = prove(&mut Transcript::new(b"t"), b"p", &statement, &[x, r], &mut OsRng);
        proof.responses.pop();
        assert!(!verify(&mut Transcript::new(b"t"), b"p", &statement, &proof));
    }
}
