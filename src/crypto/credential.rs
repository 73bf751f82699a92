use super::generators::{mac_u, scalar_from_i64, Generators};
use super::mac::{CredentialIssuerParameters, CredentialIssuerSecretKey, Mac};
use super::proof::{Proof, Statement};
use super::transcript::TranscriptProtocol;
use bulletproofs::RangeProof;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// A credential held by a participant: the committed value, the commitment
/// randomness, and the issuer's MAC over `Ma = value·Gg + randomness·Gh`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub value: u64,
    pub randomness: Scalar,
    pub mac: Mac,
}

/// Randomized form of a credential, unlinkable to its issuance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPresentation {
    pub ca: RistrettoPoint,
    pub cx0: RistrettoPoint,
    pub cx1: RistrettoPoint,
    pub cv: RistrettoPoint,
    /// Serial number `r·Gs`; reuse is detected by the issuer.
    pub s: RistrettoPoint,
}

/// One requested credential: the attribute commitment and its range proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuanceRequest {
    pub ma: RistrettoPoint,
    pub range_proof: RangeProof,
}

/// Request for zero-valued credentials; each `Ma` is proven to be `r·Gh`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZeroCredentialsRequest {
    pub requested: Vec<RistrettoPoint>,
    pub proofs: Vec<Proof>,
}

/// Request presenting credentials and asking for new ones whose values sum
/// to the presented total plus `delta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealCredentialsRequest {
    pub delta: i64,
    pub presented: Vec<CredentialPresentation>,
    pub requested: Vec<IssuanceRequest>,
    pub show_proofs: Vec<Proof>,
    pub balance_proof: Proof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub issued: Vec<Mac>,
    pub proofs: Vec<Proof>,
}

impl Credential {
    pub fn commitment(&self) -> RistrettoPoint {
        let g = Generators::get();
        Scalar::from(self.value) * g.gg + self.randomness * g.gh
    }

    /// Randomize the credential with a fresh `z`, returned for the proofs.
    pub fn present<R: RngCore + CryptoRng>(&self, rng: &mut R) -> (CredentialPresentation, Scalar) {
        let g = Generators::get();
        let z = Scalar::random(rng);
        let u = mac_u(&self.mac.t);
        let presentation = CredentialPresentation {
            ca: z * g.ga + self.commitment(),
            cx0: z * g.gx0 + u,
            cx1: z * g.gx1 + self.mac.t * u,
            cv: z * g.gv + self.mac.v,
            s: self.randomness * g.gs,
        };
        (presentation, z)
    }
}

impl CredentialPresentation {
    /// Issuer-side `Z = CV - (w·Gw + x0·Cx0 + x1·Cx1 + ya·Ca)`, equal to
    /// `z·I` for a credential this key issued.
    pub fn compute_z(&self, sk: &CredentialIssuerSecretKey) -> RistrettoPoint {
        let g = Generators::get();
        self.cv - (sk.w * g.gw + sk.x0 * self.cx0 + sk.x1 * self.cx1 + sk.ya * self.ca)
    }

    pub fn serial_number(&self) -> [u8; 32] {
        self.s.compress().to_bytes()
    }
}

// ─── Statements ─────────────────────────────────────────────────────────────
//
// Witness orders:
//   issuance: [w, wp, x0, x1, ya]
//   show:     [z, -t·z, t, value, randomness]
//   balance:  [Σz, Σr_presented - Σr_requested]
//   zero:     [r]

pub(crate) fn issuance_statement(
    params: &CredentialIssuerParameters,
    mac: &Mac,
    ma: &RistrettoPoint,
) -> Statement {
    let g = Generators::get();
    let o = RistrettoPoint::identity();
    let u = mac_u(&mac.t);
    Statement::new(5)
        .equation(mac.v, vec![g.gw, o, u, mac.t * u, *ma])
        .equation(params.cw, vec![g.gw, g.gwp, o, o, o])
        .equation(g.gv - params.i, vec![o, o, g.gx0, g.gx1, g.ga])
}

pub(crate) fn show_statement(
    params: &CredentialIssuerParameters,
    z: RistrettoPoint,
    p: &CredentialPresentation,
) -> Statement {
    let g = Generators::get();
    let o = RistrettoPoint::identity();
    Statement::new(5)
        .equation(z, vec![params.i, o, o, o, o])
        .equation(p.cx1, vec![g.gx1, g.gx0, p.cx0, o, o])
        .equation(p.ca, vec![g.ga, o, o, g.gg, g.gh])
        .equation(p.s, vec![o, o, o, o, g.gs])
}

pub(crate) fn balance_statement(
    delta: i64,
    presented: &[CredentialPresentation],
    requested: &[RistrettoPoint],
) -> Statement {
    let g = Generators::get();
    let presented_sum: RistrettoPoint = presented.iter().map(|p| p.ca).sum();
    let requested_sum: RistrettoPoint = requested.iter().sum();
    let public = presented_sum - requested_sum + scalar_from_i64(delta) * g.gg;
    Statement::new(2).equation(public, vec![g.ga, g.gh])
}

pub(crate) fn zero_statement(ma: &RistrettoPoint) -> Statement {
    Statement::new(1).equation(*ma, vec![Generators::get().gh])
}

// ─── Transcripts ────────────────────────────────────────────────────────────

pub(crate) fn zero_request_transcript(requested: &[RistrettoPoint]) -> Transcript {
    let mut t = Transcript::new(b"wabisabi/zero-request");
    t.append_points(b"ma", requested);
    t
}

pub(crate) fn real_request_transcript(
    delta: i64,
    presented: &[CredentialPresentation],
    requested: &[RistrettoPoint],
) -> Transcript {
    let mut t = Transcript::new(b"wabisabi/real-request");
    t.append_message(b"delta", &delta.to_le_bytes());
    for p in presented {
        t.append_points(b"presented", [&p.ca, &p.cx0, &p.cx1, &p.cv, &p.s]);
    }
    t.append_points(b"ma", requested);
    t
}

pub(crate) fn issuance_transcript(params: &CredentialIssuerParameters, requested: &[RistrettoPoint]) -> Transcript {
    let mut t = Transcript::new(b"wabisabi/issuance");
    t.append_points(b"params", [&params.cw, &params.i]);
    t.append_points(b"ma", requested);
    t
}
