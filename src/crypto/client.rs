use super::credential::*;
use super::generators::Generators;
use super::mac::CredentialIssuerParameters;
use super::proof;
use super::range;
use super::CredentialError;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};

/// Builds credential requests against one issuer's public parameters and
/// validates the issuer's responses. Holds no credentials itself.
#[derive(Clone, Debug)]
pub struct CredentialClient {
    parameters: CredentialIssuerParameters,
    max_value: u64,
    credential_count: usize,
}

/// Secrets a client keeps between sending a request and reading the reply.
#[derive(Debug)]
pub struct CredentialsResponseValidation {
    requested: Vec<PendingCredential>,
}

#[derive(Debug)]
struct PendingCredential {
    value: u64,
    randomness: Scalar,
    ma: RistrettoPoint,
}

impl CredentialsResponseValidation {
    pub fn values(&self) -> Vec<u64> {
        self.requested.iter().map(|p| p.value).collect()
    }
}

impl CredentialClient {
    pub fn new(parameters: CredentialIssuerParameters, max_value: u64, credential_count: usize) -> Self {
        Self { parameters, max_value, credential_count }
    }

    pub fn parameters(&self) -> &CredentialIssuerParameters {
        &self.parameters
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    pub fn credential_count(&self) -> usize {
        self.credential_count
    }

    pub fn create_zero_request<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> (ZeroCredentialsRequest, CredentialsResponseValidation) {
        let g = Generators::get();
        let pending: Vec<PendingCredential> = (0..self.credential_count)
            .map(|_| {
                let randomness = Scalar::random(rng);
                PendingCredential { value: 0, randomness, ma: randomness * g.gh }
            })
            .collect();
        let requested: Vec<RistrettoPoint> = pending.iter().map(|p| p.ma).collect();

        let mut transcript = zero_request_transcript(&requested);
        let proofs = pending
            .iter()
            .map(|p| proof::prove(&mut transcript, b"zero", &zero_statement(&p.ma), &[p.randomness], rng))
            .collect();

        (
            ZeroCredentialsRequest { requested, proofs },
            CredentialsResponseValidation { requested: pending },
        )
    }

    /// Present `presented` and request credentials worth `amounts` (padded
    /// with zeros). The request's delta is `Σ amounts - Σ presented`.
    pub fn create_request<R: RngCore + CryptoRng>(
        &self,
        amounts: &[u64],
        presented: &[Credential],
        rng: &mut R,
    ) -> Result<(RealCredentialsRequest, CredentialsResponseValidation), CredentialError> {
        if presented.len() != self.credential_count {
            return Err(CredentialError::InvalidCredentialCount {
                expected: self.credential_count,
                got: presented.len(),
            });
        }
        if amounts.len() > self.credential_count {
            return Err(CredentialError::InvalidCredentialCount {
                expected: self.credential_count,
                got: amounts.len(),
            });
        }
        if let Some(&value) = amounts.iter().find(|&&v| v > self.max_value) {
            return Err(CredentialError::ValueOutOfRange { value, max: self.max_value });
        }

        let requested_total: i128 = amounts.iter().map(|&v| v as i128).sum();
        let presented_total: i128 = presented.iter().map(|c| c.value as i128).sum();
        let delta = i64::try_from(requested_total - presented_total)
            .map_err(|_| CredentialError::InsufficientValue)?;

        let g = Generators::get();
        let mut values = amounts.to_vec();
        values.resize(self.credential_count, 0);
        let pending: Vec<PendingCredential> = values
            .iter()
            .map(|&value| {
                let randomness = Scalar::random(rng);
                PendingCredential { value, randomness, ma: Scalar::from(value) * g.gg + randomness * g.gh }
            })
            .collect();
        let requested_points: Vec<RistrettoPoint> = pending.iter().map(|p| p.ma).collect();

        let shown: Vec<(CredentialPresentation, Scalar)> = presented.iter().map(|c| c.present(rng)).collect();
        let presentations: Vec<CredentialPresentation> = shown.iter().map(|(p, _)| p.clone()).collect();

        let mut transcript = real_request_transcript(delta, &presentations, &requested_points);

        let mut show_proofs = Vec::with_capacity(presented.len());
        for (credential, (presentation, z)) in presented.iter().zip(&shown) {
            let t = credential.mac.t;
            let witness = [*z, -(t * z), t, Scalar::from(credential.value), credential.randomness];
            let statement = show_statement(&self.parameters, z * self.parameters.i, presentation);
            show_proofs.push(proof::prove(&mut transcript, b"show", &statement, &witness, rng));
        }

        let z_sum: Scalar = shown.iter().map(|(_, z)| z).sum();
        let r_presented: Scalar = presented.iter().map(|c| c.randomness).sum();
        let r_requested: Scalar = pending.iter().map(|p| p.randomness).sum();
        let balance = balance_statement(delta, &presentations, &requested_points);
        let balance_proof = proof::prove(
            &mut transcript,
            b"balance",
            &balance,
            &[z_sum, r_presented - r_requested],
            rng,
        );

        let mut requested = Vec::with_capacity(pending.len());
        for p in &pending {
            let range_proof = range::prove_range(&mut transcript, p.value, &p.randomness, self.max_value)?;
            requested.push(IssuanceRequest { ma: p.ma, range_proof });
        }

        Ok((
            RealCredentialsRequest { delta, presented: presentations, requested, show_proofs, balance_proof },
            CredentialsResponseValidation { requested: pending },
        ))
    }

    /// Check every issuance proof and turn the MACs into credentials.
    pub fn handle_response(
        &self,
        response: &CredentialsResponse,
        validation: CredentialsResponseValidation,
    ) -> Result<Vec<Credential>, CredentialError> {
        let pending = validation.requested;
        if response.issued.len() != pending.len() || response.proofs.len() != pending.len() {
            return Err(CredentialError::InvalidCredentialCount {
                expected: pending.len(),
                got: response.issued.len(),
            });
        }
        let requested: Vec<RistrettoPoint> = pending.iter().map(|p| p.ma).collect();
        let mut transcript = issuance_transcript(&self.parameters, &requested);
        for ((mac, issuance_proof), p) in response.issued.iter().zip(&response.proofs).zip(&pending) {
            let statement = issuance_statement(&self.parameters, mac, &p.ma);
            if !proof::verify(&mut transcript, b"issuance", &statement, issuance_proof) {
                return Err(CredentialError::invalid_proof("issuance"));
            }
        }
        Ok(pending
            .into_iter()
            .zip(&response.issued)
            .map(|(p, mac)| Credential { value: p.value, randomness: p.randomness, mac: *mac })
            .collect())
    }
}
