use super::credential::*;
use super::mac::{CredentialIssuerParameters, CredentialIssuerSecretKey, Mac};
use super::proof::{self, Proof};
use super::range;
use super::CredentialError;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::collections::HashSet;

/// Issues credentials for one denomination of one round.
///
/// Besides the MAC key, the issuer keeps two ledgers: the serial numbers of
/// every credential already redeemed, and the running balance of authorised
/// deltas. The balance is the value currently held by participants; it can
/// never go negative, so no request can take out more than was granted.
pub struct CredentialIssuer {
    secret_key: CredentialIssuerSecretKey,
    parameters: CredentialIssuerParameters,
    max_value: u64,
    credential_count: usize,
    serial_numbers: HashSet<[u8; 32]>,
    balance: i128,
    issued: u64,
}

/// A fully validated request awaiting [`CredentialIssuer::commit`].
#[derive(Debug)]
pub struct PreparedIssuance {
    delta: i64,
    serial_numbers: Vec<[u8; 32]>,
    requested: Vec<RistrettoPoint>,
}

impl CredentialIssuer {
    pub fn new(secret_key: CredentialIssuerSecretKey, max_value: u64, credential_count: usize) -> Self {
        let parameters = secret_key.compute_parameters();
        Self {
            secret_key,
            parameters,
            max_value,
            credential_count,
            serial_numbers: HashSet::new(),
            balance: 0,
            issued: 0,
        }
    }

    pub fn random<R: RngCore + CryptoRng>(max_value: u64, credential_count: usize, rng: &mut R) -> Self {
        Self::new(CredentialIssuerSecretKey::random(rng), max_value, credential_count)
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

    /// Value currently held by participants.
    pub fn balance(&self) -> i128 {
        self.balance
    }

    /// Number of credentials issued so far.
    pub fn issued_count(&self) -> u64 {
        self.issued
    }

    pub fn handle_zero_request<R: RngCore + CryptoRng>(
        &mut self,
        request: &ZeroCredentialsRequest,
        rng: &mut R,
    ) -> Result<CredentialsResponse, CredentialError> {
        self.check_count(request.requested.len())?;
        if request.proofs.len() != request.requested.len() {
            return Err(CredentialError::invalid_proof("missing zero proofs"));
        }
        let mut transcript = zero_request_transcript(&request.requested);
        for (ma, proof) in request.requested.iter().zip(&request.proofs) {
            if !proof::verify(&mut transcript, b"zero", &zero_statement(ma), proof) {
                return Err(CredentialError::invalid_proof("zero credential proof"));
            }
        }
        Ok(self.issue(&request.requested, rng))
    }

    /// Validate a real request against the authorised `expected_delta`
    /// without touching any ledger.
    pub fn prepare_request(
        &self,
        request: &RealCredentialsRequest,
        expected_delta: i64,
    ) -> Result<PreparedIssuance, CredentialError> {
        if request.delta != expected_delta {
            return Err(CredentialError::DeltaMismatch { expected: expected_delta, got: request.delta });
        }
        self.check_count(request.presented.len())?;
        self.check_count(request.requested.len())?;
        if request.show_proofs.len() != request.presented.len() {
            return Err(CredentialError::invalid_proof("missing show proofs"));
        }

        let mut serial_numbers = Vec::with_capacity(request.presented.len());
        for p in &request.presented {
            let serial = p.serial_number();
            if serial_numbers.contains(&serial) {
                return Err(CredentialError::DuplicateSerialNumber);
            }
            if self.serial_numbers.contains(&serial) {
                return Err(CredentialError::SerialNumberReused);
            }
            serial_numbers.push(serial);
        }

        if self.balance + (request.delta as i128) < 0 {
            return Err(CredentialError::InsufficientBalance);
        }

        let requested: Vec<RistrettoPoint> = request.requested.iter().map(|r| r.ma).collect();
        let mut transcript = real_request_transcript(request.delta, &request.presented, &requested);

        for (p, show_proof) in request.presented.iter().zip(&request.show_proofs) {
            let z = p.compute_z(&self.secret_key);
            let statement = show_statement(&self.parameters, z, p);
            if !proof::verify(&mut transcript, b"show", &statement, show_proof) {
                return Err(CredentialError::invalid_proof("credential presentation"));
            }
        }

        let balance = balance_statement(request.delta, &request.presented, &requested);
        if !proof::verify(&mut transcript, b"balance", &balance, &request.balance_proof) {
            return Err(CredentialError::invalid_proof("balance"));
        }

        for r in &request.requested {
            range::verify_range(&mut transcript, &r.ma, self.max_value, &r.range_proof)?;
        }

        Ok(PreparedIssuance { delta: request.delta, serial_numbers, requested })
    }

    /// Apply a prepared request: burn the serial numbers, book the delta and
    /// issue the new credentials.
    pub fn commit<R: RngCore + CryptoRng>(
        &mut self,
        prepared: PreparedIssuance,
        rng: &mut R,
    ) -> CredentialsResponse {
        self.serial_numbers.extend(prepared.serial_numbers);
        self.balance += prepared.delta as i128;
        self.issue(&prepared.requested, rng)
    }

    pub fn handle_request<R: RngCore + CryptoRng>(
        &mut self,
        request: &RealCredentialsRequest,
        expected_delta: i64,
        rng: &mut R,
    ) -> Result<CredentialsResponse, CredentialError> {
        let prepared = self.prepare_request(request, expected_delta)?;
        Ok(self.commit(prepared, rng))
    }

    fn check_count(&self, got: usize) -> Result<(), CredentialError> {
        if got != self.credential_count {
            return Err(CredentialError::InvalidCredentialCount { expected: self.credential_count, got });
        }
        Ok(())
    }

    fn issue<R: RngCore + CryptoRng>(&mut self, requested: &[RistrettoPoint], rng: &mut R) -> CredentialsResponse {
        let witness = [
            self.secret_key.w,
            self.secret_key.wp,
            self.secret_key.x0,
            self.secret_key.x1,
            self.secret_key.ya,
        ];
        let mut transcript = issuance_transcript(&self.parameters, requested);
        let mut issued: Vec<Mac> = Vec::with_capacity(requested.len());
        let mut proofs: Vec<Proof> = Vec::with_capacity(requested.len());
        for ma in requested {
            let mac = self.secret_key.compute_mac(ma, Scalar::random(rng));
            let statement = issuance_statement(&self.parameters, &mac, ma);
            proofs.push(proof::prove(&mut transcript, b"issuance", &statement, &witness, rng));
            issued.push(mac);
        }
        self.issued += issued.len() as u64;
        CredentialsResponse { issued, proofs }
    }
}
