//! State of one coinjoin round.
//!
//! A [`Round`] is owned by the [`Arena`](super::Arena) and only reached
//! through it: request handling and phase stepping both take the round's
//! lock, so credential ledgers, the Alice registry and the transaction
//! template are never mutated concurrently.

use super::prison::Offense;
use crate::api::*;
use crate::core::*;
use crate::crypto::{CredentialIssuer, CredentialsResponse, RealCredentialsRequest, ZeroCredentialsRequest};
use crate::error::{ArenaError, Result};
use bitcoin::OutPoint;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use std::time::Instant;

pub struct Alice {
    pub id: AliceId,
    pub coin: Coin,
    pub ownership_proof: OwnershipProof,
    deadline: Instant,
    confirmed: bool,
}

impl Alice {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

/// What a step did that the arena has to act on.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Inputs no longer held by this round.
    pub released: Vec<OutPoint>,
    pub offenders: Vec<(OutPoint, Offense)>,
    pub entered: Option<Phase>,
}

pub struct Round {
    id: RoundId,
    phase: Phase,
    parameters: RoundParameters,
    amount_issuer: CredentialIssuer,
    weight_issuer: CredentialIssuer,
    alices: HashMap<AliceId, Alice>,
    coinjoin: CoinjoinTemplate,
    phase_deadline: Instant,
    ended_at: Option<Instant>,
    end_reason: Option<EndRoundReason>,
}

impl Round {
    pub fn new<R: RngCore + CryptoRng>(parameters: RoundParameters, now: Instant, rng: &mut R) -> Self {
        let amount_issuer =
            CredentialIssuer::random(parameters.max_amount_credential_value, CREDENTIAL_COUNT, rng);
        let weight_issuer =
            CredentialIssuer::random(parameters.max_weight_credential_value, CREDENTIAL_COUNT, rng);
        let phase_deadline = now + parameters.input_registration_timeout;
        Self {
            id: RoundId::random(),
            phase: Phase::InputRegistration,
            parameters,
            amount_issuer,
            weight_issuer,
            alices: HashMap::new(),
            coinjoin: CoinjoinTemplate::new(),
            phase_deadline,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn parameters(&self) -> &RoundParameters {
        &self.parameters
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    pub fn alice_count(&self) -> usize {
        self.alices.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.alices.values().filter(|a| a.confirmed).count()
    }

    pub fn coinjoin(&self) -> &CoinjoinTemplate {
        &self.coinjoin
    }

    pub fn inputs(&self) -> Vec<OutPoint> {
        self.alices.values().map(|a| a.coin.outpoint).collect()
    }

    pub fn state(&self) -> RoundState {
        RoundState {
            id: self.id,
            phase: self.phase,
            parameters: self.parameters.clone(),
            amount_credential_parameters: *self.amount_issuer.parameters(),
            weight_credential_parameters: *self.weight_issuer.parameters(),
            input_count: self.alices.len(),
            confirmed_count: self.confirmed_count(),
            coinjoin: self.coinjoin.clone(),
            end_reason: self.end_reason.clone(),
        }
    }

    pub fn check_phase(&self, expected: &[Phase]) -> Result<()> {
        if expected.contains(&self.phase) {
            Ok(())
        } else {
            Err(ArenaError::WrongPhase { round: self.id, actual: self.phase, expected: expected.to_vec() })
        }
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Add an Alice for a coin whose existence and ownership the caller has
    /// already verified.
    pub fn register_input<R: RngCore + CryptoRng>(
        &mut self,
        coin: Coin,
        ownership_proof: OwnershipProof,
        zero_amount: &ZeroCredentialsRequest,
        zero_weight: &ZeroCredentialsRequest,
        now: Instant,
        rng: &mut R,
    ) -> Result<InputRegistrationResponse> {
        self.check_phase(&[Phase::InputRegistration])?;
        if self.alices.len() >= self.parameters.max_input_count {
            return Err(ArenaError::TooManyInputs);
        }
        if self.alices.values().any(|a| a.coin.outpoint == coin.outpoint) {
            return Err(ArenaError::AliceAlreadyRegistered(coin.outpoint));
        }

        let amount_credentials = self.amount_issuer.handle_zero_request(zero_amount, rng)?;
        let weight_credentials = self.weight_issuer.handle_zero_request(zero_weight, rng)?;

        let alice = Alice {
            id: AliceId::random(),
            coin,
            ownership_proof,
            deadline: now + self.parameters.alice_keepalive_timeout,
            confirmed: false,
        };
        let alice_id = alice.id;
        tracing::debug!("Round {}: registered alice {} for {}", self.id, alice_id, alice.coin.outpoint);
        self.alices.insert(alice_id, alice);

        Ok(InputRegistrationResponse { alice_id, amount_credentials, weight_credentials })
    }

    pub fn confirm_connection<R: RngCore + CryptoRng>(
        &mut self,
        request: &ConnectionConfirmationRequest,
        now: Instant,
        rng: &mut R,
    ) -> Result<ConnectionConfirmationResponse> {
        self.check_phase(&[Phase::InputRegistration, Phase::ConnectionConfirmation])?;
        let keepalive = self.parameters.alice_keepalive_timeout;
        let max_weight_per_alice = self.parameters.max_weight_per_alice;
        let fee_rate = self.parameters.fee_rate;
        let phase = self.phase;

        let alice = self
            .alices
            .get_mut(&request.alice_id)
            .ok_or(ArenaError::AliceNotFound(request.alice_id))?;

        if phase == Phase::InputRegistration {
            alice.deadline = now + keepalive;
            return Ok(ConnectionConfirmationResponse { amount_credentials: None, weight_credentials: None });
        }
        if alice.confirmed {
            return Err(ArenaError::AliceAlreadyConfirmed(alice.id));
        }

        let amount_delta = alice.coin.effective_value(fee_rate);
        let weight_delta = max_weight_per_alice as i64 - input_weight() as i64;
        let (amount, weight) = Self::issue_pair(
            &mut self.amount_issuer,
            &mut self.weight_issuer,
            &request.amount_credential_requests,
            amount_delta,
            &request.weight_credential_requests,
            weight_delta,
            rng,
        )?;
        alice.confirmed = true;

        Ok(ConnectionConfirmationResponse { amount_credentials: Some(amount), weight_credentials: Some(weight) })
    }

    pub fn register_output<R: RngCore + CryptoRng>(
        &mut self,
        request: &OutputRegistrationRequest,
        rng: &mut R,
    ) -> Result<OutputRegistrationResponse> {
        self.check_phase(&[Phase::OutputRegistration])?;
        let script = request.script.as_script();
        if !script.is_p2wpkh() && !script.is_p2tr() {
            return Err(ArenaError::NonStandardOutput);
        }
        if request.value < self.parameters.min_output_amount {
            return Err(ArenaError::OutputBelowMinimum { value: request.value, min: self.parameters.min_output_amount });
        }
        let max = self.parameters.max_registrable_amount;
        if request.value > max {
            return Err(ArenaError::OutputAboveMaximum { value: request.value, max });
        }
        if self.coinjoin.has_output_script(script) {
            return Err(ArenaError::AlreadyRegisteredScript);
        }

        let fee = self.parameters.fee_rate.fee(output_vsize(script));
        let amount_delta = request
            .value
            .checked_add(fee)
            .and_then(|cost| i64::try_from(cost).ok())
            .map(|cost| -cost)
            .ok_or(ArenaError::OutputAboveMaximum { value: request.value, max })?;
        let weight_delta = -(output_weight(script) as i64);
        let (amount_credentials, weight_credentials) = Self::issue_pair(
            &mut self.amount_issuer,
            &mut self.weight_issuer,
            &request.amount_credential_requests,
            amount_delta,
            &request.weight_credential_requests,
            weight_delta,
            rng,
        )?;
        self.coinjoin.add_output(txout(request.value, request.script.clone()));

        Ok(OutputRegistrationResponse { amount_credentials, weight_credentials })
    }

    pub fn reissue_credentials<R: RngCore + CryptoRng>(
        &mut self,
        request: &ReissueCredentialRequest,
        rng: &mut R,
    ) -> Result<ReissueCredentialResponse> {
        self.check_phase(&[Phase::OutputRegistration])?;
        let (amount_credentials, weight_credentials) = Self::issue_pair(
            &mut self.amount_issuer,
            &mut self.weight_issuer,
            &request.amount_credential_requests,
            0,
            &request.weight_credential_requests,
            0,
            rng,
        )?;
        Ok(ReissueCredentialResponse { amount_credentials, weight_credentials })
    }

    /// Remove an Alice. Any Alice may leave during input registration, only
    /// unconfirmed ones during connection confirmation.
    pub fn remove_input(&mut self, alice_id: &AliceId) -> Result<OutPoint> {
        self.check_phase(&[Phase::InputRegistration, Phase::ConnectionConfirmation])?;
        let alice = self.alices.get(alice_id).ok_or(ArenaError::AliceNotFound(*alice_id))?;
        if self.phase == Phase::ConnectionConfirmation && alice.confirmed {
            return Err(ArenaError::AliceCannotBeRemoved(*alice_id));
        }
        let outpoint = alice.coin.outpoint;
        self.alices.remove(alice_id);
        tracing::debug!("Round {}: alice {} removed", self.id, alice_id);
        Ok(outpoint)
    }

    /// Verify every witness first, then apply them all.
    pub fn sign_transaction(&mut self, witnesses: &[InputWitness]) -> Result<()> {
        self.check_phase(&[Phase::TransactionSigning])?;
        let mut verified = Vec::with_capacity(witnesses.len());
        for item in witnesses {
            let index = self
                .coinjoin
                .input_index(&item.outpoint)
                .ok_or(ArenaError::InputNotInTransaction(item.outpoint))?;
            if self.coinjoin.is_signed(index) {
                return Err(ArenaError::WitnessAlreadyProvided(item.outpoint));
            }
            self.coinjoin
                .verify_witness(index, &item.witness)
                .map_err(|e| ArenaError::WrongSignature { outpoint: item.outpoint, reason: e.to_string() })?;
            verified.push((index, item.witness.clone()));
        }
        for (index, witness) in verified {
            self.coinjoin.set_witness(index, witness);
        }
        Ok(())
    }

    /// Both denominations succeed or neither ledger changes.
    fn issue_pair<R: RngCore + CryptoRng>(
        amount_issuer: &mut CredentialIssuer,
        weight_issuer: &mut CredentialIssuer,
        amount_request: &RealCredentialsRequest,
        amount_delta: i64,
        weight_request: &RealCredentialsRequest,
        weight_delta: i64,
        rng: &mut R,
    ) -> Result<(CredentialsResponse, CredentialsResponse)> {
        let amount = amount_issuer.prepare_request(amount_request, amount_delta)?;
        let weight = weight_issuer.prepare_request(weight_request, weight_delta)?;
        Ok((amount_issuer.commit(amount, rng), weight_issuer.commit(weight, rng)))
    }

    // ─── Phase stepping ─────────────────────────────────────────────────

    pub fn step(&mut self, now: Instant) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        let before = self.phase;
        match self.phase {
            Phase::InputRegistration => self.step_input_registration(now, &mut outcome),
            Phase::ConnectionConfirmation => self.step_connection_confirmation(now, &mut outcome),
            Phase::OutputRegistration => self.step_output_registration(now),
            Phase::TransactionSigning => self.step_transaction_signing(now, &mut outcome),
            Phase::Success | Phase::Aborted => {}
        }
        if self.phase != before {
            outcome.entered = Some(self.phase);
            if self.phase.is_ended() {
                outcome.released.extend(self.alices.values().map(|a| a.coin.outpoint));
            }
        }
        outcome
    }

    fn step_input_registration(&mut self, now: Instant, outcome: &mut StepOutcome) {
        let expired: Vec<AliceId> = self
            .alices
            .values()
            .filter(|a| a.deadline <= now)
            .map(|a| a.id)
            .collect();
        for id in expired {
            if let Some(alice) = self.alices.remove(&id) {
                tracing::info!("Round {}: alice {} stopped keeping alive", self.id, id);
                outcome.released.push(alice.coin.outpoint);
            }
        }

        if self.alices.len() >= self.parameters.max_input_count {
            self.set_phase(Phase::ConnectionConfirmation, now);
        } else if now >= self.phase_deadline {
            if self.alices.len() >= self.parameters.min_input_count {
                self.set_phase(Phase::ConnectionConfirmation, now);
            } else {
                self.end(EndRoundReason::NotEnoughInputs, now);
            }
        }
    }

    fn step_connection_confirmation(&mut self, now: Instant, outcome: &mut StepOutcome) {
        let all_confirmed = self.alices.values().all(|a| a.confirmed);
        if !all_confirmed && now < self.phase_deadline {
            return;
        }

        let unconfirmed: Vec<AliceId> = self.alices.values().filter(|a| !a.confirmed).map(|a| a.id).collect();
        for id in unconfirmed {
            if let Some(alice) = self.alices.remove(&id) {
                tracing::warn!("Round {}: alice {} failed to confirm", self.id, id);
                outcome.released.push(alice.coin.outpoint);
                outcome.offenders.push((alice.coin.outpoint, Offense::FailedToConfirm));
            }
        }

        if self.alices.len() < self.parameters.min_input_count {
            self.end(EndRoundReason::NotEnoughConfirmations, now);
            return;
        }
        let mut coins: Vec<Coin> = self.alices.values().map(|a| a.coin.clone()).collect();
        coins.sort_by(|a, b| a.outpoint.cmp(&b.outpoint));
        for coin in coins {
            self.coinjoin.add_input(coin);
        }
        self.set_phase(Phase::OutputRegistration, now);
    }

    fn step_output_registration(&mut self, now: Instant) {
        let all_claimed = self.amount_issuer.balance() == 0 && !self.coinjoin.outputs.is_empty();
        if !all_claimed && now < self.phase_deadline {
            return;
        }
        if self.coinjoin.outputs.is_empty() {
            self.end(EndRoundReason::NoOutputs, now);
            return;
        }
        if !self.is_balanced() {
            self.end(EndRoundReason::NotEnoughFunds, now);
            return;
        }
        self.coinjoin.sort();
        self.set_phase(Phase::TransactionSigning, now);
    }

    fn step_transaction_signing(&mut self, now: Instant, outcome: &mut StepOutcome) {
        if self.coinjoin.is_fully_signed() {
            tracing::info!(
                "Round {} signed: txid {} ({} inputs, {} outputs)",
                self.id,
                self.coinjoin.signed_transaction().compute_txid(),
                self.coinjoin.inputs.len(),
                self.coinjoin.outputs.len()
            );
            self.end(EndRoundReason::Success, now);
        } else if now >= self.phase_deadline {
            for coin in self.coinjoin.unsigned_inputs() {
                outcome.offenders.push((coin.outpoint, Offense::FailedToSign));
            }
            self.end(EndRoundReason::SigningTimeout, now);
        }
    }

    /// Inputs minus every input and output fee must cover the outputs.
    fn is_balanced(&self) -> bool {
        let fee_rate = self.parameters.fee_rate;
        let input_fees = self.coinjoin.inputs.len() as u64 * fee_rate.fee(P2WPKH_INPUT_VSIZE);
        let output_fees: u64 = self
            .coinjoin
            .outputs
            .iter()
            .map(|o| fee_rate.fee(output_vsize(&o.script_pubkey)))
            .sum();
        match (self.coinjoin.input_value(), self.coinjoin.output_value()) {
            (Some(inputs), Some(outputs)) => {
                let available = inputs.to_sat() as i128 - input_fees as i128 - output_fees as i128;
                available >= outputs.to_sat() as i128
            }
            _ => false,
        }
    }

    fn set_phase(&mut self, phase: Phase, now: Instant) {
        debug_assert!(phase > self.phase, "phases only move forward");
        let timeout = match phase {
            Phase::ConnectionConfirmation => self.parameters.connection_confirmation_timeout,
            Phase::OutputRegistration => self.parameters.output_registration_timeout,
            Phase::TransactionSigning => self.parameters.transaction_signing_timeout,
            _ => self.parameters.input_registration_timeout,
        };
        tracing::info!("Round {}: {} -> {} ({} inputs)", self.id, self.phase, phase, self.alices.len());
        self.phase = phase;
        self.phase_deadline = now + timeout;
    }

    fn end(&mut self, reason: EndRoundReason, now: Instant) {
        let phase = if reason == EndRoundReason::Success { Phase::Success } else { Phase::Aborted };
        tracing::info!("Round {} ended in {} ({:?})", self.id, self.phase, reason);
        self.phase = phase;
        self.end_reason = Some(reason);
        self.ended_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::crypto::CredentialClient;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use rand::rngs::OsRng;
    use std::time::Duration;

    fn parameters(min: usize, max: usize) -> RoundParameters {
        RoundParameters::from_config(&CoordinatorConfig {
            min_input_count_by_round: min,
            max_input_count_by_round: max,
            ..Default::default()
        })
    }

    fn coin(seed: u8) -> (Coin, SecretKey) {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let script = p2wpkh_script(&sk.public_key(&Secp256k1::new()));
        (Coin::new(outpoint_from_seed(&[seed], 0), txout(1_000_000, script)), sk)
    }

    fn register(round: &mut Round, seed: u8, now: Instant) -> Result<InputRegistrationResponse> {
        let state = round.state();
        let amount = CredentialClient::new(state.amount_credential_parameters, state.parameters.max_amount_credential_value, 2);
        let weight = CredentialClient::new(state.weight_credential_parameters, state.parameters.max_weight_credential_value, 2);
        let (coin, sk) = coin(seed);
        let proof = OwnershipProof::create(&round.id(), &coin.outpoint, &sk);
        let (za, _) = amount.create_zero_request(&mut OsRng);
        let (zw, _) = weight.create_zero_request(&mut OsRng);
        round.register_input(coin, proof, &za, &zw, now, &mut OsRng)
    }

    #[test]
    fn moves_on_when_full() {
        let now = Instant::now();
        let mut round = Round::new(parameters(1, 2), now, &mut OsRng);
        register(&mut round, 1, now).unwrap();
        assert_eq!(round.step(now).entered, None);
        register(&mut round, 2, now).unwrap();
        assert_eq!(round.step(now).entered, Some(Phase::ConnectionConfirmation));
        assert!(matches!(register(&mut round, 3, now), Err(ArenaError::WrongPhase { .. })));
    }

    #[test]
    fn aborts_without_quorum() {
        let now = Instant::now();
        let mut round = Round::new(parameters(2, 5), now, &mut OsRng);
        register(&mut round, 1, now).unwrap();
        let later = now + Duration::from_secs(3_601);
        let outcome = round.step(later);
        assert_eq!(outcome.entered, Some(Phase::Aborted));
        assert_eq!(round.state().end_reason, Some(EndRoundReason::NotEnoughInputs));
    }

    #[test]
    fn silent_alices_are_dropped_without_ban() {
        let now = Instant::now();
        let mut round = Round::new(parameters(1, 5), now, &mut OsRng);
        register(&mut round, 1, now).unwrap();
        let outcome = round.step(now + Duration::from_secs(61));
        assert_eq!(round.alice_count(), 0);
        assert_eq!(outcome.released.len(), 1);
        assert!(outcome.offenders.is_empty());
        assert_eq!(round.phase(), Phase::InputRegistration);
    }

    #[test]
    fn duplicate_input_rejected() {
        let now = Instant::now();
        let mut round = Round::new(parameters(1, 5), now, &mut OsRng);
        register(&mut round, 1, now).unwrap();
        assert!(matches!(register(&mut round, 1, now), Err(ArenaError::AliceAlreadyRegistered(_))));
    }

    #[test]
    fn unconfirmed_alices_are_reported_at_deadline() {
        let now = Instant::now();
        let mut round = Round::new(parameters(1, 1), now, &mut OsRng);
        let response = register(&mut round, 1, now).unwrap();
        round.step(now);
        assert_eq!(round.phase(), Phase::ConnectionConfirmation);

        let outcome = round.step(now + Duration::from_secs(61));
        assert_eq!(outcome.offenders.len(), 1);
        assert_eq!(outcome.offenders[0].1, Offense::FailedToConfirm);
        assert_eq!(round.phase(), Phase::Aborted);
        assert!(matches!(round.remove_input(&response.alice_id), Err(ArenaError::WrongPhase { .. })));
    }

    #[test]
    fn removal_rules() {
        let now = Instant::now();
        let mut round = Round::new(parameters(1, 5), now, &mut OsRng);
        let response = register(&mut round, 1, now).unwrap();
        let removed = round.remove_input(&response.alice_id).unwrap();
        assert_eq!(removed, outpoint_from_seed(&[1], 0));
        assert_eq!(
            round.remove_input(&response.alice_id),
            Err(ArenaError::AliceNotFound(response.alice_id))
        );
    }
}
