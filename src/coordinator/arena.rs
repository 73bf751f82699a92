use super::prison::{unix_now, Offense, Prison};
use super::round::Round;
use crate::api::{RoundParameters, RoundState};
use crate::config::CoordinatorConfig;
use crate::core::{Phase, RoundId};
use crate::error::{ArenaError, Result};
use crate::metrics::Metrics;
use bitcoin::OutPoint;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Hosts the live rounds and advances them on a timer.
///
/// Each round sits behind its own lock; request handling and phase steps
/// for one round are serialized on it while different rounds proceed
/// independently. A coin can be registered in at most one live round,
/// tracked by `registered_inputs`.
pub struct Arena {
    config: CoordinatorConfig,
    rounds: RwLock<HashMap<RoundId, Arc<Mutex<Round>>>>,
    registered_inputs: std::sync::Mutex<HashMap<OutPoint, RoundId>>,
    prison: Arc<Prison>,
    metrics: Metrics,
    states: watch::Sender<Vec<RoundState>>,
}

impl Arena {
    pub fn new(config: CoordinatorConfig, prison: Arc<Prison>) -> Self {
        let (states, _) = watch::channel(Vec::new());
        Self {
            config,
            rounds: RwLock::new(HashMap::new()),
            registered_inputs: std::sync::Mutex::new(HashMap::new()),
            prison,
            metrics: Metrics::new(),
            states,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn prison(&self) -> &Arc<Prison> {
        &self.prison
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Round snapshots, republished after every step.
    pub fn subscribe(&self) -> watch::Receiver<Vec<RoundState>> {
        self.states.subscribe()
    }

    pub async fn create_round(&self) -> RoundId {
        self.create_round_with(RoundParameters::from_config(&self.config)).await
    }

    pub async fn create_round_with(&self, parameters: RoundParameters) -> RoundId {
        let round = Round::new(parameters, Instant::now(), &mut OsRng);
        let id = round.id();
        tracing::info!(
            "Created round {} (fee rate {} sat/kvB, {}..{} inputs)",
            id,
            round.parameters().fee_rate.sat_per_kvb,
            round.parameters().min_input_count,
            round.parameters().max_input_count
        );
        self.rounds.write().await.insert(id, Arc::new(Mutex::new(round)));
        self.metrics.inc_rounds_created();
        self.publish().await;
        id
    }

    pub(crate) async fn round(&self, id: &RoundId) -> Result<Arc<Mutex<Round>>> {
        self.rounds
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(ArenaError::RoundNotFound(*id))
    }

    pub async fn round_state(&self, id: &RoundId) -> Option<RoundState> {
        let round = self.round(id).await.ok()?;
        let state = round.lock().await.state();
        Some(state)
    }

    pub async fn round_states(&self) -> Vec<RoundState> {
        let rounds: Vec<_> = self.rounds.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(rounds.len());
        for round in rounds {
            states.push(round.lock().await.state());
        }
        states.sort_by_key(|s| s.phase);
        states
    }

    pub(crate) fn claim_input(&self, outpoint: OutPoint, round_id: RoundId) -> Result<()> {
        let mut inputs = self
            .registered_inputs
            .lock()
            .map_err(|_| ArenaError::Internal("input registry poisoned".into()))?;
        if inputs.contains_key(&outpoint) {
            return Err(ArenaError::AliceAlreadyRegistered(outpoint));
        }
        inputs.insert(outpoint, round_id);
        Ok(())
    }

    pub(crate) fn release_input(&self, outpoint: &OutPoint) {
        if let Ok(mut inputs) = self.registered_inputs.lock() {
            inputs.remove(outpoint);
        }
    }

    /// Advance every round to `now`: apply deadlines, send offenders to
    /// prison, retire expired rounds and keep one round open for input
    /// registration.
    pub async fn step(&self, now: Instant) {
        let released = self.prison.release_expired(unix_now());
        if released > 0 {
            tracing::info!("Released {} coins from prison", released);
        }

        let rounds: Vec<(RoundId, Arc<Mutex<Round>>)> = self
            .rounds
            .read()
            .await
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect();

        let mut retired = Vec::new();
        let mut has_open_round = false;
        for (id, round) in rounds {
            let mut round = round.lock().await;
            let outcome = round.step(now);

            for (outpoint, offense) in outcome.offenders {
                if offense == Offense::FailedToConfirm && !self.config.ban_unconfirmed_inputs {
                    continue;
                }
                self.prison.punish(outpoint, offense, id, self.config.ban_duration(), unix_now());
                self.metrics.inc_inputs_banned();
            }
            for outpoint in &outcome.released {
                self.release_input(outpoint);
            }
            match outcome.entered {
                Some(Phase::Success) => self.metrics.inc_rounds_succeeded(),
                Some(Phase::Aborted) => self.metrics.inc_rounds_aborted(),
                _ => {}
            }

            if round.phase() == Phase::InputRegistration {
                has_open_round = true;
            }
            if let Some(ended) = round.ended_at() {
                if now.saturating_duration_since(ended) >= self.config.round_expiry() {
                    retired.push(id);
                }
            }
        }

        if !retired.is_empty() {
            let mut rounds = self.rounds.write().await;
            for id in &retired {
                rounds.remove(id);
                tracing::debug!("Retired round {}", id);
            }
        }

        if has_open_round {
            self.publish().await;
        } else {
            // create_round publishes.
            self.create_round().await;
        }
    }

    pub async fn trigger_round_step(&self) {
        self.step(Instant::now()).await;
    }

    pub async fn publish(&self) {
        let states = self.round_states().await;
        self.states.send_replace(states);
    }

    /// Timer loop; runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = time::interval(self.config.tick_interval());
        let mut metrics_interval = time::interval(Duration::from_secs(30));
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Arena stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.step(Instant::now()).await;
                }
                _ = metrics_interval.tick() => {
                    self.metrics.report();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outpoint_from_seed;

    fn arena() -> Arena {
        Arena::new(CoordinatorConfig::default(), Arc::new(Prison::in_memory()))
    }

    #[tokio::test]
    async fn step_opens_a_round() {
        let arena = arena();
        let mut rx = arena.subscribe();
        arena.trigger_round_step().await;
        let states = rx.borrow_and_update().clone();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].phase, Phase::InputRegistration);

        arena.trigger_round_step().await;
        assert_eq!(arena.round_states().await.len(), 1);
    }

    #[tokio::test]
    async fn aborted_rounds_are_retired_and_replaced() {
        let arena = arena();
        let first = arena.create_round().await;
        let now = Instant::now();
        arena.step(now + Duration::from_secs(3_601)).await;
        assert_eq!(arena.round_state(&first).await.unwrap().phase, Phase::Aborted);
        assert_eq!(arena.round_states().await.len(), 2);

        arena.step(now + Duration::from_secs(3_601 + 121)).await;
        assert!(arena.round_state(&first).await.is_none());
    }

    #[tokio::test]
    async fn inputs_are_claimed_once() {
        let arena = arena();
        let round = arena.create_round().await;
        let coin = outpoint_from_seed(b"claimed", 0);
        arena.claim_input(coin, round).unwrap();
        assert_eq!(arena.claim_input(coin, round), Err(ArenaError::AliceAlreadyRegistered(coin)));
        arena.release_input(&coin);
        arena.claim_input(coin, round).unwrap();
    }

    #[tokio::test]
    async fn unknown_round() {
        let arena = arena();
        let id = RoundId::random();
        assert_eq!(arena.round(&id).await.err(), Some(ArenaError::RoundNotFound(id)));
    }
}
