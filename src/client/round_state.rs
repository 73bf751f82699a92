use super::ClientError;
use crate::api::{ArenaApi, RoundState};
use crate::core::{Phase, RoundId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Shared view of the coordinator's rounds.
///
/// Fed either directly from [`Arena::subscribe`](crate::coordinator::Arena::subscribe)
/// or by polling `get_status` over the API.
#[derive(Clone)]
pub struct RoundStateUpdater {
    rx: watch::Receiver<Vec<RoundState>>,
}

impl RoundStateUpdater {
    pub fn new(rx: watch::Receiver<Vec<RoundState>>) -> Self {
        Self { rx }
    }

    /// Poll `api` every `interval` until `cancel` fires.
    pub fn spawn_polling(api: Arc<dyn ArenaApi>, interval: Duration, cancel: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        tokio::spawn(async move {
            let mut tick = time::interval(interval);
            tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {
                        match api.get_status().await {
                            Ok(states) => {
                                tx.send_replace(states);
                            }
                            Err(e) => tracing::warn!("Round status poll failed: {}", e),
                        }
                    }
                }
            }
        });
        Self { rx }
    }

    pub fn current(&self) -> Vec<RoundState> {
        self.rx.borrow().clone()
    }

    pub fn round(&self, id: &RoundId) -> Option<RoundState> {
        self.rx.borrow().iter().find(|r| r.id == *id).cloned()
    }

    /// First round matching `predicate`, waiting for updates as needed.
    pub async fn wait_for_round<F>(&self, predicate: F, cancel: &CancellationToken) -> Result<RoundState, ClientError>
    where
        F: Fn(&RoundState) -> bool,
    {
        let mut rx = self.rx.clone();
        loop {
            let found = rx.borrow_and_update().iter().find(|r| predicate(*r)).cloned();
            if let Some(state) = found {
                return Ok(state);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Transport("round state feed closed".into()));
                    }
                }
            }
        }
    }

    /// Round `id` once it matches `predicate`. A round that drops out of
    /// the feed after being seen was retired by the coordinator and is
    /// reported as ended.
    async fn wait_for_id<F>(&self, id: RoundId, predicate: F, cancel: &CancellationToken) -> Result<RoundState, ClientError>
    where
        F: Fn(&RoundState) -> bool,
    {
        let mut rx = self.rx.clone();
        let mut last_seen: Option<Phase> = None;
        loop {
            let found = rx.borrow_and_update().iter().find(|r| r.id == id).cloned();
            match found {
                Some(state) if predicate(&state) => return Ok(state),
                Some(state) => last_seen = Some(state.phase),
                None => {
                    if let Some(phase) = last_seen {
                        let phase = if phase.is_ended() { phase } else { Phase::Aborted };
                        return Err(ClientError::RoundEnded { round: id, phase });
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Transport("round state feed closed".into()));
                    }
                }
            }
        }
    }

    /// Wait until round `id` is in `phase`. Fails if the round skips past
    /// it or ends first.
    pub async fn await_phase(
        &self,
        id: RoundId,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<RoundState, ClientError> {
        let state = self
            .wait_for_id(id, |r| r.phase >= phase || r.phase.is_ended(), cancel)
            .await?;
        if state.phase == phase {
            Ok(state)
        } else if state.phase.is_ended() {
            Err(ClientError::RoundEnded { round: id, phase: state.phase })
        } else {
            Err(ClientError::PhaseMissed { round: id, expected: phase, actual: state.phase })
        }
    }

    pub async fn await_end(&self, id: RoundId, cancel: &CancellationToken) -> Result<RoundState, ClientError> {
        self.wait_for_id(id, |r| r.phase.is_ended(), cancel).await
    }
}
