//! Time-boxed bans for coins whose owners abandoned a round.
//!
//! Only the arena's timeout sweep puts coins in prison; input registration
//! reads it. With a data directory the inmates live in a sled tree so bans
//! survive a coordinator restart.

use crate::core::RoundId;
use anyhow::Result;
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offense {
    FailedToConfirm,
    FailedToSign,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inmate {
    pub outpoint: OutPoint,
    pub offense: Offense,
    pub round_id: RoundId,
    /// Unix seconds.
    pub banned_until: u64,
}

pub struct Prison {
    inmates: RwLock<HashMap<OutPoint, Inmate>>,
    db: Option<sled::Db>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn key(outpoint: &OutPoint) -> Vec<u8> {
    bitcoin::consensus::encode::serialize(outpoint)
}

impl Prison {
    pub fn in_memory() -> Self {
        Self { inmates: RwLock::new(HashMap::new()), db: None }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let mut inmates = HashMap::new();
        for entry in db.iter() {
            let (_, value) = entry?;
            let inmate: Inmate = bincode::deserialize(&value)?;
            inmates.insert(inmate.outpoint, inmate);
        }
        tracing::info!("Loaded {} prison records", inmates.len());
        Ok(Self { inmates: RwLock::new(inmates), db: Some(db) })
    }

    pub fn punish(&self, outpoint: OutPoint, offense: Offense, round_id: RoundId, duration: Duration, now: u64) {
        let inmate = Inmate { outpoint, offense, round_id, banned_until: now + duration.as_secs() };
        tracing::warn!(
            "Banning {} until {} ({:?} in round {})",
            outpoint, inmate.banned_until, offense, round_id
        );
        if let Some(db) = &self.db {
            let stored = bincode::serialize(&inmate)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| db.insert(key(&outpoint), bytes).map_err(anyhow::Error::from));
            if let Err(e) = stored {
                tracing::error!("Failed to persist ban for {}: {}", outpoint, e);
            }
        }
        self.write().insert(outpoint, inmate);
    }

    /// `Some(banned_until)` while the coin is still serving its ban.
    pub fn banned_until(&self, outpoint: &OutPoint, now: u64) -> Option<u64> {
        self.read()
            .get(outpoint)
            .map(|i| i.banned_until)
            .filter(|&until| until > now)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<Inmate> {
        self.read().get(outpoint).cloned()
    }

    /// Drop expired bans. Returns how many were released.
    pub fn release_expired(&self, now: u64) -> usize {
        let mut inmates = self.write();
        let expired: Vec<OutPoint> = inmates
            .values()
            .filter(|i| i.banned_until <= now)
            .map(|i| i.outpoint)
            .collect();
        for outpoint in &expired {
            inmates.remove(outpoint);
            if let Some(db) = &self.db {
                if let Err(e) = db.remove(key(outpoint)) {
                    tracing::error!("Failed to release {} from storage: {}", outpoint, e);
                }
            }
        }
        expired.len()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    // Every write leaves the map consistent, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<OutPoint, Inmate>> {
        self.inmates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<OutPoint, Inmate>> {
        self.inmates.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.flush()?;
        }
        Ok(())
    }
}
