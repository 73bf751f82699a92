//! Coordinator policy knobs, loaded from a JSON file.

use crate::core::FeeRate;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub fee_rate_sat_per_kvb: u64,
    pub min_input_count_by_round: usize,
    pub max_input_count_by_round: usize,
    pub min_registrable_amount: u64,
    pub max_registrable_amount: u64,
    pub min_output_amount: u64,
    /// Weight budget each confirmed input receives for its outputs,
    /// including the weight of the input itself.
    pub max_weight_per_alice: u64,
    pub max_amount_credential_value: u64,
    pub max_weight_credential_value: u64,
    pub input_registration_timeout_secs: u64,
    pub connection_confirmation_timeout_secs: u64,
    pub output_registration_timeout_secs: u64,
    pub transaction_signing_timeout_secs: u64,
    pub alice_keepalive_timeout_secs: u64,
    /// How long a coin stays in prison after failing to confirm or sign.
    pub ban_duration_secs: u64,
    pub ban_unconfirmed_inputs: bool,
    /// How long an ended round stays visible before it is dropped.
    pub round_expiry_secs: u64,
    pub idempotency_ttl_secs: u64,
    pub tick_interval_millis: u64,
    pub min_input_confirmations: u32,
    pub coinbase_maturity: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fee_rate_sat_per_kvb: 10_000,
            min_input_count_by_round: 5,
            max_input_count_by_round: 100,
            min_registrable_amount: 5_000,
            max_registrable_amount: 4_300_000_000_000,
            min_output_amount: 5_000,
            max_weight_per_alice: 1_000,
            max_amount_credential_value: 4_300_000_000_000,
            max_weight_credential_value: 2_000,
            input_registration_timeout_secs: 3_600,
            connection_confirmation_timeout_secs: 60,
            output_registration_timeout_secs: 60,
            transaction_signing_timeout_secs: 60,
            alice_keepalive_timeout_secs: 60,
            ban_duration_secs: 24 * 3_600,
            ban_unconfirmed_inputs: false,
            round_expiry_secs: 120,
            idempotency_ttl_secs: 300,
            tick_interval_millis: 1_000,
            min_input_confirmations: 1,
            coinbase_maturity: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Read the config at `path`, writing the defaults there first when the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Wrote default coordinator config to {}", path.display());
            return Ok(config);
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_input_count_by_round == 0 {
            bail!("min_input_count_by_round must be at least 1");
        }
        if self.min_input_count_by_round > self.max_input_count_by_round {
            bail!(
                "min_input_count_by_round ({}) exceeds max_input_count_by_round ({})",
                self.min_input_count_by_round,
                self.max_input_count_by_round
            );
        }
        if self.min_registrable_amount > self.max_registrable_amount {
            bail!("min_registrable_amount exceeds max_registrable_amount");
        }
        if self.max_registrable_amount > self.max_amount_credential_value {
            bail!("max_registrable_amount exceeds max_amount_credential_value");
        }
        if self.max_weight_per_alice <= crate::core::input_weight() {
            bail!("max_weight_per_alice must leave room for outputs");
        }
        if self.max_weight_per_alice > self.max_weight_credential_value {
            bail!("max_weight_per_alice exceeds max_weight_credential_value");
        }
        if self.tick_interval_millis == 0 {
            bail!("tick_interval_millis must be positive");
        }
        Ok(())
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_sat_per_kvb(self.fee_rate_sat_per_kvb)
    }

    pub fn input_registration_timeout(&self) -> Duration {
        Duration::from_secs(self.input_registration_timeout_secs)
    }

    pub fn connection_confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_confirmation_timeout_secs)
    }

    pub fn output_registration_timeout(&self) -> Duration {
        Duration::from_secs(self.output_registration_timeout_secs)
    }

    pub fn transaction_signing_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_signing_timeout_secs)
    }

    pub fn alice_keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.alice_keepalive_timeout_secs)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_secs)
    }

    pub fn round_expiry(&self) -> Duration {
        Duration::from_secs(self.round_expiry_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }
}

/// Default data directory (`~/.wabisabi`), falling back to `./data`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".wabisabi"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}
