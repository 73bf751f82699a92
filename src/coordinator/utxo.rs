use async_trait::async_trait;
use anyhow::{anyhow, Result};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoInfo {
    pub txout: TxOut,
    pub confirmations: u32,
    pub is_coinbase: bool,
}

/// Source of truth for unspent outputs offered as round inputs.
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// `None` when the output does not exist or is already spent.
    async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoInfo>>;
}

/// In-memory UTXO set for regtest-style setups and tests.
#[derive(Default)]
pub struct MemoryUtxoSet {
    utxos: RwLock<HashMap<OutPoint, UtxoInfo>>,
}

impl MemoryUtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, outpoint: OutPoint, info: UtxoInfo) {
        if let Ok(mut utxos) = self.utxos.write() {
            utxos.insert(outpoint, info);
        }
    }

    /// Add a confirmed, non-coinbase output.
    pub fn add(&self, outpoint: OutPoint, txout: TxOut) {
        self.insert(outpoint, UtxoInfo { txout, confirmations: 6, is_coinbase: false });
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        if let Ok(mut utxos) = self.utxos.write() {
            utxos.remove(outpoint);
        }
    }
}

#[async_trait]
impl UtxoProvider for MemoryUtxoSet {
    async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoInfo>> {
        let utxos = self.utxos.read().map_err(|_| anyhow!("utxo set lock poisoned"))?;
        Ok(utxos.get(outpoint).cloned())
    }
}

/// Looks outputs up with bitcoind's `gettxout` over JSON-RPC.
pub struct BitcoindRpc {
    url: String,
    user: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GetTxOut {
    confirmations: u32,
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
    coinbase: bool,
}

#[derive(Deserialize)]
struct ScriptPubKey {
    hex: String,
}

impl BitcoindRpc {
    pub fn new(url: impl Into<String>, user: Option<String>, password: Option<String>) -> Self {
        Self { url: url.into(), user, password, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl UtxoProvider for BitcoindRpc {
    async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoInfo>> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "wabisabi",
            "method": "gettxout",
            "params": [outpoint.txid.to_string(), outpoint.vout, false],
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let response: RpcResponse<GetTxOut> = request.send().await?.json().await?;
        if let Some(error) = response.error.filter(|e| !e.is_null()) {
            return Err(anyhow!("bitcoind error: {}", error));
        }
        let Some(out) = response.result else {
            return Ok(None);
        };
        let value = Amount::from_btc(out.value)?;
        let script_pubkey = ScriptBuf::from_hex(&out.script_pub_key.hex)?;
        Ok(Some(UtxoInfo {
            txout: TxOut { value, script_pubkey },
            confirmations: out.confirmations,
            is_coinbase: out.coinbase,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{outpoint_from_seed, txout};

    #[tokio::test]
    async fn memory_set_tracks_spends() {
        let set = MemoryUtxoSet::new();
        let op = outpoint_from_seed(b"utxo", 1);
        set.add(op, txout(10_000, ScriptBuf::new()));
        assert_eq!(set.get_utxo(&op).await.unwrap().unwrap().txout.value.to_sat(), 10_000);
        set.spend(&op);
        assert!(set.get_utxo(&op).await.unwrap().is_none());
    }
}
