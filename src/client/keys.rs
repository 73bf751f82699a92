//! Receive keys for coinjoin outputs.
//!
//! Keys are derived from a 32-byte master seed with BLAKE3 under a fixed
//! domain tag, one per index, so every output pays to a fresh P2WPKH script:
//!
//! ```text
//! sk_i = BLAKE3("wabisabi/output-key/v1" || master_seed || i)
//! ```
//!
//! The odd index whose hash is not a valid secp256k1 scalar is skipped.

use crate::core::p2wpkh_script;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::ScriptBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Must never change: old outputs would become unspendable.
const OUTPUT_KEY_DOMAIN: &[u8] = b"wabisabi/output-key/v1";

pub fn derive_output_key(master_seed: &[u8; 32], index: u64) -> Option<SecretKey> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(OUTPUT_KEY_DOMAIN);
    hasher.update(master_seed);
    hasher.update(&index.to_le_bytes());
    SecretKey::from_slice(hasher.finalize().as_bytes()).ok()
}

pub struct KeyChain {
    master_seed: [u8; 32],
    next_index: AtomicU64,
}

impl KeyChain {
    pub fn new(master_seed: [u8; 32], next_index: u64) -> Self {
        Self { master_seed, next_index: AtomicU64::new(next_index) }
    }

    pub fn random() -> Self {
        Self::new(rand::random(), 0)
    }

    pub fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::SeqCst)
    }

    /// Fresh, never-used key and its script.
    pub fn next_output(&self) -> (SecretKey, ScriptBuf) {
        loop {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            if let Some(sk) = derive_output_key(&self.master_seed, index) {
                let script = p2wpkh_script(&sk.public_key(&Secp256k1::signing_only()));
                return (sk, script);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let master = [0xAA; 32];
        assert_eq!(derive_output_key(&master, 0), derive_output_key(&master, 0));
        assert_ne!(derive_output_key(&master, 0), derive_output_key(&master, 1));
        assert_ne!(derive_output_key(&master, 0), derive_output_key(&[0xBB; 32], 0));
    }

    #[test]
    fn scripts_are_never_reused() {
        let keys = KeyChain::new([1; 32], 0);
        let (_, a) = keys.next_output();
        let (_, b) = keys.next_output();
        assert_ne!(a, b);
        assert!(a.is_p2wpkh());
        assert_eq!(keys.next_index(), 2);

        let restored = KeyChain::new([1; 32], 0);
        assert_eq!(restored.next_output().1, a);
    }
}
