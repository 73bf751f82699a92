//! The coinjoin transaction template and P2WPKH signing helpers.
//!
//! The coordinator grows a [`CoinjoinTemplate`] as the round advances:
//! confirmed inputs are added when output registration opens, outputs as
//! they are registered, and witnesses during signing. Participants read the
//! template from round-state snapshots, verify their outputs are present,
//! and sign the unsigned transaction it describes.

use super::types::{p2wpkh_script, Coin};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WitnessError {
    #[error("witness is malformed: {0}")]
    Malformed(String),
    #[error("witness key does not own the spent output")]
    WrongKey,
    #[error("signature does not verify")]
    BadSignature,
    #[error("input index {0} out of range")]
    IndexOutOfRange(usize),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinjoinTemplate {
    pub inputs: Vec<Coin>,
    pub outputs: Vec<TxOut>,
    /// One slot per input, filled during signing.
    pub witnesses: Vec<Option<Witness>>,
}

impl CoinjoinTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, coin: Coin) {
        self.inputs.push(coin);
        self.witnesses.push(None);
    }

    pub fn add_output(&mut self, output: TxOut) {
        self.outputs.push(output);
    }

    pub fn has_output_script(&self, script: &bitcoin::Script) -> bool {
        self.outputs.iter().any(|o| o.script_pubkey.as_script() == script)
    }

    pub fn input_index(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|c| c.outpoint == *outpoint)
    }

    /// Total input value, `None` on overflow.
    pub fn input_value(&self) -> Option<Amount> {
        self.inputs.iter().try_fold(Amount::ZERO, |sum, c| sum.checked_add(c.txout.value))
    }

    /// Total output value, `None` on overflow.
    pub fn output_value(&self) -> Option<Amount> {
        self.outputs.iter().try_fold(Amount::ZERO, |sum, o| sum.checked_add(o.value))
    }

    /// Canonical ordering: inputs by outpoint, outputs by value descending
    /// then script. Must be applied before anybody signs.
    pub fn sort(&mut self) {
        let mut paired: Vec<(Coin, Option<Witness>)> = self
            .inputs
            .drain(..)
            .zip(self.witnesses.drain(..))
            .collect();
        paired.sort_by(|a, b| a.0.outpoint.cmp(&b.0.outpoint));
        for (coin, witness) in paired {
            self.inputs.push(coin);
            self.witnesses.push(witness);
        }
        self.outputs.sort_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
        });
    }

    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: self
                .inputs
                .iter()
                .map(|c| TxIn {
                    previous_output: c.outpoint,
                    sequence: Sequence::MAX,
                    ..Default::default()
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }

    /// The transaction with every witness collected so far.
    pub fn signed_transaction(&self) -> Transaction {
        let mut tx = self.unsigned_transaction();
        for (txin, witness) in tx.input.iter_mut().zip(&self.witnesses) {
            if let Some(w) = witness {
                txin.witness = w.clone();
            }
        }
        tx
    }

    pub fn is_signed(&self, index: usize) -> bool {
        self.witnesses.get(index).map_or(false, Option::is_some)
    }

    pub fn is_fully_signed(&self) -> bool {
        !self.inputs.is_empty() && self.witnesses.iter().all(Option::is_some)
    }

    pub fn unsigned_inputs(&self) -> impl Iterator<Item = &Coin> {
        self.inputs
            .iter()
            .zip(&self.witnesses)
            .filter(|(_, w)| w.is_none())
            .map(|(c, _)| c)
    }

    pub fn verify_witness(&self, index: usize, witness: &Witness) -> Result<(), WitnessError> {
        let coin = self.inputs.get(index).ok_or(WitnessError::IndexOutOfRange(index))?;
        verify_p2wpkh_witness(&self.unsigned_transaction(), index, coin, witness)
    }

    pub fn set_witness(&mut self, index: usize, witness: Witness) {
        if let Some(slot) = self.witnesses.get_mut(index) {
            *slot = Some(witness);
        }
    }

    /// True when every `expected` output appears in the template, counting
    /// duplicates.
    pub fn contains_outputs(&self, expected: &[TxOut]) -> bool {
        self.missing_outputs(expected) == 0
    }

    /// How many of `expected` have no matching output left in the template.
    pub fn missing_outputs(&self, expected: &[TxOut]) -> usize {
        let mut remaining: Vec<&TxOut> = self.outputs.iter().collect();
        let mut missing = 0;
        for want in expected {
            match remaining.iter().position(|o| *o == want) {
                Some(i) => {
                    remaining.swap_remove(i);
                }
                None => missing += 1,
            }
        }
        missing
    }
}

fn sighash_message(tx: &Transaction, index: usize, coin: &Coin) -> Result<Message, WitnessError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wpkh_signature_hash(index, &coin.txout.script_pubkey, coin.txout.value, EcdsaSighashType::All)
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Produce a P2WPKH witness for input `index` of `tx`.
pub fn sign_p2wpkh_input(
    tx: &Transaction,
    index: usize,
    coin: &Coin,
    secret_key: &SecretKey,
) -> Result<Witness, WitnessError> {
    let secp = Secp256k1::new();
    let message = sighash_message(tx, index, coin)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    let public_key = secret_key.public_key(&secp);
    Ok(Witness::p2wpkh(&bitcoin::ecdsa::Signature::sighash_all(signature), &public_key))
}

pub fn verify_p2wpkh_witness(
    tx: &Transaction,
    index: usize,
    coin: &Coin,
    witness: &Witness,
) -> Result<(), WitnessError> {
    if witness.len() != 2 {
        return Err(WitnessError::Malformed(format!("expected 2 witness items, got {}", witness.len())));
    }
    let sig_bytes = witness.nth(0).ok_or_else(|| WitnessError::Malformed("missing signature".into()))?;
    let key_bytes = witness.nth(1).ok_or_else(|| WitnessError::Malformed("missing public key".into()))?;

    let signature = bitcoin::ecdsa::Signature::from_slice(sig_bytes)
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;
    if signature.sighash_type != EcdsaSighashType::All {
        return Err(WitnessError::Malformed("sighash type must be ALL".into()));
    }
    let public_key = PublicKey::from_slice(key_bytes)
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;
    if p2wpkh_script(&public_key) != coin.txout.script_pubkey {
        return Err(WitnessError::WrongKey);
    }

    let message = sighash_message(tx, index, coin)?;
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature.signature, &public_key)
        .map_err(|_| WitnessError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{outpoint_from_seed, txout};

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn coin_for(sk: &SecretKey, seed: &[u8], value: u64) -> Coin {
        let pk = sk.public_key(&Secp256k1::new());
        Coin::new(outpoint_from_seed(seed, 0), txout(value, p2wpkh_script(&pk)))
    }

    fn template() -> (CoinjoinTemplate, SecretKey, SecretKey) {
        let (a, b) = (key(1), key(2));
        let mut t = CoinjoinTemplate::new();
        t.add_input(coin_for(&a, b"a", 50_000));
        t.add_input(coin_for(&b, b"b", 70_000));
        t.add_output(txout(60_000, p2wpkh_script(&key(9).public_key(&Secp256k1::new()))));
        t.add_output(txout(59_000, p2wpkh_script(&key(8).public_key(&Secp256k1::new()))));
        t.sort();
        (t, a, b)
    }

    #[test]
    fn sign_and_verify_each_input() {
        let (mut t, a, b) = template();
        let tx = t.unsigned_transaction();
        for i in 0..t.inputs.len() {
            let coin = t.inputs[i].clone();
            let sk = if coin == coin_for(&a, b"a", 50_000) { a } else { b };
            let w = sign_p2wpkh_input(&tx, i, &coin, &sk).unwrap();
            t.verify_witness(i, &w).unwrap();
            t.set_witness(i, w);
        }
        assert!(t.is_fully_signed());
        let signed = t.signed_transaction();
        assert!(signed.input.iter().all(|i| i.witness.len() == 2));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let (t, a, _) = template();
        let tx = t.unsigned_transaction();
        let idx = t.input_index(&outpoint_from_seed(b"b", 0)).unwrap();
        let w = sign_p2wpkh_input(&tx, idx, &t.inputs[idx], &a).unwrap();
        assert_eq!(t.verify_witness(idx, &w), Err(WitnessError::WrongKey));
    }

    #[test]
    fn signature_over_other_input_is_rejected() {
        let (t, a, _) = template();
        let tx = t.unsigned_transaction();
        let ia = t.input_index(&outpoint_from_seed(b"a", 0)).unwrap();
        let w = sign_p2wpkh_input(&tx, ia, &t.inputs[ia], &a).unwrap();
        // Same key, but the sighash commits to the input index.
        let other = 1 - ia;
        let mut forged = t.clone();
        forged.inputs[other].txout.script_pubkey = t.inputs[ia].txout.script_pubkey.clone();
        assert_eq!(forged.verify_witness(other, &w), Err(WitnessError::BadSignature));
    }

    #[test]
    fn output_presence_counts_duplicates() {
        let (t, _, _) = template();
        assert!(t.contains_outputs(&[t.outputs[0].clone()]));
        assert!(t.contains_outputs(&t.outputs.clone()));
        assert!(!t.contains_outputs(&[t.outputs[0].clone(), t.outputs[0].clone()]));
        assert!(!t.contains_outputs(&[txout(1, t.outputs[0].script_pubkey.clone())]));
    }

    #[test]
    fn outputs_sorted_by_value() {
        let (t, _, _) = template();
        assert!(t.outputs[0].value >= t.outputs[1].value);
        assert!(t.inputs[0].outpoint <= t.inputs[1].outpoint);
    }

    #[test]
    fn value_sums_detect_overflow() {
        let (mut t, _, _) = template();
        assert_eq!(t.input_value(), Some(Amount::from_sat(120_000)));
        assert_eq!(t.output_value(), Some(Amount::from_sat(119_000)));

        let script = t.outputs[0].script_pubkey.clone();
        t.add_output(txout(u64::MAX - 100_000, script));
        assert_eq!(t.output_value(), None);
    }
}
