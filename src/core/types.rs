use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, CompressedPublicKey, OutPoint, Script, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Segwit weight units per virtual byte.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Virtual size of a P2WPKH input (outpoint, empty script_sig, sequence,
/// discounted witness with a 72-byte signature and 33-byte key).
pub const P2WPKH_INPUT_VSIZE: u64 = 68;

/// Virtual size of a P2WPKH output.
pub const P2WPKH_OUTPUT_VSIZE: u64 = 31;

/// Number of credentials exchanged per request and per denomination.
pub const CREDENTIAL_COUNT: usize = 2;

/// Domain tag for coin ownership proofs.
const OWNERSHIP_DOMAIN: &[u8] = b"wabisabi/ownership/v1";

/// Hash a byte slice with BLAKE3.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Concatenate two byte slices and hash them with BLAKE3.
pub fn hash_concat(a: &[u8], b: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(a);
    hasher.update(b);
    *hasher.finalize().as_bytes()
}

/// Short hex prefix used in log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    let full = hex::encode(bytes);
    full[..full.len().min(16)].to_string()
}

macro_rules! hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn random() -> Self {
                Self(rand::random())
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&short_hex(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; 32];
                hex::decode_to_slice(s, &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(RoundId, "Opaque identifier of one round instance.");
hex_id!(AliceId, "Opaque identifier handed to a registered input.");

/// Round phases. Ordering follows the protocol: a round only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    InputRegistration,
    ConnectionConfirmation,
    OutputRegistration,
    TransactionSigning,
    Success,
    Aborted,
}

impl Phase {
    pub fn is_ended(&self) -> bool {
        matches!(self, Phase::Success | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::InputRegistration => "InputRegistration",
            Phase::ConnectionConfirmation => "ConnectionConfirmation",
            Phase::OutputRegistration => "OutputRegistration",
            Phase::TransactionSigning => "TransactionSigning",
            Phase::Success => "Success",
            Phase::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Fee rate in satoshis per 1000 virtual bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub sat_per_kvb: u64,
}

impl FeeRate {
    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        Self { sat_per_kvb }
    }

    /// Fee for `vsize` virtual bytes, rounded up.
    pub fn fee(&self, vsize: u64) -> u64 {
        (self.sat_per_kvb * vsize).div_ceil(1000)
    }
}

/// A spendable coin: its funding outpoint and the output it refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

impl Coin {
    pub fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        Self { outpoint, txout }
    }

    pub fn value(&self) -> u64 {
        self.txout.value.to_sat()
    }

    /// Value left after paying for this coin's own input.
    pub fn effective_value(&self, fee_rate: FeeRate) -> i64 {
        self.value() as i64 - fee_rate.fee(P2WPKH_INPUT_VSIZE) as i64
    }
}

/// Weight of a P2WPKH input.
pub fn input_weight() -> u64 {
    P2WPKH_INPUT_VSIZE * WITNESS_SCALE_FACTOR
}

/// Virtual size of an output paying to `script`.
pub fn output_vsize(script: &Script) -> u64 {
    let len = script.len() as u64;
    8 + compact_size_len(len) + len
}

/// Weight of an output paying to `script`.
pub fn output_weight(script: &Script) -> u64 {
    output_vsize(script) * WITNESS_SCALE_FACTOR
}

fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// P2WPKH script for a secp256k1 public key.
pub fn p2wpkh_script(public_key: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(*public_key).wpubkey_hash())
}

/// Convenience constructor for an output.
pub fn txout(value: u64, script_pubkey: ScriptBuf) -> TxOut {
    TxOut { value: Amount::from_sat(value), script_pubkey }
}

/// Proof that the registrant controls the key locking a coin, bound to one
/// round so it cannot be replayed elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof {
    pub public_key: bitcoin::PublicKey,
    /// Compact 64-byte ECDSA signature.
    pub signature: Vec<u8>,
}

impl OwnershipProof {
    pub fn create(round_id: &RoundId, outpoint: &OutPoint, secret_key: &SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let message = ownership_message(round_id, outpoint);
        let signature = secp.sign_ecdsa(&message, secret_key);
        Self {
            public_key: bitcoin::PublicKey::new(secret_key.public_key(&secp)),
            signature: signature.serialize_compact().to_vec(),
        }
    }

    /// Checks the signature and that the key is the one `script_pubkey` pays to.
    pub fn verify(&self, round_id: &RoundId, outpoint: &OutPoint, script_pubkey: &Script) -> bool {
        if !self.public_key.compressed || p2wpkh_script(&self.public_key.inner).as_script() != script_pubkey {
            return false;
        }
        let Ok(signature) = ecdsa::Signature::from_compact(&self.signature) else {
            return false;
        };
        let secp = Secp256k1::verification_only();
        let message = ownership_message(round_id, outpoint);
        secp.verify_ecdsa(&message, &signature, &self.public_key.inner).is_ok()
    }
}

fn ownership_message(round_id: &RoundId, outpoint: &OutPoint) -> Message {
    let mut hasher = blake3::Hasher::new();
    hasher.update(OWNERSHIP_DOMAIN);
    hasher.update(round_id.as_bytes());
    hasher.update(&bitcoin::consensus::encode::serialize(outpoint));
    Message::from_digest(*hasher.finalize().as_bytes())
}

/// Outpoint with a synthetic txid, handy for tests and simulations.
pub fn outpoint_from_seed(seed: &[u8], vout: u32) -> OutPoint {
    OutPoint {
        txid: bitcoin::Txid::from_byte_array(hash(seed)),
        vout,
    }
}
