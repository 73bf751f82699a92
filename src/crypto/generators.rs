use bulletproofs::PedersenGens;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use sha2::Sha512;
use std::sync::OnceLock;

/// Fixed group generators shared by issuers and clients.
///
/// `gg`/`gh` are the Pedersen base and blinding generators so that an
/// attribute commitment `a·Gg + r·Gh` is also a valid range-proof
/// commitment. The others are hashed to the group with nothing-up-my-sleeve
/// labels.
#[derive(Clone, Copy, Debug)]
pub struct Generators {
    pub gw: RistrettoPoint,
    pub gwp: RistrettoPoint,
    pub gx0: RistrettoPoint,
    pub gx1: RistrettoPoint,
    pub gv: RistrettoPoint,
    pub gg: RistrettoPoint,
    pub gh: RistrettoPoint,
    pub ga: RistrettoPoint,
    pub gs: RistrettoPoint,
}

static GENERATORS: OnceLock<Generators> = OnceLock::new();

impl Generators {
    pub fn get() -> &'static Generators {
        GENERATORS.get_or_init(|| {
            let pedersen = PedersenGens::default();
            Generators {
                gw: hash_to_point(b"wabisabi/generator/Gw"),
                gwp: hash_to_point(b"wabisabi/generator/Gwp"),
                gx0: hash_to_point(b"wabisabi/generator/Gx0"),
                gx1: hash_to_point(b"wabisabi/generator/Gx1"),
                gv: hash_to_point(b"wabisabi/generator/GV"),
                gg: pedersen.B,
                gh: pedersen.B_blinding,
                ga: hash_to_point(b"wabisabi/generator/Ga"),
                gs: hash_to_point(b"wabisabi/generator/Gs"),
            }
        })
    }
}

pub fn hash_to_point(label: &[u8]) -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(label)
}

/// The MAC's `U` point, derived from its tag `t`.
pub fn mac_u(t: &Scalar) -> RistrettoPoint {
    let mut input = b"wabisabi/mac/U".to_vec();
    input.extend_from_slice(t.as_bytes());
    hash_to_point(&input)
}

/// Signed integer as a scalar.
pub fn scalar_from_i64(value: i64) -> Scalar {
    if value >= 0 {
        Scalar::from(value as u64)
    } else {
        -Scalar::from(value.unsigned_abs())
    }
}
