use super::generators::{mac_u, Generators};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// The issuer's secret MAC key `(w, w', x0, x1, ya)`.
#[derive(Clone)]
pub struct CredentialIssuerSecretKey {
    pub(crate) w: Scalar,
    pub(crate) wp: Scalar,
    pub(crate) x0: Scalar,
    pub(crate) x1: Scalar,
    pub(crate) ya: Scalar,
}

/// Public commitment to the issuer key. Clients verify issuance proofs
/// against it, which pins every credential of a round to the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialIssuerParameters {
    pub cw: RistrettoPoint,
    pub i: RistrettoPoint,
}

/// Algebraic MAC over an attribute commitment `Ma`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mac {
    pub t: Scalar,
    pub v: RistrettoPoint,
}

impl CredentialIssuerSecretKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            w: Scalar::random(rng),
            wp: Scalar::random(rng),
            x0: Scalar::random(rng),
            x1: Scalar::random(rng),
            ya: Scalar::random(rng),
        }
    }

    pub fn compute_parameters(&self) -> CredentialIssuerParameters {
        let g = Generators::get();
        CredentialIssuerParameters {
            cw: self.w * g.gw + self.wp * g.gwp,
            i: g.gv - (self.x0 * g.gx0 + self.x1 * g.gx1 + self.ya * g.ga),
        }
    }

    pub fn compute_mac(&self, ma: &RistrettoPoint, t: Scalar) -> Mac {
        let g = Generators::get();
        let u = mac_u(&t);
        let v = self.w * g.gw + (self.x0 + self.x1 * t) * u + self.ya * ma;
        Mac { t, v }
    }
}

impl std::fmt::Debug for CredentialIssuerSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialIssuerSecretKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn mac_depends_on_commitment() {
        let sk = CredentialIssuerSecretKey::random(&mut OsRng);
        let g = Generators::get();
        let t = Scalar::random(&mut OsRng);
        let a = sk.compute_mac(&(Scalar::from(5u64) * g.gg), t);
        let b = sk.compute_mac(&(Scalar::from(6u64) * g.gg), t);
        assert_ne!(a.v, b.v);
        assert_eq!(a, sk.compute_mac(&(Scalar::from(5u64) * g.gg), t));
    }

    #[test]
    fn parameters_are_deterministic() {
        let sk = CredentialIssuerSecretKey::random(&mut OsRng);
        assert_eq!(sk.compute_parameters(), sk.compute_parameters());
        let other = CredentialIssuerSecretKey::random(&mut OsRng);
        assert_ne!(sk.compute_parameters(), other.compute_parameters());
    }
}
