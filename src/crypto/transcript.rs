use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;

/// Merlin transcript helpers for the credential proofs.
pub trait TranscriptProtocol {
    fn domain_sep(&mut self, label: &'static [u8]);
    fn append_point(&mut self, label: &'static [u8], point: &CompressedRistretto);
    fn append_points<'a, I>(&mut self, label: &'static [u8], points: I)
    where
        I: IntoIterator<Item = &'a RistrettoPoint>;
    fn append_scalar(&mut self, label: &'static [u8], scalar: &Scalar);
    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar;
}

impl TranscriptProtocol for Transcript {
    fn domain_sep(&mut self, label: &'static [u8]) {
        self.append_message(b"dom-sep", label);
    }

    fn append_point(&mut self, label: &'static [u8], point: &CompressedRistretto) {
        self.append_message(label, point.as_bytes());
    }

    fn append_points<'a, I>(&mut self, label: &'static [u8], points: I)
    where
        I: IntoIterator<Item = &'a RistrettoPoint>,
    {
        for p in points {
            self.append_message(label, p.compress().as_bytes());
        }
    }

    fn append_scalar(&mut self, label: &'static [u8], scalar: &Scalar) {
        self.append_message(label, scalar.as_bytes());
    }

    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar {
        let mut buf = [0u8; 64];
        self.challenge_bytes(label, &mut buf);
        Scalar::from_bytes_mod_order_wide(&buf)
    }
}
