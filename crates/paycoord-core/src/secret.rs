use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Opaque random bytes used for `offer_secret` and `proof_secret`.
///
/// Comparison against caller-supplied values must be constant-time — the
/// coordinator never lets a comparison here leak timing information about
/// how many leading bytes matched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret(Vec<u8>);

/// Minimum length the source requires for a freshly generated secret.
pub const MIN_SECRET_LEN: usize = 6;

impl Secret {
    /// Generate a fresh random secret of `len` bytes (`len >= MIN_SECRET_LEN`).
    pub fn generate(len: usize) -> Self {
        let len = len.max(MIN_SECRET_LEN);
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64url (no padding) encoding, used at every external boundary
    /// where a secret crosses into a message payload.
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_base64url(s: &str) -> Result<Self, base64::DecodeError> {
        URL_SAFE_NO_PAD.decode(s).map(Self)
    }

    /// Constant-time equality check. A mismatch here must be
    /// indistinguishable, timing-wise, from the record not existing at all.
    pub fn ct_eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({}b)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_base64url() {
        let s = Secret::generate(16);
        let encoded = s.to_base64url();
        let decoded = Secret::from_base64url(&encoded).expect("decode");
        assert!(s.ct_eq(&decoded));
    }

    #[test]
    fn generate_enforces_minimum_length() {
        let s = Secret::generate(1);
        assert_eq!(s.as_bytes().len(), MIN_SECRET_LEN);
    }

    #[test]
    fn ct_eq_rejects_different_secrets() {
        let a = Secret::generate(12);
        let b = Secret::generate(12);
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn ct_eq_rejects_different_lengths() {
        let a = Secret::from_bytes(vec![1, 2, 3]);
        let b = Secret::from_bytes(vec![1, 2, 3, 4]);
        assert!(!a.ct_eq(&b));
    }
}
