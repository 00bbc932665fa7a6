//! HMAC-SHA256 payload signing.
//!
//! Signatures travel as lowercase hex in the `HashSHA256` header (HTTP) or
//! `hashsha256` metadata key (gRPC).

use crate::pool::Pool;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const POOL_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    Malformed(#[from] hex::FromHexError),
    #[error("signature mismatch")]
    Mismatch,
}

/// Signs and verifies payloads with a shared secret.
pub struct Signer {
    macs: Pool<HmacSha256>,
}

impl Signer {
    /// Returns `None` for an empty key, which disables signing.
    pub fn new(key: &[u8]) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        let key = key.to_vec();
        let factory = move || HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
        Some(Self {
            macs: Pool::new(POOL_CAPACITY, factory, |mac| mac.reset()),
        })
    }

    /// Hex-encoded HMAC-SHA256 of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.macs.acquire();
        mac.update(data);
        hex::encode(mac.finalize_reset().into_bytes())
    }

    /// Checks a hex signature in constant time.
    pub fn verify(&self, data: &[u8], signature: &str) -> Result<(), SignatureError> {
        let expected = hex::decode(signature.trim())?;
        let mut mac = self.macs.acquire();
        mac.update(data);
        let actual = mac.finalize_reset().into_bytes();
        if bool::from(actual.as_slice().ct_eq(&expected)) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_disables_signing() {
        assert!(Signer::new(b"").is_none());
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let signer = Signer::new(b"Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn repeated_signing_is_stable() {
        let signer = Signer::new(b"secret").unwrap();
        let first = signer.sign(b"payload");
        assert_eq!(signer.sign(b"payload"), first);
        assert_ne!(signer.sign(b"other"), first);
        assert_eq!(first.len(), 64);
        assert_eq!(first, first.to_lowercase());
    }

    #[test]
    fn verify_accepts_own_signature() {
        let signer = Signer::new(b"secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(signer.verify(b"payload", &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampering_and_garbage() {
        let signer = Signer::new(b"secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(matches!(
            signer.verify(b"payload!", &sig),
            Err(SignatureError::Mismatch)
        ));
        assert!(matches!(
            signer.verify(b"payload", "zz-not-hex"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            signer.verify(b"payload", "abcd"),
            Err(SignatureError::Mismatch)
        ));

        let other = Signer::new(b"different").unwrap();
        assert!(other.verify(b"payload", &sig).is_err());
    }
}
