//! HMAC-SHA256 signatures in `sha256=<hex>` form.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Signs and verifies payloads with a shared secret.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    /// Creates a signer for `secret`.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    #[allow(clippy::expect_used)]
    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }

    /// Returns the signature of `payload`.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks `signature` against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
        if signature.is_empty() {
            return Err(SignatureError::Missing);
        }
        let digest = signature
            .strip_prefix(PREFIX)
            .ok_or_else(|| SignatureError::Malformed(format!("expected '{PREFIX}' prefix")))?;
        let bytes = hex::decode(digest).map_err(|e| SignatureError::Malformed(e.to_string()))?;

        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&bytes).map_err(|_| SignatureError::Mismatch)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = Signer::new("s3cret");
        let sig = signer.sign(b"payload");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), PREFIX.len() + 64);
        signer.verify(b"payload", &sig).unwrap();
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signer = Signer::new("Jefe");
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signer = Signer::new("s3cret");
        let sig = signer.sign(b"payload");
        assert_eq!(signer.verify(b"payload!", &sig), Err(SignatureError::Mismatch));
        assert_eq!(
            Signer::new("other").verify(b"payload", &sig),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_rejects_malformed() {
        let signer = Signer::new("s3cret");
        assert_eq!(signer.verify(b"p", ""), Err(SignatureError::Missing));
        assert!(matches!(signer.verify(b"p", "md5=abc"), Err(SignatureError::Malformed(_))));
        assert!(matches!(signer.verify(b"p", "sha256=zz"), Err(SignatureError::Malformed(_))));
    }

    #[test]
    fn test_debug_hides_secret() {
        assert!(!format!("{:?}", Signer::new("s3cret")).contains("s3cret"));
    }
}
