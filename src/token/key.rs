//! Signing key derivation.
//!
//! The key is a SHA-256 digest over a fixed domain label and the two
//! long-lived secrets supplied by the hosting environment. The same secrets
//! always yield the same key, so tokens survive process restarts.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain label mixed into the derivation
const KEY_DOMAIN: &[u8] = b"pdfgate_token_key";

/// HMAC key for access tokens. Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: [u8; 32],
}

impl SigningKey {
    /// Derive the key from an authentication key and salt.
    pub fn derive(auth_key: &str, auth_salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(auth_key.as_bytes());
        hasher.update(auth_salt.as_bytes());
        Self {
            bytes: hasher.finalize().into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey([redacted])")
    }
}
