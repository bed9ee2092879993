//! Access token encoding and validation.
//!
//! Wire format: `base64( resource_id | expires_at | hex(hmac) )` where the
//! HMAC-SHA256 covers `resource_id | expires_at | client_fingerprint`.
//! Tokens are self-contained; validation needs no server-side lookup.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::key::SigningKey;

type HmacSha256 = Hmac<Sha256>;

/// Field delimiter. Never appears in a numeric or hex field.
pub const SEPARATOR: char = '|';

/// Encoded tokens longer than this are rejected before decoding
pub const MAX_TOKEN_BYTES: usize = 512;

/// Decoded token fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub resource_id: u64,
    pub expires_at: u64,
    /// Hex-encoded HMAC-SHA256
    pub signature: String,
}

impl AccessToken {
    /// Decode an encoded token. Returns `None` for anything malformed.
    ///
    /// Numeric fields must be in canonical decimal form (no sign, no leading
    /// zeros) so the decoded value renders back to exactly the signed text.
    pub fn decode(token: &str) -> Option<Self> {
        if token.is_empty() || token.len() > MAX_TOKEN_BYTES {
            return None;
        }

        let raw = STANDARD.decode(token).ok()?;
        let payload = String::from_utf8(raw).ok()?;

        let mut parts = payload.split(SEPARATOR);
        let (id, expires, signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            resource_id: parse_canonical(id)?,
            expires_at: parse_canonical(expires)?,
            signature: signature.to_string(),
        })
    }

    /// Encode into the base64 wire form
    pub fn encode(&self) -> String {
        let payload = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.resource_id, self.expires_at, self.signature
        );
        STANDARD.encode(payload)
    }
}

fn parse_canonical(field: &str) -> Option<u64> {
    let value: u64 = field.parse().ok()?;
    if value.to_string() != field {
        return None;
    }
    Some(value)
}

/// Generates and validates tokens under one signing key
#[derive(Debug, Clone, Copy)]
pub struct TokenCodec<'a> {
    key: &'a SigningKey,
}

impl<'a> TokenCodec<'a> {
    pub fn new(key: &'a SigningKey) -> Self {
        Self { key }
    }

    /// Issue a token for `resource_id` expiring `ttl_seconds` from now.
    pub fn generate(&self, resource_id: u64, ttl_seconds: u64, client_fingerprint: &str) -> String {
        self.generate_at(resource_id, ttl_seconds, client_fingerprint, unix_now())
    }

    /// [`generate`](Self::generate) against an explicit clock
    pub fn generate_at(
        &self,
        resource_id: u64,
        ttl_seconds: u64,
        client_fingerprint: &str,
        now: u64,
    ) -> String {
        let expires_at = now.saturating_add(ttl_seconds);
        AccessToken {
            resource_id,
            expires_at,
            signature: self.sign(resource_id, expires_at, client_fingerprint),
        }
        .encode()
    }

    /// Check a token for `resource_id` presented by `client_fingerprint`.
    ///
    /// Fails closed: every malformed, mismatched or expired token is `false`.
    pub fn validate(&self, token: &str, resource_id: u64, client_fingerprint: &str) -> bool {
        self.validate_at(token, resource_id, client_fingerprint, unix_now())
    }

    /// [`validate`](Self::validate) against an explicit clock
    pub fn validate_at(
        &self,
        token: &str,
        resource_id: u64,
        client_fingerprint: &str,
        now: u64,
    ) -> bool {
        let Some(decoded) = AccessToken::decode(token) else {
            debug!(resource_id, "Malformed access token");
            return false;
        };

        if decoded.resource_id != resource_id {
            debug!(resource_id, token_resource = decoded.resource_id, "Token bound to another resource");
            return false;
        }

        if now > decoded.expires_at {
            debug!(resource_id, expires_at = decoded.expires_at, "Token expired");
            return false;
        }

        let expected = self.sign(decoded.resource_id, decoded.expires_at, client_fingerprint);
        let matches = !expected.is_empty()
            && bool::from(expected.as_bytes().ct_eq(decoded.signature.as_bytes()));

        if !matches {
            debug!(resource_id, "Token signature mismatch");
        }
        matches
    }

    fn sign(&self, resource_id: u64, expires_at: u64, client_fingerprint: &str) -> String {
        // new_from_slice only fails for fixed-size MACs; HMAC takes any key length
        let mut mac = match HmacSha256::new_from_slice(self.key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(
            format!("{resource_id}{SEPARATOR}{expires_at}{SEPARATOR}{client_fingerprint}")
                .as_bytes(),
        );
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn key() -> SigningKey {
        SigningKey::derive("test-auth-key", "test-auth-salt")
    }

    #[test]
    fn test_round_trip() {
        let key = key();
        let codec = TokenCodec::new(&key);
        for (id, ttl, fp) in [(1, 10, "127.0.0.1"), (42, 600, "::1"), (u64::MAX, 86_400, "")] {
            let token = codec.generate_at(id, ttl, fp, NOW);
            assert!(codec.validate_at(&token, id, fp, NOW), "id {id}");
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let key = key();
        let codec = TokenCodec::new(&key);
        assert_eq!(
            codec.generate_at(42, 600, "10.0.0.1", NOW),
            codec.generate_at(42, 600, "10.0.0.1", NOW)
        );
    }

    #[test]
    fn test_wire_format() {
        let key = key();
        let codec = TokenCodec::new(&key);
        let token = codec.generate_at(42, 600, "10.0.0.1", NOW);

        let decoded = AccessToken::decode(&token).expect("decodes");
        assert_eq!(decoded.resource_id, 42);
        assert_eq!(decoded.expires_at, NOW + 600);
        assert_eq!(decoded.signature.len(), 64);
        assert!(decoded.signature.chars().all(|c| c.is_ascii_hexdigit()));

        let raw = String::from_utf8(STANDARD.decode(&token).unwrap()).unwrap();
        assert_eq!(raw, format!("42|{}|{}", NOW + 600, decoded.signature));
    }

    #[test]
    fn test_expiry() {
        let key = key();
        let codec = TokenCodec::new(&key);
        let token = codec.generate_at(42, 600, "fp", NOW);

        assert!(codec.validate_at(&token, 42, "fp", NOW + 600));
        assert!(!codec.validate_at(&token, 42, "fp", NOW + 601));
    }

    #[test]
    fn test_bound_to_resource_and_fingerprint() {
        let key = key();
        let codec = TokenCodec::new(&key);
        let token = codec.generate_at(42, 600, "203.0.113.5", NOW);

        assert!(!codec.validate_at(&token, 43, "203.0.113.5", NOW));
        assert!(!codec.validate_at(&token, 42, "203.0.113.6", NOW));
    }

    #[test]
    fn test_bound_to_key() {
        let key = key();
        let other = SigningKey::derive("other", "secrets");
        let token = TokenCodec::new(&key).generate_at(42, 600, "fp", NOW);
        assert!(!TokenCodec::new(&other).validate_at(&token, 42, "fp", NOW));
    }

    #[test]
    fn test_tampering_detected() {
        let key = key();
        let codec = TokenCodec::new(&key);
        let token = codec.generate_at(42, 600, "fp", NOW);
        let original = AccessToken::decode(&token).unwrap();

        // Every signature byte
        for i in 0..original.signature.len() {
            let mut sig: Vec<u8> = original.signature.clone().into_bytes();
            sig[i] = if sig[i] == b'0' { b'1' } else { b'0' };
            let forged = AccessToken {
                signature: String::from_utf8(sig).unwrap(),
                ..original.clone()
            };
            assert!(!codec.validate_at(&forged.encode(), 42, "fp", NOW), "sig byte {i}");
        }

        // Extended expiration keeps the old signature
        let extended = AccessToken {
            expires_at: original.expires_at + 1,
            ..original.clone()
        };
        assert!(!codec.validate_at(&extended.encode(), 42, "fp", NOW));

        // Retargeted resource id
        let retargeted = AccessToken {
            resource_id: 43,
            ..original.clone()
        };
        assert!(!codec.validate_at(&retargeted.encode(), 43, "fp", NOW));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let key = key();
        let codec = TokenCodec::new(&key);

        assert!(!codec.validate_at("", 42, "fp", NOW));
        assert!(!codec.validate_at("not base64 !!!", 42, "fp", NOW));
        assert!(!codec.validate_at(&"A".repeat(MAX_TOKEN_BYTES + 4), 42, "fp", NOW));

        let two_fields = STANDARD.encode(format!("42|{}", NOW + 600));
        assert!(!codec.validate_at(&two_fields, 42, "fp", NOW));

        let four_fields = STANDARD.encode(format!("42|{}|abc|def", NOW + 600));
        assert!(!codec.validate_at(&four_fields, 42, "fp", NOW));

        let not_utf8 = STANDARD.encode([0xff, 0xfe, b'|', b'1']);
        assert!(!codec.validate_at(&not_utf8, 42, "fp", NOW));
    }

    #[test]
    fn test_non_canonical_numbers_rejected() {
        let key = key();
        let codec = TokenCodec::new(&key);
        let token = codec.generate_at(42, 600, "fp", NOW);
        let sig = AccessToken::decode(&token).unwrap().signature;

        for payload in [
            format!("042|{}|{}", NOW + 600, sig),
            format!("+42|{}|{}", NOW + 600, sig),
            format!("42|0{}|{}", NOW + 600, sig),
            format!(" 42|{}|{}", NOW + 600, sig),
        ] {
            assert!(!codec.validate_at(&STANDARD.encode(payload), 42, "fp", NOW));
        }
    }
}
