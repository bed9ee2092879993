//! Access policy for protected resources
//!
//! A pure decision over the token state and the resource's gate mapping:
//!
//! | token           | gate page | block unmapped | decision |
//! |-----------------|-----------|----------------|----------|
//! | valid           | any       | any            | Serve    |
//! | invalid/absent  | mapped    | any            | Redirect |
//! | invalid/absent  | none      | off            | Serve    |
//! | invalid/absent  | none      | on             | Deny     |

use crate::mapping::MappingStore;
use crate::token::TokenCodec;

/// What the request carried for this resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No cookie for the resource
    NoToken,
    /// Cookie present and verified
    TokenValid,
    /// Cookie present but rejected
    TokenInvalid,
}

impl TokenState {
    /// Classify an optional presented token
    pub fn from_presented(
        token: Option<&str>,
        codec: &TokenCodec<'_>,
        resource_id: u64,
        client_fingerprint: &str,
    ) -> Self {
        match token {
            None => TokenState::NoToken,
            Some(t) if codec.validate(t, resource_id, client_fingerprint) => TokenState::TokenValid,
            Some(_) => TokenState::TokenInvalid,
        }
    }
}

/// Outcome of the access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Serve,
    /// Client must visit this gate page first (HTTP 302)
    Redirect { gate_page_id: u64 },
    /// HTTP 403
    Deny,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy {
    pub block_unmapped: bool,
}

impl AccessPolicy {
    pub fn new(block_unmapped: bool) -> Self {
        Self { block_unmapped }
    }

    /// Decide given the token state and the resource's gate page, if any.
    pub fn decide(&self, token: TokenState, gate_page_id: Option<u64>) -> Decision {
        if token == TokenState::TokenValid {
            return Decision::Serve;
        }
        match gate_page_id {
            Some(gate_page_id) => Decision::Redirect { gate_page_id },
            None if self.block_unmapped => Decision::Deny,
            None => Decision::Serve,
        }
    }

    /// Decide for `resource_id`, consulting the mapping store only when the
    /// token does not already settle it.
    pub fn evaluate(
        &self,
        token: TokenState,
        resource_id: u64,
        mappings: &dyn MappingStore,
    ) -> Decision {
        if token == TokenState::TokenValid {
            return Decision::Serve;
        }
        self.decide(token, mappings.get_gate_for_resource(resource_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MemoryMappingStore;
    use crate::token::SigningKey;

    #[test]
    fn test_decision_table() {
        let open = AccessPolicy::new(false);
        let strict = AccessPolicy::new(true);

        for policy in [open, strict] {
            assert_eq!(policy.decide(TokenState::TokenValid, Some(7)), Decision::Serve);
            assert_eq!(policy.decide(TokenState::TokenValid, None), Decision::Serve);
        }

        for token in [TokenState::NoToken, TokenState::TokenInvalid] {
            assert_eq!(
                open.decide(token, Some(7)),
                Decision::Redirect { gate_page_id: 7 }
            );
            assert_eq!(
                strict.decide(token, Some(7)),
                Decision::Redirect { gate_page_id: 7 }
            );
            assert_eq!(open.decide(token, None), Decision::Serve);
            assert_eq!(strict.decide(token, None), Decision::Deny);
        }
    }

    #[test]
    fn test_token_state_classification() {
        let key = SigningKey::derive("k", "s");
        let codec = TokenCodec::new(&key);
        let token = codec.generate(42, 600, "fp");

        assert_eq!(TokenState::from_presented(None, &codec, 42, "fp"), TokenState::NoToken);
        assert_eq!(
            TokenState::from_presented(Some(&token), &codec, 42, "fp"),
            TokenState::TokenValid
        );
        assert_eq!(
            TokenState::from_presented(Some(&token), &codec, 42, "other"),
            TokenState::TokenInvalid
        );
        assert_eq!(
            TokenState::from_presented(Some("garbage"), &codec, 42, "fp"),
            TokenState::TokenInvalid
        );
    }

    #[test]
    fn test_evaluate_uses_mappings() {
        let store = MemoryMappingStore::new();
        store.create(42, 7).unwrap();

        let policy = AccessPolicy::new(false);
        assert_eq!(
            policy.evaluate(TokenState::NoToken, 42, &store),
            Decision::Redirect { gate_page_id: 7 }
        );
        assert_eq!(policy.evaluate(TokenState::NoToken, 43, &store), Decision::Serve);
        assert_eq!(policy.evaluate(TokenState::TokenValid, 42, &store), Decision::Serve);
    }
}
