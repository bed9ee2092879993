//! Stateless access tokens
//!
//! - `key`: process-wide signing key derived from the hosting secrets
//! - `codec`: token generation and constant-time validation
//! - `cookie`: the client-held artifact carrying a token

pub mod codec;
pub mod cookie;
pub mod key;

pub use codec::{AccessToken, TokenCodec, MAX_TOKEN_BYTES, SEPARATOR};
pub use cookie::{cookie_name, parse_cookie_header, token_cookie, COOKIE_PREFIX};
pub use key::SigningKey;
