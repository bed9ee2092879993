//! PDF gate - token-gated delivery of protected documents
//!
//! Protected PDF files are never served directly. Every request for one goes
//! through the gate, which either streams the file, redirects the client to
//! the gate page that issues access tokens, or refuses.
//!
//! ## Components
//!
//! - **Token**: stateless HMAC-signed tokens bound to a resource, an expiry
//!   and the client IP, carried in per-resource cookies
//! - **Resolver**: maps a requested path to a catalogued resource without
//!   ever leaving the storage root
//! - **Policy**: serve / redirect / deny decision from the token state and
//!   the resource's gate page mapping
//! - **Routes**: resolve-by-path, serve-by-id and gate page issuance

pub mod catalog;
pub mod config;
pub mod logging;
pub mod mapping;
pub mod policy;
pub mod resolver;
pub mod routes;
pub mod server;
pub mod token;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GateError, Result};
