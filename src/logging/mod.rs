//! Logging infrastructure for pdf-gate
//!
//! Provides structured access events, optionally persisted as JSON lines.

pub mod access;

pub use access::{AccessEvent, AccessLogger, AccessOutcome, RouteKind};
