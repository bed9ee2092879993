//! HTTP server: connection handling, shared state and request routing

pub mod context;
pub mod http;

pub use context::RequestContext;
pub use http::{build_response, dispatch, run, AppState, BoxBody};
pub(crate) use http::empty_body;
