//! HTTP routes for the gate

pub mod file;
pub mod gate;
pub mod health;
pub mod serve;

pub use file::{content_disposition, serve_file, Disposition, CHUNK_SIZE};
pub use gate::{handle_gate, GatePageResponse, IssuedResource};
pub use health::{health_check, version_info};
pub use serve::{error_response, handle_resolve_path, handle_serve_by_id, Action, ServeError};
