//! Shared error type for pdf-gate
//!
//! Covers startup and collaborator failures. Per-request rejections are not
//! errors here: see [`crate::resolver::Rejection`] and
//! [`crate::routes::ServeError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] crate::mapping::MappingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GateError>;
