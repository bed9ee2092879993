//! Health check endpoints
//!
//! - /health, /healthz - Liveness check
//! - /version - Build information for deployment verification

use std::sync::atomic::Ordering;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::{build_response, AppState, BoxBody};

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// Operating mode
    pub mode: &'static str,
    pub node_id: String,
    pub resolve_cache: ResolveCacheHealth,
    /// Whether unmapped resources are refused
    #[serde(rename = "blockUnmapped")]
    pub block_unmapped: bool,
}

#[derive(Serialize)]
pub struct ResolveCacheHealth {
    pub entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let cache = state.resolver.cache();
    let stats = cache.stats();
    HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.dev_mode {
            "development"
        } else {
            "production"
        },
        node_id: state.access_log.node_id().to_string(),
        resolve_cache: ResolveCacheHealth {
            entries: cache.len(),
            ttl_secs: cache.config().ttl.as_secs(),
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            evictions: stats.evictions.load(Ordering::Relaxed),
        },
        block_unmapped: state.settings.block_unmapped_resources,
    }
}

/// Handle liveness check (/health, /healthz)
pub fn health_check(state: &AppState) -> Response<BoxBody> {
    let response = build_health_response(state);

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    json_response(body)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

pub fn version_info() -> Response<BoxBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "pdf-gate",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());

    json_response(body)
}

fn json_response(body: String) -> Response<BoxBody> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store");
    build_response(
        builder,
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    )
}
