//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::http::response::Builder;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::context::RequestContext;
use crate::catalog::{MemoryCatalog, ResourceCatalog};
use crate::config::{Args, GateSettings};
use crate::logging::AccessLogger;
use crate::mapping::{MappingStore, MemoryMappingStore};
use crate::policy::AccessPolicy;
use crate::resolver::{spawn_cleanup_task, PathResolver, ResolveCache};
use crate::routes::{self, Action};
use crate::token::SigningKey;
use crate::types::Result;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, std::io::Error>;

/// Shared application state
pub struct AppState {
    pub settings: GateSettings,
    /// Key every token is signed with
    pub signing_key: SigningKey,
    pub catalog: Arc<dyn ResourceCatalog>,
    pub mappings: Arc<dyn MappingStore>,
    /// Path resolution with its lookup cache
    pub resolver: PathResolver,
    pub policy: AccessPolicy,
    pub access_log: AccessLogger,
    pub dev_mode: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Assemble state from already-built collaborators
    pub fn new(
        settings: GateSettings,
        signing_key: SigningKey,
        catalog: Arc<dyn ResourceCatalog>,
        mappings: Arc<dyn MappingStore>,
        storage_root: &Path,
        access_log: AccessLogger,
    ) -> Result<Self> {
        let cache = Arc::new(ResolveCache::with_ttl(settings.resolve_cache_ttl));
        let resolver = PathResolver::new(
            storage_root,
            &settings.uploads_prefix,
            Arc::clone(&catalog),
            cache,
        )?;

        Ok(Self {
            policy: AccessPolicy::new(settings.block_unmapped_resources),
            settings,
            signing_key,
            catalog,
            mappings,
            resolver,
            access_log,
            dev_mode: false,
            started_at: Instant::now(),
        })
    }

    /// Build state from command-line arguments, loading the catalog and
    /// mapping files when configured.
    pub async fn from_args(args: &Args) -> Result<Self> {
        let (auth_key, auth_salt) = args.signing_secrets()?;
        let signing_key = SigningKey::derive(&auth_key, &auth_salt);

        let catalog: Arc<dyn ResourceCatalog> = match args.catalog_path {
            Some(ref path) => Arc::new(MemoryCatalog::load_json(path)?),
            None => {
                warn!("No CATALOG_PATH configured - every path will resolve as unknown");
                Arc::new(MemoryCatalog::new())
            }
        };

        let mappings = MemoryMappingStore::with_catalog(Arc::clone(&catalog));
        if let Some(ref path) = args.mappings_path {
            mappings.load_json(path)?;
        }

        let access_log = AccessLogger::new(args.node_id.to_string());
        if let Some(ref path) = args.access_log_path {
            access_log.init_file(path.clone())?;
        }

        let mut state = Self::new(
            args.settings(),
            signing_key,
            catalog,
            Arc::new(mappings),
            &args.storage_root,
            access_log,
        )?;
        state.dev_mode = args.dev_mode;
        Ok(state)
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;

    info!(
        "PDF gate listening on {} as node {}",
        listen,
        state.access_log.node_id()
    );
    info!(
        "Storage root {} (uploads prefix {}, serve prefix /{}/)",
        state.resolver.root().display(),
        state.settings.uploads_prefix,
        state.settings.serve_prefix
    );

    if state.dev_mode {
        warn!("Development mode enabled - signing secrets may be insecure defaults");
    }

    spawn_cleanup_task(Arc::clone(state.resolver.cache()));

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, Infallible> {
    debug!("[{}] {} {}", addr, req.method(), req.uri().path());
    let ctx = RequestContext::from_request(&req, addr, &state.settings);
    Ok(dispatch(&state, &ctx).await)
}

/// Route a request to its handler
pub async fn dispatch(state: &AppState, ctx: &RequestContext) -> Response<BoxBody> {
    let path = ctx.path.as_str();

    match (&ctx.method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return routes::health_check(state)
        }
        (&Method::GET, "/version") => return routes::version_info(),
        _ => {}
    }

    if path == "/resolve" {
        return match ctx.query_param("path") {
            Some(raw) if !raw.is_empty() => routes::handle_resolve_path(state, ctx, raw).await,
            _ => not_found_response(path),
        };
    }

    if path.starts_with(state.settings.uploads_prefix.as_str()) {
        return match urlencoding::decode(path) {
            Ok(decoded) => routes::handle_resolve_path(state, ctx, &decoded).await,
            Err(_) => routes::error_response(&routes::ServeError::Forbidden),
        };
    }

    if let Some(rest) = strip_segment(path, &state.settings.serve_prefix) {
        return match parse_id(rest) {
            Some(id) => {
                let action = Action::from_param(ctx.query_param("action"));
                routes::handle_serve_by_id(state, ctx, id, action).await
            }
            None => not_found_response(path),
        };
    }

    if let Some(rest) = strip_segment(path, "gate") {
        return match parse_id(rest) {
            Some(id) => routes::handle_gate(state, ctx, id).await,
            None => not_found_response(path),
        };
    }

    not_found_response(path)
}

/// Remainder of `path` after a leading `/{segment}/`
fn strip_segment<'p>(path: &'p str, segment: &str) -> Option<&'p str> {
    path.strip_prefix('/')?.strip_prefix(segment)?.strip_prefix('/')
}

/// A decimal id with an optional trailing slash
fn parse_id(rest: &str) -> Option<u64> {
    let digits = rest.strip_suffix('/').unwrap_or(rest);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Finish a response builder, falling back to a bare 500 if it is invalid
pub fn build_response(builder: Builder, body: BoxBody) -> Response<BoxBody> {
    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build response: {}", e);
            let mut response = Response::new(empty_body());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

pub(crate) fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Not found response
fn not_found_response(path: &str) -> Response<BoxBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    let builder = Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json");
    build_response(
        builder,
        Full::new(Bytes::from(body.to_string()))
            .map_err(|never| match never {})
            .boxed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_segment() {
        assert_eq!(strip_segment("/gate/7", "gate"), Some("7"));
        assert_eq!(strip_segment("/gate/7/", "gate"), Some("7/"));
        assert_eq!(strip_segment("/gates/7", "gate"), None);
        assert_eq!(strip_segment("/gate", "gate"), None);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("42/"), Some(42));
        assert_eq!(parse_id(""), None);
        assert_eq!(parse_id("/"), None);
        assert_eq!(parse_id("4a"), None);
        assert_eq!(parse_id("+4"), None);
        assert_eq!(parse_id("42/extra"), None);
        assert_eq!(parse_id("99999999999999999999999"), None);
    }
}
