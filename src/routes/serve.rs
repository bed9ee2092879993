//! Protected resource routes
//!
//! - `handle_resolve_path`: a file path under the uploads prefix, or the
//!   `path` parameter of `/resolve`
//! - `handle_serve_by_id`: `/{serve_prefix}/{id}/?action=view|download`
//!
//! Both run the same access decision and record one access event per request.

use std::path::Path;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Response, StatusCode};
use tracing::{debug, warn};

use super::file::{serve_file, Disposition, NO_STORE};
use crate::logging::{AccessOutcome, RouteKind};
use crate::policy::{Decision, TokenState};
use crate::resolver::Rejection;
use crate::server::{build_response, empty_body, AppState, BoxBody, RequestContext};
use crate::token::TokenCodec;

/// Why a protected resource was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    Forbidden,
    NotFound,
    /// Client must visit the gate page at this URL first
    Redirect { location: String, gate_page_id: u64 },
    MethodNotAllowed,
    Internal(String),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Forbidden => write!(f, "Access denied"),
            ServeError::NotFound => write!(f, "File not found"),
            ServeError::Redirect { location, .. } => write!(f, "Redirect to {}", location),
            ServeError::MethodNotAllowed => write!(f, "Method not allowed"),
            ServeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<Rejection> for ServeError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Forbidden => ServeError::Forbidden,
            Rejection::NotFound => ServeError::NotFound,
        }
    }
}

impl ServeError {
    fn outcome(&self) -> AccessOutcome {
        match self {
            ServeError::Forbidden | ServeError::MethodNotAllowed => AccessOutcome::Deny,
            ServeError::NotFound => AccessOutcome::NotFound,
            ServeError::Redirect { .. } => AccessOutcome::Redirect,
            ServeError::Internal(_) => AccessOutcome::Error,
        }
    }
}

/// Convert a `ServeError` to a response. Bodies are fixed strings and never
/// reveal paths or internal detail.
pub fn error_response(err: &ServeError) -> Response<BoxBody> {
    let (status, message) = match err {
        ServeError::Forbidden => (StatusCode::FORBIDDEN, "Access denied."),
        ServeError::NotFound => (StatusCode::NOT_FOUND, "File not found."),
        ServeError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed."),
        ServeError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error."),
        ServeError::Redirect { location, .. } => {
            let builder = Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, location.as_str())
                .header(header::CACHE_CONTROL, NO_STORE);
            return build_response(builder, empty_body());
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, NO_STORE);
    if status == StatusCode::METHOD_NOT_ALLOWED {
        builder = builder.header(header::ALLOW, "GET, HEAD");
    }
    build_response(
        builder,
        Full::new(Bytes::from_static(message.as_bytes()))
            .map_err(|never| match never {})
            .boxed(),
    )
}

/// Requested delivery mode on the serve-by-id route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    View,
    Download,
}

impl Action {
    /// Parse the `action` parameter. Anything other than `download` views.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("download") => Action::Download,
            _ => Action::View,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Download => "download",
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Action::View => Disposition::Inline,
            Action::Download => Disposition::Attachment,
        }
    }
}

/// Serve a protected file addressed by its path
pub async fn handle_resolve_path(
    state: &AppState,
    ctx: &RequestContext,
    raw_path: &str,
) -> Response<BoxBody> {
    let route = RouteKind::ResolvePath;
    if let Err(err) = require_read_method(ctx) {
        return reject(state, ctx, route, None, err).await;
    }

    let resolved = match state.resolver.resolve(raw_path).await {
        Ok(resolved) => resolved,
        Err(rejection) => return reject(state, ctx, route, None, rejection.into()).await,
    };

    let resource_id = resolved.resource_id;
    if let Err(err) = authorize(state, ctx, resource_id) {
        return reject(state, ctx, route, Some(resource_id), err).await;
    }

    deliver(
        state,
        ctx,
        route,
        resource_id,
        &resolved.absolute_path,
        Disposition::Inline,
    )
    .await
}

/// Serve a protected file addressed by its resource id
pub async fn handle_serve_by_id(
    state: &AppState,
    ctx: &RequestContext,
    resource_id: u64,
    action: Action,
) -> Response<BoxBody> {
    let route = RouteKind::ServeById;
    if let Err(err) = require_read_method(ctx) {
        return reject(state, ctx, route, None, err).await;
    }
    if resource_id == 0 {
        return reject(state, ctx, route, None, ServeError::NotFound).await;
    }

    let record = match state.catalog.get(resource_id) {
        Some(record) => record,
        None => return reject(state, ctx, route, Some(resource_id), ServeError::NotFound).await,
    };
    if !record.is_protected() {
        debug!(resource_id, mime_type = %record.mime_type, "Serve by id for unprotected type");
        return reject(state, ctx, route, Some(resource_id), ServeError::Forbidden).await;
    }

    if let Err(err) = authorize(state, ctx, resource_id) {
        return reject(state, ctx, route, Some(resource_id), err).await;
    }

    let path = match state.resolver.locate(&record).await {
        Ok(path) => path,
        Err(rejection) => {
            return reject(state, ctx, route, Some(resource_id), rejection.into()).await
        }
    };

    deliver(state, ctx, route, resource_id, &path, action.disposition()).await
}

fn require_read_method(ctx: &RequestContext) -> Result<(), ServeError> {
    if ctx.method == Method::GET || ctx.method == Method::HEAD {
        Ok(())
    } else {
        Err(ServeError::MethodNotAllowed)
    }
}

/// Token check followed by the access policy
fn authorize(state: &AppState, ctx: &RequestContext, resource_id: u64) -> Result<(), ServeError> {
    let codec = TokenCodec::new(&state.signing_key);
    let token = TokenState::from_presented(
        ctx.token_for(resource_id),
        &codec,
        resource_id,
        &ctx.client_fingerprint,
    );

    match state
        .policy
        .evaluate(token, resource_id, state.mappings.as_ref())
    {
        Decision::Serve => Ok(()),
        Decision::Redirect { gate_page_id } => Err(ServeError::Redirect {
            location: state.settings.gate_url(gate_page_id),
            gate_page_id,
        }),
        Decision::Deny => {
            debug!(resource_id, "Unmapped resource blocked");
            Err(ServeError::Forbidden)
        }
    }
}

async fn deliver(
    state: &AppState,
    ctx: &RequestContext,
    route: RouteKind,
    resource_id: u64,
    path: &Path,
    disposition: Disposition,
) -> Response<BoxBody> {
    match serve_file(path, disposition, ctx.method == Method::HEAD).await {
        Ok((response, length)) => {
            state
                .access_log
                .log(
                    state
                        .access_log
                        .event(route, AccessOutcome::Serve, &ctx.client_fingerprint)
                        .with_resource(resource_id)
                        .with_count(length),
                );
            response
        }
        Err(err) => reject(state, ctx, route, Some(resource_id), err).await,
    }
}

async fn reject(
    state: &AppState,
    ctx: &RequestContext,
    route: RouteKind,
    resource_id: Option<u64>,
    err: ServeError,
) -> Response<BoxBody> {
    if let ServeError::Internal(ref msg) = err {
        warn!(?route, resource_id = ?resource_id, "Serving failed: {}", msg);
    }

    let mut event = state
        .access_log
        .event(route, err.outcome(), &ctx.client_fingerprint);
    if let Some(id) = resource_id {
        event = event.with_resource(id);
    }
    if let ServeError::Redirect { gate_page_id, .. } = err {
        event = event.with_gate(gate_page_id);
    }
    state.access_log.log(event);

    error_response(&err)
}
