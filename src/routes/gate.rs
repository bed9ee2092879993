//! Gate page token issuance
//!
//! `GET /gate/{gate_page_id}` is where redirected clients land. Visiting it
//! issues one token cookie per resource the gate guards (when auto-issue is
//! enabled) and returns the links to those resources as JSON. A single
//! resource can be requested explicitly with `?resource={id}`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::file::NO_STORE;
use super::serve::{error_response, Action, ServeError};
use crate::logging::{AccessOutcome, RouteKind};
use crate::server::{build_response, AppState, BoxBody, RequestContext};
use crate::token::{token_cookie, TokenCodec};

#[derive(Debug, Serialize)]
pub struct IssuedResource {
    pub resource_id: u64,
    pub title: String,
    pub view_url: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct GatePageResponse {
    pub gate_page_id: u64,
    /// Seconds each issued token stays valid
    pub expires_in: u64,
    pub issued: Vec<IssuedResource>,
}

/// Which mapped resources a gate visit issues tokens for
fn select_resources(
    state: &AppState,
    ctx: &RequestContext,
    mapped: &[u64],
) -> Result<Vec<u64>, ServeError> {
    match ctx.query_param("resource") {
        Some(raw) => {
            let requested: u64 = raw.parse().map_err(|_| ServeError::NotFound)?;
            if mapped.contains(&requested) {
                Ok(vec![requested])
            } else {
                Err(ServeError::NotFound)
            }
        }
        None if state.settings.auto_issue_on_gate_page => Ok(mapped.to_vec()),
        None => Ok(Vec::new()),
    }
}

pub async fn handle_gate(
    state: &AppState,
    ctx: &RequestContext,
    gate_page_id: u64,
) -> Response<BoxBody> {
    if ctx.method != Method::GET {
        return error_response(&ServeError::MethodNotAllowed);
    }

    let mapped = state.mappings.get_resources_for_gate(gate_page_id);
    let selected = match select_resources(state, ctx, &mapped) {
        Ok(ids) if !mapped.is_empty() => ids,
        Ok(_) => {
            debug!(gate_page_id, "Gate page guards no resources");
            return not_found(state, ctx, gate_page_id).await;
        }
        Err(_) => return not_found(state, ctx, gate_page_id).await,
    };

    let codec = TokenCodec::new(&state.signing_key);
    let ttl = state.settings.token_ttl_seconds;
    let mut issued = Vec::with_capacity(selected.len());
    let mut cookies = Vec::with_capacity(selected.len());

    for resource_id in selected {
        // Mappings may outlive the resource or its protected status
        let Some(record) = state
            .catalog
            .get(resource_id)
            .filter(|record| record.is_protected())
        else {
            debug!(gate_page_id, resource_id, "Skipping mapped resource that is no longer protected");
            continue;
        };

        let token = codec.generate(resource_id, ttl, &ctx.client_fingerprint);
        cookies.push(token_cookie(resource_id, &token, ttl, ctx.secure));
        issued.push(IssuedResource {
            resource_id,
            title: record.display_title(),
            view_url: state.settings.serve_url(resource_id, Action::View.as_str()),
            download_url: state.settings.serve_url(resource_id, Action::Download.as_str()),
        });
    }

    state
        .access_log
        .log(
            state
                .access_log
                .event(RouteKind::Gate, AccessOutcome::Issue, &ctx.client_fingerprint)
                .with_gate(gate_page_id)
                .with_count(issued.len() as u64),
        );

    let page = GatePageResponse {
        gate_page_id,
        expires_in: ttl,
        issued,
    };
    let body = serde_json::to_string(&page)
        .unwrap_or_else(|_| format!(r#"{{"gate_page_id":{},"issued":[]}}"#, gate_page_id));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, NO_STORE);
    for cookie in cookies {
        builder = builder.header(header::SET_COOKIE, cookie);
    }

    build_response(
        builder,
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    )
}

async fn not_found(state: &AppState, ctx: &RequestContext, gate_page_id: u64) -> Response<BoxBody> {
    state
        .access_log
        .log(
            state
                .access_log
                .event(RouteKind::Gate, AccessOutcome::NotFound, &ctx.client_fingerprint)
                .with_gate(gate_page_id),
        );
    error_response(&ServeError::NotFound)
}
