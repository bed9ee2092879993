//! Per-request context
//!
//! Everything the routes need from an incoming request, extracted once:
//! method, path, query parameters, token cookies, the client fingerprint
//! tokens are bound to, and whether cookies must be marked `Secure`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use hyper::{header, Method, Request};

use crate::config::GateSettings;
use crate::token::{cookie_name, parse_cookie_header};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Raw (still percent-encoded) request path
    pub path: String,
    pub query: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Identity tokens are bound to; the client IP as text
    pub client_fingerprint: String,
    /// Issue cookies with the `Secure` attribute
    pub secure: bool,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>, peer: SocketAddr, settings: &GateSettings) -> Self {
        let headers = req.headers();

        let cookies = parse_cookie_header(
            headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );

        let forwarded_https = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false);

        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: parse_query(req.uri().query()),
            cookies,
            client_fingerprint: client_fingerprint(req, peer, settings),
            secure: settings.secure_cookies || forwarded_https,
        }
    }

    /// Context for a request that did not come off a socket, e.g. in tests
    /// or when embedding the router.
    pub fn new(method: Method, path_and_query: &str, client_fingerprint: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        Self {
            method,
            path: path.to_string(),
            query: parse_query(query),
            cookies: HashMap::new(),
            client_fingerprint: client_fingerprint.to_string(),
            secure: false,
        }
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Token presented for a resource, if any
    pub fn token_for(&self, resource_id: u64) -> Option<&str> {
        self.cookies
            .get(&cookie_name(resource_id))
            .map(String::as_str)
            .filter(|token| !token.is_empty())
    }
}

/// Decoded query parameters; the first occurrence of a name wins
fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let mut params = HashMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        params.entry(name).or_insert(value);
    }
    params
}

/// Client IP, taken from the configured proxy header when present and
/// well-formed, else from the socket peer.
fn client_fingerprint<B>(req: &Request<B>, peer: SocketAddr, settings: &GateSettings) -> String {
    settings
        .client_ip_header
        .as_deref()
        .and_then(|name| req.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
        .to_string()
}
