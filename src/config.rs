//! Configuration for pdf-gate
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::types::GateError;

/// Shortest token lifetime accepted, in seconds
pub const TOKEN_TTL_MIN: u64 = 10;
/// Longest token lifetime accepted, in seconds (one day)
pub const TOKEN_TTL_MAX: u64 = 86_400;
/// Default token lifetime, in seconds
pub const TOKEN_TTL_DEFAULT: u64 = 600;

/// pdf-gate - signed-cookie gate for protected PDF delivery
#[derive(Parser, Debug, Clone)]
#[command(name = "pdf-gate")]
#[command(about = "Serves protected PDFs only to clients that visited the gate page first")]
pub struct Args {
    /// Unique node identifier for this gate instance (appears in access logs)
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory holding the protected files
    #[arg(long, env = "STORAGE_ROOT", default_value = "./uploads")]
    pub storage_root: PathBuf,

    /// JSON manifest of resources: [{"id", "file", "mime_type", "title"}]
    #[arg(long, env = "CATALOG_PATH")]
    pub catalog_path: Option<PathBuf>,

    /// JSON seed of resource to gate page mappings: [{"resource_id", "gate_page_id"}]
    #[arg(long, env = "MAPPINGS_PATH")]
    pub mappings_path: Option<PathBuf>,

    /// Long-lived authentication key used to derive the signing key
    #[arg(long, env = "AUTH_KEY", hide_env_values = true)]
    pub auth_key: Option<String>,

    /// Long-lived salt used to derive the signing key
    #[arg(long, env = "AUTH_SALT", hide_env_values = true)]
    pub auth_salt: Option<String>,

    /// Token lifetime in seconds
    #[arg(
        long,
        env = "TOKEN_TTL_SECONDS",
        default_value_t = TOKEN_TTL_DEFAULT,
        value_parser = clap::value_parser!(u64).range(TOKEN_TTL_MIN..=TOKEN_TTL_MAX)
    )]
    pub token_ttl_seconds: u64,

    /// Issue tokens for every mapped resource when its gate page is viewed
    #[arg(long, env = "AUTO_ISSUE_ON_GATE_PAGE", default_value = "true", action = clap::ArgAction::Set)]
    pub auto_issue_on_gate_page: bool,

    /// Deny resources that have no gate page instead of passing them through
    #[arg(long, env = "BLOCK_UNMAPPED_RESOURCES", default_value = "false", action = clap::ArgAction::Set)]
    pub block_unmapped_resources: bool,

    /// URL prefix of direct static-file URLs
    #[arg(long, env = "UPLOADS_PREFIX", default_value = "/uploads/")]
    pub uploads_prefix: String,

    /// URL segment of serve-by-id links (/<prefix>/<id>/?action=view)
    #[arg(long, env = "SERVE_PREFIX", default_value = "pdfgate-serve")]
    pub serve_prefix: String,

    /// Gate page URL; `{id}` is replaced with the gate page id
    #[arg(long, env = "GATE_URL_TEMPLATE", default_value = "/gate/{id}")]
    pub gate_url_template: String,

    /// Header carrying the client address when running behind a proxy (e.g. X-Real-IP)
    #[arg(long, env = "CLIENT_IP_HEADER")]
    pub client_ip_header: Option<String>,

    /// Always mark issued cookies Secure
    #[arg(long, env = "SECURE_COOKIES", default_value = "false", action = clap::ArgAction::Set)]
    pub secure_cookies: bool,

    /// Lifetime of cached path to resource lookups, in seconds
    #[arg(long, env = "RESOLVE_CACHE_TTL_SECS", default_value = "3600")]
    pub resolve_cache_ttl_secs: u64,

    /// Append access events as JSON lines to this file
    #[arg(long, env = "ACCESS_LOG_PATH")]
    pub access_log_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable text
    #[arg(long, env = "LOG_JSON", default_value = "false", action = clap::ArgAction::Set)]
    pub log_json: bool,

    /// Enable development mode (allows missing signing secrets)
    #[arg(long, env = "DEV_MODE", default_value = "false", action = clap::ArgAction::Set)]
    pub dev_mode: bool,
}

impl Args {
    /// Signing secrets, falling back to fixed values in dev mode only
    pub fn signing_secrets(&self) -> Result<(String, String), GateError> {
        match (&self.auth_key, &self.auth_salt) {
            (Some(key), Some(salt)) => Ok((key.clone(), salt.clone())),
            _ if self.dev_mode => Ok((
                self.auth_key
                    .clone()
                    .unwrap_or_else(|| "dev-only-insecure-key".to_string()),
                self.auth_salt
                    .clone()
                    .unwrap_or_else(|| "dev-only-insecure-salt".to_string()),
            )),
            _ => Err(GateError::Config(
                "AUTH_KEY and AUTH_SALT are required in production mode".to_string(),
            )),
        }
    }

    /// Request-time settings derived from the arguments
    pub fn settings(&self) -> GateSettings {
        GateSettings {
            token_ttl_seconds: clamp_ttl(self.token_ttl_seconds),
            auto_issue_on_gate_page: self.auto_issue_on_gate_page,
            block_unmapped_resources: self.block_unmapped_resources,
            uploads_prefix: self.uploads_prefix.clone(),
            serve_prefix: self.serve_prefix.trim_matches('/').to_string(),
            gate_url_template: self.gate_url_template.clone(),
            client_ip_header: self.client_ip_header.clone(),
            secure_cookies: self.secure_cookies,
            resolve_cache_ttl: Duration::from_secs(self.resolve_cache_ttl_secs),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && (self.auth_key.is_none() || self.auth_salt.is_none()) {
            return Err("AUTH_KEY and AUTH_SALT are required in production mode".to_string());
        }

        if !self.uploads_prefix.starts_with('/') {
            return Err("UPLOADS_PREFIX must start with '/'".to_string());
        }

        let serve_prefix = self.serve_prefix.trim_matches('/');
        if serve_prefix.is_empty() || serve_prefix.contains('/') {
            return Err("SERVE_PREFIX must be a single non-empty path segment".to_string());
        }

        if !self.gate_url_template.contains("{id}") {
            return Err("GATE_URL_TEMPLATE must contain the {id} placeholder".to_string());
        }

        if self.resolve_cache_ttl_secs == 0 {
            return Err("RESOLVE_CACHE_TTL_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Clamp a token lifetime into the accepted range
pub fn clamp_ttl(seconds: u64) -> u64 {
    seconds.clamp(TOKEN_TTL_MIN, TOKEN_TTL_MAX)
}

/// Options consulted while handling requests
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub token_ttl_seconds: u64,
    pub auto_issue_on_gate_page: bool,
    pub block_unmapped_resources: bool,
    pub uploads_prefix: String,
    pub serve_prefix: String,
    pub gate_url_template: String,
    pub client_ip_header: Option<String>,
    pub secure_cookies: bool,
    pub resolve_cache_ttl: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            token_ttl_seconds: TOKEN_TTL_DEFAULT,
            auto_issue_on_gate_page: true,
            block_unmapped_resources: false,
            uploads_prefix: "/uploads/".to_string(),
            serve_prefix: "pdfgate-serve".to_string(),
            gate_url_template: "/gate/{id}".to_string(),
            client_ip_header: None,
            secure_cookies: false,
            resolve_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl GateSettings {
    /// URL of the gate page a client is redirected to
    pub fn gate_url(&self, gate_page_id: u64) -> String {
        self.gate_url_template
            .replace("{id}", &gate_page_id.to_string())
    }

    /// Serve-by-id URL for a resource
    pub fn serve_url(&self, resource_id: u64, action: &str) -> String {
        format!("/{}/{}/?action={}", self.serve_prefix, resource_id, action)
    }
}
