//! Access logging
//!
//! Every terminal request outcome becomes an `AccessEvent`. Events are always
//! emitted through `tracing`; when a file is configured they are also
//! appended to it in JSONL format. Token values never appear in events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Which entry point handled the request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    ResolvePath,
    ServeById,
    Gate,
}

/// How the request ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    /// File streamed
    Serve,
    /// Sent to the gate page
    Redirect,
    /// 403
    Deny,
    /// 404
    NotFound,
    /// 500 while serving an authorized file
    Error,
    /// Tokens issued on a gate page
    Issue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub route: RouteKind,
    pub outcome: AccessOutcome,
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_page_id: Option<u64>,
    /// Bytes announced for served files, or number of tokens issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl AccessEvent {
    pub fn new(node_id: String, route: RouteKind, outcome: AccessOutcome, client: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id,
            route,
            outcome,
            client: client.to_string(),
            resource_id: None,
            gate_page_id: None,
            count: None,
        }
    }

    pub fn with_resource(mut self, resource_id: u64) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_gate(mut self, gate_page_id: u64) -> Self {
        self.gate_page_id = Some(gate_page_id);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone)]
pub struct AccessLogger {
    /// Lines for the JSONL writer; unset when no file is configured
    sink: Arc<OnceLock<mpsc::UnboundedSender<String>>>,
    node_id: String,
}

impl AccessLogger {
    pub fn new(node_id: String) -> Self {
        Self {
            sink: Arc::new(OnceLock::new()),
            node_id,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start appending events to `path`.
    ///
    /// Lines are written on a blocking thread fed by a channel, so request
    /// handlers never wait on file I/O.
    pub fn init_file(&self, path: PathBuf) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.sink.set(tx).map_err(|_| {
            io::Error::new(io::ErrorKind::AlreadyExists, "access log already initialized")
        })?;

        let log_path = path.display().to_string();
        tokio::task::spawn_blocking(move || {
            let mut writer = BufWriter::new(file);
            while let Some(line) = rx.blocking_recv() {
                if let Err(e) = writeln!(writer, "{}", line) {
                    error!("Failed to write access event: {}", e);
                    continue;
                }
                // Flush once the queue is drained
                if rx.is_empty() {
                    if let Err(e) = writer.flush() {
                        error!("Failed to flush access log: {}", e);
                    }
                }
            }
            let _ = writer.flush();
        });

        info!("Access logging initialized to {}", log_path);
        Ok(())
    }

    /// Start an event stamped with this node's id
    pub fn event(&self, route: RouteKind, outcome: AccessOutcome, client: &str) -> AccessEvent {
        AccessEvent::new(self.node_id.clone(), route, outcome, client)
    }

    pub fn log(&self, event: AccessEvent) {
        info!(
            target: "pdf_gate::access",
            route = ?event.route,
            outcome = ?event.outcome,
            client = %event.client,
            resource_id = ?event.resource_id,
            gate_page_id = ?event.gate_page_id,
            count = ?event.count,
            "access"
        );

        let Some(sink) = self.sink.get() else {
            return;
        };

        match event.to_jsonl() {
            Ok(line) => {
                if sink.send(line).is_err() {
                    error!("Access log writer has stopped");
                }
            }
            Err(e) => error!("Failed to serialize access event: {}", e),
        }
    }
}
