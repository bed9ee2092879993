//! Resource catalog
//!
//! Knows which files under the storage root are resources: their ids,
//! relative paths and declared content types. The gate consults it to turn
//! a resolved file into a resource id and back.
//!
//! `MemoryCatalog` is loaded from a JSON manifest:
//!
//! ```json
//! [
//!   { "id": 42, "file": "2024/05/guide.pdf", "mime_type": "application/pdf", "title": "Guide" }
//! ]
//! ```

use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{GateError, Result};

/// Content type of protected resources
pub const PROTECTED_MIME: &str = "application/pdf";

/// File extension of protected resources (compared case-insensitively)
pub const PROTECTED_EXTENSION: &str = "pdf";

/// A catalogued resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: u64,
    /// Path relative to the storage root
    pub file: PathBuf,
    pub mime_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl ResourceRecord {
    pub fn is_protected(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(PROTECTED_MIME)
    }

    /// Display title, falling back to the file name
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.id.to_string())
        })
    }
}

/// Attachment lookup collaborator
pub trait ResourceCatalog: Send + Sync {
    /// Record for a resource id
    fn get(&self, id: u64) -> Option<ResourceRecord>;

    /// Resource id for a path relative to the storage root
    fn find_by_path(&self, relative: &Path) -> Option<u64>;
}

/// Normalise a relative path into the catalog's lookup key.
///
/// Only plain components are kept, joined with `/`. Paths containing `..`
/// or a root are not valid keys.
pub fn path_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// In-memory catalog
#[derive(Default)]
pub struct MemoryCatalog {
    records: DashMap<u64, ResourceRecord>,
    by_path: DashMap<String, u64>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON manifest
    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<ResourceRecord> = serde_json::from_str(&raw)?;
        let catalog = Self::new();
        for record in records {
            catalog.insert(record)?;
        }
        info!(
            path = %path.display(),
            resources = catalog.len(),
            "Resource catalog loaded"
        );
        Ok(catalog)
    }

    /// Add or replace a record
    pub fn insert(&self, record: ResourceRecord) -> Result<()> {
        if record.id == 0 {
            return Err(GateError::Catalog("resource id must be non-zero".to_string()));
        }
        let key = path_key(&record.file).ok_or_else(|| {
            GateError::Catalog(format!(
                "resource {} has an invalid relative path",
                record.id
            ))
        })?;

        if let Some(previous) = self.records.insert(record.id, record.clone()) {
            if let Some(old_key) = path_key(&previous.file) {
                self.by_path.remove_if(&old_key, |_, id| *id == previous.id);
            }
        }
        if let Some(other) = self.by_path.insert(key.clone(), record.id) {
            if other != record.id {
                warn!(path = %key, previous = other, current = record.id, "Catalog path reassigned");
            }
        }
        Ok(())
    }

    /// Remove a record
    pub fn remove(&self, id: u64) -> Option<ResourceRecord> {
        let (_, record) = self.records.remove(&id)?;
        if let Some(key) = path_key(&record.file) {
            self.by_path.remove_if(&key, |_, existing| *existing == id);
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ResourceCatalog for MemoryCatalog {
    fn get(&self, id: u64) -> Option<ResourceRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    fn find_by_path(&self, relative: &Path) -> Option<u64> {
        let key = path_key(relative)?;
        self.by_path.get(&key).map(|id| *id)
    }
}
