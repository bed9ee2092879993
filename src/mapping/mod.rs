//! Resource to gate page mappings
//!
//! Each resource has at most one gate page; a gate page may guard many
//! resources. Mappings are created and deleted, never edited in place.
//!
//! `MemoryMappingStore` keeps them in memory and can be seeded from JSON:
//!
//! ```json
//! [ { "resource_id": 42, "gate_page_id": 7 } ]
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::ResourceCatalog;

/// Lookup side of the mapping table, as seen by the gate
pub trait MappingStore: Send + Sync {
    /// Gate page guarding a resource
    fn get_gate_for_resource(&self, resource_id: u64) -> Option<u64>;

    /// Resources guarded by a gate page
    fn get_resources_for_gate(&self, gate_page_id: u64) -> Vec<u64>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Invalid resource or gate page id")]
    InvalidIds,

    #[error("Resource {0} is not a protected resource")]
    NotProtected(u64),

    #[error("Resource {0} is already mapped to a gate page")]
    Duplicate(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub id: u64,
    pub resource_id: u64,
    pub gate_page_id: u64,
    pub created_at: DateTime<Utc>,
}

/// One page of mappings, newest first
#[derive(Debug, Clone, Serialize)]
pub struct MappingPage {
    pub items: Vec<ResourceMapping>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
struct MappingSeed {
    resource_id: u64,
    gate_page_id: u64,
}

/// In-memory mapping table
pub struct MemoryMappingStore {
    next_id: AtomicU64,
    rows: DashMap<u64, ResourceMapping>,
    /// resource_id -> mapping id (uniqueness)
    by_resource: DashMap<u64, u64>,
    catalog: Option<Arc<dyn ResourceCatalog>>,
}

impl Default for MemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMappingStore {
    /// Store without resource validation
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            rows: DashMap::new(),
            by_resource: DashMap::new(),
            catalog: None,
        }
    }

    /// Store that only accepts resources the catalog marks as protected
    pub fn with_catalog(catalog: Arc<dyn ResourceCatalog>) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::new()
        }
    }

    /// Seed mappings from a JSON file
    pub fn load_json(&self, path: &Path) -> crate::types::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let seeds: Vec<MappingSeed> = serde_json::from_str(&raw)?;
        let count = seeds.len();
        for seed in seeds {
            self.create(seed.resource_id, seed.gate_page_id)?;
        }
        info!(path = %path.display(), mappings = count, "Mappings loaded");
        Ok(count)
    }

    /// Map a resource to a gate page
    pub fn create(&self, resource_id: u64, gate_page_id: u64) -> Result<ResourceMapping, MappingError> {
        if resource_id == 0 || gate_page_id == 0 {
            return Err(MappingError::InvalidIds);
        }

        if let Some(ref catalog) = self.catalog {
            match catalog.get(resource_id) {
                Some(record) if record.is_protected() => {}
                _ => return Err(MappingError::NotProtected(resource_id)),
            }
        }

        let mapping = match self.by_resource.entry(resource_id) {
            Entry::Occupied(_) => return Err(MappingError::Duplicate(resource_id)),
            Entry::Vacant(slot) => {
                let mapping = ResourceMapping {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    resource_id,
                    gate_page_id,
                    created_at: Utc::now(),
                };
                self.rows.insert(mapping.id, mapping.clone());
                slot.insert(mapping.id);
                mapping
            }
        };

        debug!(mapping_id = mapping.id, resource_id, gate_page_id, "Mapping created");
        Ok(mapping)
    }

    /// Delete a mapping by its id. Returns whether a row was removed.
    pub fn delete(&self, mapping_id: u64) -> bool {
        match self.rows.remove(&mapping_id) {
            Some((_, mapping)) => {
                self.by_resource
                    .remove_if(&mapping.resource_id, |_, id| *id == mapping_id);
                debug!(mapping_id, resource_id = mapping.resource_id, "Mapping deleted");
                true
            }
            None => false,
        }
    }

    /// List mappings newest first. `page` is 1-based and clamped to at least 1.
    pub fn list(&self, per_page: usize, page: usize) -> MappingPage {
        let mut items: Vec<ResourceMapping> = self.rows.iter().map(|r| r.value().clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = items.len();
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        let items = items.into_iter().skip(offset).take(per_page).collect();

        MappingPage { items, total }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl MappingStore for MemoryMappingStore {
    fn get_gate_for_resource(&self, resource_id: u64) -> Option<u64> {
        let mapping_id = *self.by_resource.get(&resource_id)?;
        self.rows.get(&mapping_id).map(|m| m.gate_page_id)
    }

    fn get_resources_for_gate(&self, gate_page_id: u64) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .rows
            .iter()
            .filter(|m| m.gate_page_id == gate_page_id)
            .map(|m| m.resource_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
