//! Path resolution for protected files
//!
//! Turns an externally supplied file path into a resource id and an absolute
//! path inside the storage root, or a definitive rejection. Every step must
//! pass, in order:
//!
//! 1. the path ends in the protected extension (case-insensitive)
//! 2. it canonicalizes (symlinks and `..` resolved) to an existing file
//! 3. the canonical path lies inside the canonical storage root, compared by
//!    whole path components
//! 4. the catalog (through the TTL cache) knows a resource for it
//! 5. that resource is declared with the protected content type
//!
//! Rejections are values, never errors: resolution fails closed.

pub mod cache;

pub use cache::{spawn_cleanup_task, ResolveCache, ResolveCacheConfig};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{path_key, ResourceCatalog, ResourceRecord, PROTECTED_EXTENSION};
use crate::types::Result;

/// Why a path was not resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Traversal attempt, wrong type, or outside the storage root
    Forbidden,
    /// No such resource or file
    NotFound,
}

/// A path that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub resource_id: u64,
    pub absolute_path: PathBuf,
}

pub struct PathResolver {
    root: PathBuf,
    uploads_prefix: String,
    catalog: Arc<dyn ResourceCatalog>,
    cache: Arc<ResolveCache>,
}

impl PathResolver {
    /// Build a resolver over `storage_root`, which must exist.
    pub fn new(
        storage_root: &Path,
        uploads_prefix: &str,
        catalog: Arc<dyn ResourceCatalog>,
        cache: Arc<ResolveCache>,
    ) -> Result<Self> {
        let root = std::fs::canonicalize(storage_root)?;
        Ok(Self {
            root,
            uploads_prefix: uploads_prefix.to_string(),
            catalog,
            cache,
        })
    }

    /// Canonical storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Arc<dyn ResourceCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResolveCache> {
        &self.cache
    }

    /// Resolve a requested path (relative to the root, or carrying the
    /// uploads URL prefix) to a protected resource.
    pub async fn resolve(&self, raw_path: &str) -> std::result::Result<ResolvedResource, Rejection> {
        if !has_protected_extension(raw_path) {
            debug!("Rejected path without protected extension");
            return Err(Rejection::Forbidden);
        }

        let relative = self.strip_uploads_prefix(raw_path);
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            warn!(path = %raw_path, "Rejected path traversal attempt");
            return Err(Rejection::Forbidden);
        }

        // Any canonicalization failure is Forbidden so probing paths cannot
        // tell missing files from refused ones
        let absolute_path = self
            .confine(&self.root.join(relative), Rejection::Forbidden)
            .await?;

        let record = self.lookup(&absolute_path).ok_or(Rejection::NotFound)?;
        if !record.is_protected() {
            debug!(resource_id = record.id, mime_type = %record.mime_type, "Resource is not a protected type");
            return Err(Rejection::Forbidden);
        }

        Ok(ResolvedResource {
            resource_id: record.id,
            absolute_path,
        })
    }

    /// Absolute path of a catalogued resource, re-checked against the root.
    pub async fn locate(&self, record: &ResourceRecord) -> std::result::Result<PathBuf, Rejection> {
        let key = path_key(&record.file).ok_or(Rejection::Forbidden)?;
        self.confine(&self.root.join(key), Rejection::NotFound).await
    }

    /// Canonicalize `candidate` and require an existing regular file inside
    /// the storage root. `missing` is returned when it cannot be resolved.
    async fn confine(
        &self,
        candidate: &Path,
        missing: Rejection,
    ) -> std::result::Result<PathBuf, Rejection> {
        let canonical = match tokio::fs::canonicalize(candidate).await {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "Path did not canonicalize");
                return Err(missing);
            }
        };

        if !canonical.starts_with(&self.root) || canonical == self.root {
            warn!("Resolved path escapes the storage root");
            return Err(Rejection::Forbidden);
        }

        match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => Ok(canonical),
            _ => Err(Rejection::NotFound),
        }
    }

    /// Catalog record for a canonical path. A cached id is trusted only while
    /// its record still points at this path.
    fn lookup(&self, canonical: &Path) -> Option<ResourceRecord> {
        let relative = canonical.strip_prefix(&self.root).ok()?;

        if let Some(id) = self.cache.get(canonical) {
            match self.catalog.get(id) {
                Some(record) if path_key(&record.file) == path_key(relative) => return Some(record),
                _ => {
                    debug!(resource_id = id, "Dropping stale resolve cache entry");
                    self.cache.invalidate(canonical);
                }
            }
        }

        let id = self.catalog.find_by_path(relative)?;
        let record = self.catalog.get(id)?;
        self.cache.insert(canonical.to_path_buf(), id);
        Some(record)
    }

    fn strip_uploads_prefix<'p>(&self, raw_path: &'p str) -> &'p str {
        let stripped = raw_path
            .strip_prefix(self.uploads_prefix.as_str())
            .unwrap_or(raw_path);
        stripped.trim_start_matches('/')
    }
}

/// Whether `path` ends in the protected extension, ignoring case
pub fn has_protected_extension(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(PROTECTED_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, PROTECTED_MIME};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        outside: PathBuf,
        resolver: PathResolver,
        catalog: Arc<MemoryCatalog>,
    }

    fn record(id: u64, file: &str, mime: &str) -> ResourceRecord {
        ResourceRecord {
            id,
            file: PathBuf::from(file),
            mime_type: mime.to_string(),
            title: None,
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let outside = dir.path().join("uploads-evil");
        std::fs::create_dir_all(uploads.join("2024")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();

        std::fs::write(uploads.join("2024/guide.pdf"), b"%PDF-1.4 guide").unwrap();
        std::fs::write(uploads.join("2024/Upper.PDF"), b"%PDF-1.4 upper").unwrap();
        std::fs::write(uploads.join("2024/fake.pdf"), b"not really").unwrap();
        std::fs::write(uploads.join("2024/orphan.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(outside.join("secret.pdf"), b"%PDF-1.4 secret").unwrap();

        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(record(42, "2024/guide.pdf", PROTECTED_MIME)).unwrap();
        catalog.insert(record(43, "2024/Upper.PDF", PROTECTED_MIME)).unwrap();
        catalog.insert(record(44, "2024/fake.pdf", "image/png")).unwrap();

        let resolver = PathResolver::new(
            &uploads,
            "/uploads/",
            catalog.clone(),
            Arc::new(ResolveCache::with_ttl(Duration::from_secs(60))),
        )
        .unwrap();

        Fixture {
            _dir: dir,
            outside,
            resolver,
            catalog,
        }
    }

    #[test]
    fn test_protected_extension() {
        assert!(has_protected_extension("a/b.pdf"));
        assert!(has_protected_extension("a/b.PdF"));
        assert!(!has_protected_extension("a/b.pdf.php"));
        assert!(!has_protected_extension("test.pdf\0.php"));
        assert!(!has_protected_extension(".pdf"));
        assert!(!has_protected_extension("pdf"));
    }

    #[tokio::test]
    async fn test_resolves_with_and_without_prefix() {
        let fx = fixture();
        for raw in ["/uploads/2024/guide.pdf", "2024/guide.pdf", "/2024/guide.pdf"] {
            let resolved = fx.resolver.resolve(raw).await.expect(raw);
            assert_eq!(resolved.resource_id, 42);
            assert!(resolved.absolute_path.starts_with(fx.resolver.root()));
        }
        let upper = fx.resolver.resolve("/uploads/2024/Upper.PDF").await.unwrap();
        assert_eq!(upper.resource_id, 43);
    }

    #[tokio::test]
    async fn test_wrong_extension_forbidden() {
        let fx = fixture();
        assert_eq!(
            fx.resolver.resolve("/uploads/2024/guide.txt").await,
            Err(Rejection::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let fx = fixture();
        for raw in [
            "../uploads-evil/secret.pdf",
            "/uploads/../uploads-evil/secret.pdf",
            "2024/../2024/guide.pdf",
            "../../../../etc/missing.pdf",
            // undecoded percent sequences are literal names that do not exist
            "%2e%2e%2fuploads-evil/secret.pdf",
        ] {
            assert_eq!(fx.resolver.resolve(raw).await, Err(Rejection::Forbidden), "{raw}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let fx = fixture();
        let link = fx.resolver.root().join("2024/escape.pdf");
        std::os::unix::fs::symlink(fx.outside.join("secret.pdf"), &link).unwrap();
        fx.catalog
            .insert(record(45, "2024/escape.pdf", PROTECTED_MIME))
            .unwrap();

        assert_eq!(
            fx.resolver.resolve("2024/escape.pdf").await,
            Err(Rejection::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_sibling_directory_is_not_inside_root() {
        let fx = fixture();
        // Absolute path into the sibling "uploads-evil" shares a string prefix
        let sibling = fx.outside.join("secret.pdf");
        assert_eq!(
            fx.resolver
                .confine(&sibling, Rejection::Forbidden)
                .await,
            Err(Rejection::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_unknown_and_wrong_type() {
        let fx = fixture();
        assert_eq!(
            fx.resolver.resolve("2024/orphan.pdf").await,
            Err(Rejection::NotFound)
        );
        assert_eq!(
            fx.resolver.resolve("2024/fake.pdf").await,
            Err(Rejection::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_lookup_is_cached() {
        let fx = fixture();
        fx.resolver.resolve("2024/guide.pdf").await.unwrap();
        assert_eq!(fx.resolver.cache().len(), 1);

        // Removed from the catalog: the stale cache entry is dropped
        fx.catalog.remove(42);
        assert_eq!(
            fx.resolver.resolve("2024/guide.pdf").await,
            Err(Rejection::NotFound)
        );
        assert!(fx.resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cached_path_reassigned_to_another_resource() {
        let fx = fixture();
        let first = fx.resolver.resolve("2024/guide.pdf").await.unwrap();
        assert_eq!(first.resource_id, 42);

        // 42 moves to another file while its old path is still cached, and
        // the old path now belongs to 99
        fx.catalog
            .insert(record(42, "2024/orphan.pdf", PROTECTED_MIME))
            .unwrap();
        fx.catalog
            .insert(record(99, "2024/guide.pdf", PROTECTED_MIME))
            .unwrap();

        let reassigned = fx.resolver.resolve("2024/guide.pdf").await.unwrap();
        assert_eq!(reassigned.resource_id, 99);
        let moved = fx.resolver.resolve("2024/orphan.pdf").await.unwrap();
        assert_eq!(moved.resource_id, 42);
    }

    #[tokio::test]
    async fn test_cached_path_changed_to_unprotected_resource() {
        let fx = fixture();
        fx.resolver.resolve("2024/guide.pdf").await.unwrap();

        fx.catalog.remove(42);
        fx.catalog
            .insert(record(98, "2024/guide.pdf", "image/png"))
            .unwrap();

        assert_eq!(
            fx.resolver.resolve("2024/guide.pdf").await,
            Err(Rejection::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_locate() {
        let fx = fixture();
        let guide = fx.catalog.get(42).unwrap();
        let path = fx.resolver.locate(&guide).await.unwrap();
        assert!(path.ends_with("2024/guide.pdf"));

        let missing = record(46, "2024/deleted.pdf", PROTECTED_MIME);
        assert_eq!(fx.resolver.locate(&missing).await, Err(Rejection::NotFound));
    }
}
