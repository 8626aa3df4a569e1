//! Identifier caches shared across lookups.
//!
//! The host owns these mappings; the lookup code only reads and writes them
//! through [`MetadataCache`]. Everything here is advisory: a missing entry
//! means the network is consulted, never that a lookup fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Site-identifier → cover URLs and ISBN → site-identifier mappings.
/// Writers may race; the last write wins.
pub trait MetadataCache: Send + Sync {
    fn cover_urls(&self, site_id: &str) -> Option<Vec<String>>;

    fn put_cover_urls(&self, site_id: &str, urls: Vec<String>);

    fn isbn_to_site_id(&self, isbn: &str) -> Option<String>;

    fn put_isbn_site_id(&self, isbn: &str, site_id: &str);
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheData {
    #[serde(default)]
    covers: HashMap<String, Vec<String>>,
    #[serde(default)]
    isbns: HashMap<String, String>,
}

/// Process-lifetime cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    data: RwLock<CacheData>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data
            .read()
            .map(|d| d.covers.len() + d.isbns.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataCache for MemoryCache {
    fn cover_urls(&self, site_id: &str) -> Option<Vec<String>> {
        self.data.read().ok()?.covers.get(site_id).cloned()
    }

    fn put_cover_urls(&self, site_id: &str, urls: Vec<String>) {
        if let Ok(mut d) = self.data.write() {
            d.covers.insert(site_id.to_string(), urls);
        }
    }

    fn isbn_to_site_id(&self, isbn: &str) -> Option<String> {
        self.data.read().ok()?.isbns.get(isbn).cloned()
    }

    fn put_isbn_site_id(&self, isbn: &str, site_id: &str) {
        if let Ok(mut d) = self.data.write() {
            d.isbns.insert(isbn.to_string(), site_id.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// JSON file backend (used by the CLI between runs)
// ---------------------------------------------------------------------------

/// [`MemoryCache`] that can be loaded from and saved to a JSON file.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    inner: MemoryCache,
}

impl JsonFileCache {
    /// Open the cache at `path`. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let data = match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<CacheData>(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryCache {
                data: RwLock::new(data),
            },
        })
    }

    pub fn save(&self) -> Result<(), CacheError> {
        let json = match self.inner.data.read() {
            Ok(d) => serde_json::to_string_pretty(&*d)?,
            Err(_) => return Ok(()),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataCache for JsonFileCache {
    fn cover_urls(&self, site_id: &str) -> Option<Vec<String>> {
        self.inner.cover_urls(site_id)
    }

    fn put_cover_urls(&self, site_id: &str, urls: Vec<String>) {
        self.inner.put_cover_urls(site_id, urls)
    }

    fn isbn_to_site_id(&self, isbn: &str) -> Option<String> {
        self.inner.isbn_to_site_id(isbn)
    }

    fn put_isbn_site_id(&self, isbn: &str, site_id: &str) {
        self.inner.put_isbn_site_id(isbn, site_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn memory_cache_get_put() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.cover_urls("a"), None);
        cache.put_cover_urls("a", vec!["u1".into()]);
        cache.put_cover_urls("a", vec!["u2".into()]);
        assert_eq!(cache.cover_urls("a"), Some(vec!["u2".to_string()]));
        cache.put_isbn_site_id("9780306406157", "a");
        assert_eq!(cache.isbn_to_site_id("9780306406157").as_deref(), Some("a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_writers() {
        let cache = Arc::new(MemoryCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.put_cover_urls(&format!("id-{i}"), vec![format!("url-{i}")]);
                    cache.put_isbn_site_id("shared", &format!("id-{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.cover_urls("id-3"), Some(vec!["url-3".to_string()]));
        assert!(cache.isbn_to_site_id("shared").unwrap().starts_with("id-"));
    }

    #[test]
    fn json_cache_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("cache.json");
        let cache = JsonFileCache::load(&path).unwrap();
        assert_eq!(cache.cover_urls("x"), None);
        cache.put_cover_urls("x", vec!["https://moly.hu/c.jpg".into()]);
        cache.put_isbn_site_id("9780306406157", "x");
        cache.save().unwrap();

        let reloaded = JsonFileCache::load(&path).unwrap();
        assert_eq!(reloaded.cover_urls("x"), Some(vec!["https://moly.hu/c.jpg".to_string()]));
        assert_eq!(reloaded.isbn_to_site_id("9780306406157").as_deref(), Some("x"));
    }

    #[test]
    fn json_cache_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonFileCache::load(&path), Err(CacheError::Malformed(_))));
    }
}
