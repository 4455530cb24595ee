//! Storage facade
//!
//! Uniform read/write/list/delete across URL schemes. The in-tree backends
//! cover `mem://` (tests, local triggers) and `file://`; cloud backends are
//! external collaborators registered onto the [`StorageRegistry`] by the
//! embedding application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use objmirror_common::{url, MirrorError, Result};

mod file;
mod mem;

pub use file::FileStore;
pub use mem::MemStore;

/// Metadata of one stored object (or directory entry)
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Full scheme-qualified URL
    pub url: String,
    /// Final path segment
    pub name: String,
    /// Whether this entry is a directory / common prefix
    pub is_dir: bool,
    /// Object size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Backend-provided content checksum, when available
    pub checksum: Option<String>,
}

/// Listing options
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Retain only objects modified at or after this instant. Directory
    /// entries always pass so callers can keep recursing; their own
    /// timestamps are unreliable across backends.
    pub modified_after: Option<DateTime<Utc>>,
}

impl ListOptions {
    pub(crate) fn accepts(&self, info: &ObjectInfo) -> bool {
        if info.is_dir {
            return true;
        }
        match self.modified_after {
            Some(after) => info.modified >= after,
            None => true,
        }
    }
}

/// Streaming reader handle
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming writer handle; content becomes visible on shutdown
pub type ObjectWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One storage backend, addressed by URL scheme
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object (or a directory of objects) exists at the URL
    async fn exists(&self, target: &str) -> Result<bool>;

    /// Metadata of the object at the URL; `MirrorError::NotFound` when absent
    async fn metadata(&self, target: &str) -> Result<ObjectInfo>;

    /// Direct children of the URL, directories included
    async fn list(&self, target: &str, options: &ListOptions) -> Result<Vec<ObjectInfo>>;

    /// Full object contents, buffered
    async fn download(&self, target: &str) -> Result<Vec<u8>>;

    /// Streaming reader over the object contents
    async fn reader(&self, target: &str) -> Result<ObjectReader>;

    /// Replace the object with the given contents
    async fn upload(&self, target: &str, data: Vec<u8>) -> Result<()>;

    /// Streaming writer; the object appears once the writer is shut down
    async fn writer(&self, target: &str) -> Result<ObjectWriter>;

    /// Remove the object; `MirrorError::NotFound` when absent
    async fn delete(&self, target: &str) -> Result<()>;

    /// Server-side copy within this backend
    async fn copy(&self, source: &str, dest: &str) -> Result<()>;
}

/// Scheme-keyed dispatch over the registered storage backends
#[derive(Clone)]
pub struct StorageRegistry {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StorageRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
        }
    }

    /// Registry with the in-tree `mem://` and `file://` backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mem", Arc::new(MemStore::new()));
        registry.register("file", Arc::new(FileStore::new()));
        registry
    }

    /// Register a backend for a URL scheme
    pub fn register(&mut self, scheme: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.stores.insert(scheme.into(), store);
    }

    /// The backend serving a URL; unknown schemes are a configuration error
    pub fn store_for(&self, target: &str) -> Result<Arc<dyn ObjectStore>> {
        let scheme = url::scheme(target)
            .ok_or_else(|| MirrorError::config(format!("'{}' is not a valid URL", target)))?;
        self.stores
            .get(scheme)
            .cloned()
            .ok_or_else(|| MirrorError::unsupported_scheme(scheme, target))
    }

    /// Whether two URLs resolve to the same backend
    pub fn same_backend(&self, a: &str, b: &str) -> bool {
        match (url::scheme(a), url::scheme(b)) {
            (Some(sa), Some(sb)) => sa == sb && self.stores.contains_key(sa),
            _ => false,
        }
    }

    pub async fn exists(&self, target: &str) -> Result<bool> {
        self.store_for(target)?.exists(target).await
    }

    pub async fn metadata(&self, target: &str) -> Result<ObjectInfo> {
        self.store_for(target)?.metadata(target).await
    }

    pub async fn list(&self, target: &str, options: &ListOptions) -> Result<Vec<ObjectInfo>> {
        self.store_for(target)?.list(target, options).await
    }

    pub async fn download(&self, target: &str) -> Result<Vec<u8>> {
        self.store_for(target)?.download(target).await
    }

    pub async fn reader(&self, target: &str) -> Result<ObjectReader> {
        self.store_for(target)?.reader(target).await
    }

    pub async fn upload(&self, target: &str, data: Vec<u8>) -> Result<()> {
        self.store_for(target)?.upload(target, data).await
    }

    pub async fn writer(&self, target: &str) -> Result<ObjectWriter> {
        self.store_for(target)?.writer(target).await
    }

    pub async fn delete(&self, target: &str) -> Result<()> {
        self.store_for(target)?.delete(target).await
    }

    pub async fn copy(&self, source: &str, dest: &str) -> Result<()> {
        self.store_for(source)?.copy(source, dest).await
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
