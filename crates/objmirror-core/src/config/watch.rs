//! Rule-store change detection
//!
//! Polling-based: a fingerprint of all rule files under the base URL
//! (latest modification time, file count, size sum) is compared against the
//! cached value, rate-limited by the configured check interval. The first
//! call primes the cache and reports no change.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use objmirror_common::Result;

use crate::storage::{ListOptions, ObjectInfo, StorageRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct DirMeta {
    latest_modified: Option<DateTime<Utc>>,
    file_count: usize,
    size_sum: u64,
}

impl DirMeta {
    fn of(files: &[ObjectInfo]) -> Self {
        Self {
            latest_modified: files.iter().map(|f| f.modified).max(),
            file_count: files.len(),
            size_sum: files.iter().map(|f| f.size).sum(),
        }
    }
}

/// Watches the rule files under a base URL for changes
#[derive(Debug)]
pub struct ChangeWatcher {
    base_url: String,
    check_interval: Duration,
    last_checked: Option<Instant>,
    meta: Option<DirMeta>,
}

impl ChangeWatcher {
    pub fn new(base_url: impl Into<String>, check_interval: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            check_interval,
            last_checked: None,
            meta: None,
        }
    }

    /// The `*.json` rule files directly under a base URL
    ///
    /// A missing base is an empty rule store, not an error; it may appear
    /// later.
    pub async fn rule_files(
        storage: &StorageRegistry,
        base_url: &str,
    ) -> Result<Vec<ObjectInfo>> {
        let entries = match storage.list(base_url, &ListOptions::default()).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir && e.name.ends_with(".json"))
            .collect())
    }

    /// Whether the rule store changed since the last observation
    pub async fn has_changed(&mut self, storage: &StorageRegistry) -> Result<bool> {
        if let Some(last) = self.last_checked {
            if last.elapsed() < self.check_interval {
                return Ok(false);
            }
        }
        self.last_checked = Some(Instant::now());

        let files = Self::rule_files(storage, &self.base_url).await?;
        let meta = DirMeta::of(&files);
        match &self.meta {
            Some(previous) if *previous == meta => Ok(false),
            Some(_) => {
                self.meta = Some(meta);
                Ok(true)
            }
            None => {
                self.meta = Some(meta);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StorageRegistry {
        StorageRegistry::with_defaults()
    }

    async fn put(registry: &StorageRegistry, url: &str, data: &[u8]) {
        registry.upload(url, data.to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_call_primes() {
        let registry = registry();
        put(&registry, "mem://rules/a.json", b"[]").await;
        let mut watcher = ChangeWatcher::new("mem://rules", Duration::ZERO);
        assert!(!watcher.has_changed(&registry).await.unwrap());
        assert!(!watcher.has_changed(&registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_detects_new_and_grown_files() {
        let registry = registry();
        put(&registry, "mem://rules/a.json", b"[]").await;
        let mut watcher = ChangeWatcher::new("mem://rules", Duration::ZERO);
        watcher.has_changed(&registry).await.unwrap();

        put(&registry, "mem://rules/b.json", b"[]").await;
        assert!(watcher.has_changed(&registry).await.unwrap());
        assert!(!watcher.has_changed(&registry).await.unwrap());

        put(&registry, "mem://rules/b.json", b"[{}]").await;
        assert!(watcher.has_changed(&registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_ignores_non_json_files() {
        let registry = registry();
        let mut watcher = ChangeWatcher::new("mem://rules", Duration::ZERO);
        watcher.has_changed(&registry).await.unwrap();
        put(&registry, "mem://rules/readme.txt", b"ignored").await;
        assert!(!watcher.has_changed(&registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_limited_by_interval() {
        let registry = registry();
        let mut watcher = ChangeWatcher::new("mem://rules", Duration::from_secs(3600));
        watcher.has_changed(&registry).await.unwrap();
        put(&registry, "mem://rules/a.json", b"[]").await;
        // Within the interval the watcher does not even look.
        assert!(!watcher.has_changed(&registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_base_is_empty() {
        let registry = registry();
        let mut watcher = ChangeWatcher::new("mem://rules", Duration::ZERO);
        assert!(!watcher.has_changed(&registry).await.unwrap());
    }
}
