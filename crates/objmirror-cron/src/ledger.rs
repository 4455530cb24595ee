//! Processed-object ledger
//!
//! A persistent set of fingerprints derived from `(url, mtime, size)`,
//! stored as newline-delimited JSON records grouped into time-window files
//! (`window-<index>.jsonl`) under the ledger's meta URL. Window files older
//! than twice the time window are pruned on write; objects falling out of
//! retention are considered new again, a documented limitation.
//!
//! Writes are read-modify-write on the current window file. The coordinator
//! is the single writer per meta URL; readers tolerate duplicate
//! fingerprints and truncated trailing lines left by a cancelled write.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use objmirror_common::{url, Result};
use objmirror_core::storage::{ListOptions, ObjectInfo, StorageRegistry};

/// One processed-object record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
}

/// File-backed set of processed-object fingerprints
pub struct Ledger {
    meta_url: String,
    window_secs: i64,
    storage: Arc<StorageRegistry>,
}

impl Ledger {
    pub fn new(
        meta_url: impl Into<String>,
        time_window: Duration,
        storage: Arc<StorageRegistry>,
    ) -> Self {
        Self {
            meta_url: meta_url.into(),
            window_secs: (time_window.as_secs() as i64).max(1),
            storage,
        }
    }

    /// Stable fingerprint of an object's URL, modification time and size
    pub fn fingerprint(object: &ObjectInfo) -> String {
        let mut hasher = Sha256::new();
        hasher.update(object.url.as_bytes());
        hasher.update(b"|");
        hasher.update(object.modified.timestamp().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(object.size.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn window_index(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.window_secs)
    }

    fn window_url(&self, index: i64) -> String {
        url::join(&self.meta_url, &format!("window-{}.jsonl", index))
    }

    async fn load_window(&self, index: i64) -> Result<Vec<LedgerEntry>> {
        let window_url = self.window_url(index);
        let data = match self.storage.download(&window_url).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut entries = Vec::new();
        for line in data.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<LedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A cancelled write may leave a truncated trailing line.
                Err(err) => warn!(window = %window_url, error = %err, "skipping ledger line"),
            }
        }
        Ok(entries)
    }

    /// Every fingerprint within the retention horizon
    pub async fn fingerprints_within_retention(&self) -> Result<HashSet<String>> {
        let current = self.window_index(Utc::now());
        let mut fingerprints = HashSet::new();
        for index in (current - 2)..=current {
            for entry in self.load_window(index).await? {
                fingerprints.insert(entry.fingerprint);
            }
        }
        Ok(fingerprints)
    }

    /// The subset of `objects` not yet fingerprinted within retention
    pub async fn pending(&self, objects: &[ObjectInfo]) -> Result<Vec<ObjectInfo>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let processed = self.fingerprints_within_retention().await?;
        Ok(objects
            .iter()
            .filter(|object| !processed.contains(&Self::fingerprint(object)))
            .cloned()
            .collect())
    }

    /// Append fingerprints for processed objects to the current window file
    /// and prune windows past the retention horizon
    pub async fn add_processed(&self, objects: &[ObjectInfo]) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let current = self.window_index(now);
        let mut entries = self.load_window(current).await?;
        let mut known: HashSet<String> =
            entries.iter().map(|e| e.fingerprint.clone()).collect();
        for object in objects {
            let fingerprint = Self::fingerprint(object);
            if known.insert(fingerprint.clone()) {
                entries.push(LedgerEntry {
                    fingerprint,
                    first_seen: now,
                });
            }
        }
        let mut data = Vec::new();
        for entry in &entries {
            data.extend(serde_json::to_vec(entry)?);
            data.push(b'\n');
        }
        self.storage.upload(&self.window_url(current), data).await?;
        debug!(window = current, entries = entries.len(), "ledger window updated");
        self.prune(current).await
    }

    /// Delete window files older than the retention horizon (2× window)
    async fn prune(&self, current: i64) -> Result<()> {
        let entries = match self.storage.list(&self.meta_url, &ListOptions::default()).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let Some(index) = entry
                .name
                .strip_prefix("window-")
                .and_then(|rest| rest.strip_suffix(".jsonl"))
                .and_then(|digits| digits.parse::<i64>().ok())
            else {
                continue;
            };
            if index < current - 2 {
                debug!(window = index, "pruning expired ledger window");
                self.storage.delete(&entry.url).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(target: &str, size: u64) -> ObjectInfo {
        ObjectInfo {
            url: target.to_string(),
            name: url::file_name(target).to_string(),
            is_dir: false,
            size,
            modified: Utc::now(),
            checksum: None,
        }
    }

    fn ledger(storage: &Arc<StorageRegistry>, window: Duration) -> Ledger {
        Ledger::new("mem://meta/ledger", window, storage.clone())
    }

    #[tokio::test]
    async fn test_pending_shrinks_after_add_processed() {
        let storage = Arc::new(StorageRegistry::with_defaults());
        let ledger = ledger(&storage, Duration::from_secs(3600));
        let objects = vec![object("mem://src/a", 1), object("mem://src/b", 2)];

        let pending = ledger.pending(&objects).await.unwrap();
        assert_eq!(pending.len(), 2);

        ledger.add_processed(&objects[..1]).await.unwrap();
        let pending = ledger.pending(&objects).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "mem://src/b");
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_mtime_and_size() {
        let a = object("mem://src/a", 1);
        let mut b = a.clone();
        assert_eq!(Ledger::fingerprint(&a), Ledger::fingerprint(&b));
        b.size = 2;
        assert_ne!(Ledger::fingerprint(&a), Ledger::fingerprint(&b));
    }

    #[tokio::test]
    async fn test_add_processed_is_idempotent() {
        let storage = Arc::new(StorageRegistry::with_defaults());
        let ledger = ledger(&storage, Duration::from_secs(3600));
        let objects = vec![object("mem://src/a", 1)];

        ledger.add_processed(&objects).await.unwrap();
        ledger.add_processed(&objects).await.unwrap();

        let fingerprints = ledger.fingerprints_within_retention().await.unwrap();
        assert_eq!(fingerprints.len(), 1);
    }

    #[tokio::test]
    async fn test_tolerates_truncated_trailing_line() {
        let storage = Arc::new(StorageRegistry::with_defaults());
        let ledger = ledger(&storage, Duration::from_secs(3600));
        let objects = vec![object("mem://src/a", 1)];
        ledger.add_processed(&objects).await.unwrap();

        let current = ledger.window_index(Utc::now());
        let window_url = ledger.window_url(current);
        let mut data = storage.download(&window_url).await.unwrap();
        data.extend(b"{\"fingerprint\":\"trunc");
        storage.upload(&window_url, data).await.unwrap();

        let fingerprints = ledger.fingerprints_within_retention().await.unwrap();
        assert_eq!(fingerprints.len(), 1);
    }

    #[tokio::test]
    async fn test_prunes_expired_windows() {
        let storage = Arc::new(StorageRegistry::with_defaults());
        let ledger = ledger(&storage, Duration::from_secs(3600));
        let current = ledger.window_index(Utc::now());

        let stale_url = ledger.window_url(current - 5);
        storage.upload(&stale_url, b"{}\n".to_vec()).await.unwrap();
        let live_url = ledger.window_url(current - 1);
        storage.upload(&live_url, b"\n".to_vec()).await.unwrap();

        ledger
            .add_processed(&[object("mem://src/a", 1)])
            .await
            .unwrap();

        assert!(!storage.exists(&stale_url).await.unwrap());
        assert!(storage.exists(&live_url).await.unwrap());
    }
}
