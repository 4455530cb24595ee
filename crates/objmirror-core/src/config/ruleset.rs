//! Rule set with atomic snapshots and reload-if-changed
//!
//! Readers hold an `Arc` to an immutable rule vector; a reload publishes a
//! complete replacement snapshot by swapping the `Arc`, so a reader observes
//! either the old or the new set, never a mix. A failed reload keeps the old
//! snapshot active and surfaces the error.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use objmirror_common::{MirrorError, Result};

use super::rule::{parse_rules, Rule};
use super::watch::ChangeWatcher;
use super::RuleSetSection;
use crate::storage::StorageRegistry;

type Snapshot = Arc<Vec<Rule>>;

/// The active mirroring rules
pub struct RuleSet {
    initial_rules: Vec<Rule>,
    base_url: Option<String>,
    snapshot: RwLock<Snapshot>,
    watcher: Option<Mutex<ChangeWatcher>>,
}

fn read_lock(lock: &RwLock<Snapshot>) -> RwLockReadGuard<'_, Snapshot> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock(lock: &RwLock<Snapshot>) -> RwLockWriteGuard<'_, Snapshot> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RuleSet {
    /// Load the seed rules, prime the change watcher, and read the rule
    /// store once
    pub async fn init(section: RuleSetSection, storage: &StorageRegistry) -> Result<Self> {
        for rule in &section.rules {
            rule.validate()?;
        }
        let watcher = section.base_url.as_ref().map(|base| {
            Mutex::new(ChangeWatcher::new(
                base.clone(),
                Duration::from_millis(section.check_in_ms),
            ))
        });
        let set = Self {
            initial_rules: section.rules.clone(),
            base_url: section.base_url,
            snapshot: RwLock::new(Arc::new(section.rules)),
            watcher,
        };
        if let Some(watcher) = &set.watcher {
            watcher.lock().await.has_changed(storage).await?;
        }
        let snapshot = set.load_snapshot(storage).await?;
        *write_lock(&set.snapshot) = Arc::new(snapshot);
        Ok(set)
    }

    /// Atomic snapshot of the current rules
    pub fn current(&self) -> Snapshot {
        read_lock(&self.snapshot).clone()
    }

    /// Reload the snapshot when the rule store changed
    ///
    /// Returns whether a new snapshot was published. Decode errors reject
    /// the reload; the previous snapshot stays active.
    pub async fn reload_if_needed(&self, storage: &StorageRegistry) -> Result<bool> {
        let Some(watcher) = &self.watcher else {
            return Ok(false);
        };
        let changed = watcher.lock().await.has_changed(storage).await?;
        if !changed {
            return Ok(false);
        }
        let snapshot = self.load_snapshot(storage).await?;
        debug!(rules = snapshot.len(), "rule set reloaded");
        *write_lock(&self.snapshot) = Arc::new(snapshot);
        Ok(true)
    }

    /// Seed rules followed by every decoded rule file under the base URL
    async fn load_snapshot(&self, storage: &StorageRegistry) -> Result<Vec<Rule>> {
        let mut rules = self.initial_rules.clone();
        if let Some(base) = &self.base_url {
            for file in ChangeWatcher::rule_files(storage, base).await? {
                let data = storage.download(&file.url).await?;
                let decoded = parse_rules(&data).map_err(|e| {
                    MirrorError::config(format!("failed to decode '{}': {}", file.url, e))
                })?;
                rules.extend(decoded);
            }
        }
        Ok(rules)
    }
}
