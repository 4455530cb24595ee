//! Scan coordinator
//!
//! One tick: reload rules if their store changed, list every rule's source
//! within the time window, drop candidates already in the ledger, dispatch
//! the rest through the bounded worker pool, and fingerprint the successes.
//! Failed objects are not fingerprinted, so the next tick retries them; the
//! executor's overwrite semantics make that safe.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use objmirror_common::logging::is_logging_enabled;
use objmirror_common::{MirrorError, Result};
use objmirror_core::notify::Notifier;
use objmirror_core::storage::{ListOptions, ObjectInfo, StorageRegistry};
use objmirror_core::{Config, MirrorService, Rule};

use crate::ledger::Ledger;
use crate::pool::dispatch_all;
use crate::trigger::{Trigger, TriggerRegistry};

/// Fixed worker-pool size per tick
pub const WORKER_LIMIT: usize = 50;

/// Per-rule tick outcome
#[derive(Debug, Clone, Serialize)]
pub struct RuleMatches {
    pub rule: String,
    pub urls: Vec<String>,
}

/// Aggregated tick outcome
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub status: String,
    pub matched: Vec<RuleMatches>,
}

impl TickReport {
    fn new() -> Self {
        Self {
            status: "ok".to_string(),
            matched: Vec::new(),
        }
    }

    /// Total number of objects processed this tick
    pub fn processed(&self) -> usize {
        self.matched.iter().map(|m| m.urls.len()).sum()
    }
}

/// The periodic-scan coordinator
pub struct CronService {
    mirror: MirrorService,
    storage: Arc<StorageRegistry>,
    ledger: Ledger,
    trigger: Arc<dyn Trigger>,
    time_window: Duration,
}

impl CronService {
    /// Build the coordinator with the default trigger registry
    pub async fn new(
        config: &Config,
        storage: Arc<StorageRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Self::with_triggers(config, storage, notifier, &TriggerRegistry::with_defaults()).await
    }

    /// Build the coordinator, selecting the trigger by source scheme
    pub async fn with_triggers(
        config: &Config,
        storage: Arc<StorageRegistry>,
        notifier: Arc<dyn Notifier>,
        triggers: &TriggerRegistry,
    ) -> Result<Self> {
        let meta_url = config
            .meta_url
            .clone()
            .ok_or_else(|| MirrorError::config("MetaURL is required in scan mode"))?;
        let time_window = config
            .time_window()
            .ok_or_else(|| MirrorError::config("TimeWindow is required in scan mode"))?;
        let scheme = config
            .source_scheme()
            .ok_or_else(|| MirrorError::config("SourceScheme could not be determined"))?;

        let mirror = MirrorService::new(config, storage.clone(), notifier).await?;
        let trigger = triggers.create(&scheme, mirror.clone())?;
        let ledger = Ledger::new(&meta_url, time_window, storage.clone());
        Ok(Self {
            mirror,
            storage,
            ledger,
            trigger,
            time_window,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one scan cycle
    pub async fn tick(&self) -> Result<TickReport> {
        let (report, error) = self.run_tick().await;
        self.report_matched(&report, error.as_ref());
        match error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Run one scan cycle under a caller-supplied deadline
    pub async fn tick_with_deadline(&self, deadline: Duration) -> Result<TickReport> {
        match timeout(deadline, self.tick()).await {
            Ok(result) => result,
            Err(_) => Err(MirrorError::config(format!(
                "tick exceeded its {}s deadline",
                deadline.as_secs()
            ))),
        }
    }

    async fn run_tick(&self) -> (TickReport, Option<MirrorError>) {
        let mut report = TickReport::new();

        if let Err(err) = self.mirror.reload_if_needed().await {
            report.status = "error".to_string();
            return (report, Some(err));
        }

        let snapshot = self.mirror.rules();
        // An object listed via overlapping rules is processed per-rule but
        // fingerprinted once per tick.
        let mut fingerprinted: HashSet<String> = HashSet::new();
        for rule in snapshot.iter() {
            match self.process_rule(rule, &mut fingerprinted).await {
                Ok(Some(matches)) => report.matched.push(matches),
                Ok(None) => {}
                Err(err) => {
                    report.status = "error".to_string();
                    return (report, Some(err));
                }
            }
        }
        (report, None)
    }

    async fn process_rule(
        &self,
        rule: &Rule,
        fingerprinted: &mut HashSet<String>,
    ) -> Result<Option<RuleMatches>> {
        let candidates = self.list_candidates(rule).await?;
        let pending = self.ledger.pending(&candidates).await?;
        if pending.is_empty() {
            return Ok(None);
        }
        debug!(rule = %rule.id(), pending = pending.len(), "dispatching pending objects");

        let (succeeded, error) = dispatch_all(
            self.trigger.clone(),
            Arc::new(rule.clone()),
            pending,
            WORKER_LIMIT,
        )
        .await;

        let fresh: Vec<ObjectInfo> = succeeded
            .iter()
            .filter(|object| fingerprinted.insert(Ledger::fingerprint(object)))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            self.ledger.add_processed(&fresh).await?;
        }

        let matches = RuleMatches {
            rule: rule.id(),
            urls: succeeded.into_iter().map(|o| o.url).collect(),
        };
        match error {
            Some(err) => Err(err),
            None => Ok(Some(matches)),
        }
    }

    /// Recursively list objects under the rule's source that fall inside
    /// the time window and pass the rule filter. Directory entries are
    /// treated uniformly: never emitted, always recursed into.
    async fn list_candidates(&self, rule: &Rule) -> Result<Vec<ObjectInfo>> {
        let window = chrono::Duration::from_std(self.time_window)
            .map_err(|e| MirrorError::config(format!("TimeWindow out of range: {}", e)))?;
        let options = ListOptions {
            modified_after: Some(Utc::now() - window),
        };
        let mut result = Vec::new();
        let mut stack = vec![rule.source.url.clone()];
        while let Some(base) = stack.pop() {
            let entries = match self.storage.list(&base, &options).await {
                Ok(entries) => entries,
                // A source that does not exist yet simply has no candidates.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            for entry in entries {
                if entry.is_dir {
                    stack.push(entry.url);
                } else if rule.matches(&entry.url) {
                    result.push(entry);
                }
            }
        }
        Ok(result)
    }

    fn report_matched(&self, report: &TickReport, error: Option<&MirrorError>) {
        if !is_logging_enabled() {
            return;
        }
        if let Ok(json) = serde_json::to_string(report) {
            info!("{}", json);
        }
        if let Some(err) = error {
            info!(error = %err, "tick failed");
        }
    }
}
