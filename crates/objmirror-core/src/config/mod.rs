//! Service configuration
//!
//! The `CONFIG` environment variable names the URL of a JSON configuration
//! blob, loaded through the storage facade. Its `Mirrors` section is either
//! an inline rule array or an object pointing at a directory of rule files;
//! `MetaURL` and `TimeWindow` configure the periodic scanner.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use objmirror_common::{url, MirrorError, Result};

pub mod resource;
pub mod rule;
pub mod ruleset;
pub mod watch;

pub use resource::{Filter, Resource};
pub use rule::{
    Action, ActionKind, Compression, FieldKind, RecordCodec, Rule, Schema, SchemaField,
    SplitConfig,
};
pub use ruleset::RuleSet;

/// Environment variable naming the configuration URL
pub const CONFIG_ENV_KEY: &str = "CONFIG";

/// Default rule-store check interval (one minute)
pub const DEFAULT_CHECK_IN_MS: u64 = 60_000;

fn default_check_in_ms() -> u64 {
    DEFAULT_CHECK_IN_MS
}

/// Rule-store section: a base URL of rule files plus optional seed rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetSection {
    #[serde(rename = "BaseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(rename = "CheckInMs", default = "default_check_in_ms")]
    pub check_in_ms: u64,

    #[serde(rename = "Rules", default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

/// The `Mirrors` section: either an inline rule list or a rule store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MirrorsSection {
    Rules(Vec<Rule>),
    Set(RuleSetSection),
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Mirrors")]
    pub mirrors: MirrorsSection,

    /// Ledger location; required in scan mode only
    #[serde(rename = "MetaURL", default, skip_serializing_if = "Option::is_none")]
    pub meta_url: Option<String>,

    /// Scan lookback window in seconds; required in scan mode only
    #[serde(rename = "TimeWindow", default, skip_serializing_if = "Option::is_none")]
    pub time_window_secs: Option<u64>,

    /// Source scheme for trigger dispatch; defaults to the `MetaURL` scheme
    #[serde(rename = "SourceScheme", default, skip_serializing_if = "Option::is_none")]
    pub source_scheme: Option<String>,
}

impl Config {
    /// Load the configuration from the URL in `CONFIG`
    pub async fn from_env(storage: &crate::storage::StorageRegistry) -> Result<Self> {
        let config_url = std::env::var(CONFIG_ENV_KEY).map_err(|_| {
            MirrorError::config(format!("{} environment variable is not set", CONFIG_ENV_KEY))
        })?;
        Self::from_url(storage, &config_url).await
    }

    /// Load and validate the configuration blob at a URL
    pub async fn from_url(
        storage: &crate::storage::StorageRegistry,
        config_url: &str,
    ) -> Result<Self> {
        let data = storage.download(config_url).await.map_err(|e| {
            MirrorError::config(format!("failed to load config '{}': {}", config_url, e))
        })?;
        let config: Config = serde_json::from_slice(&data).map_err(|e| {
            MirrorError::config(format!("failed to decode config '{}': {}", config_url, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration's structural invariants
    pub fn validate(&self) -> Result<()> {
        let section = self.rule_set();
        for rule in &section.rules {
            rule.validate()?;
        }
        if let Some(base) = &section.base_url {
            if url::split(base).is_none() {
                return Err(MirrorError::config(format!(
                    "BaseURL '{}' is not scheme-qualified",
                    base
                )));
            }
        }
        if let Some(meta) = &self.meta_url {
            if url::split(meta).is_none() {
                return Err(MirrorError::config(format!(
                    "MetaURL '{}' is not scheme-qualified",
                    meta
                )));
            }
        }
        if self.time_window_secs == Some(0) {
            return Err(MirrorError::config("TimeWindow must be nonzero"));
        }
        Ok(())
    }

    /// The `Mirrors` section, normalized to a rule-store shape
    pub fn rule_set(&self) -> RuleSetSection {
        match &self.mirrors {
            MirrorsSection::Set(section) => section.clone(),
            MirrorsSection::Rules(rules) => RuleSetSection {
                base_url: None,
                check_in_ms: DEFAULT_CHECK_IN_MS,
                rules: rules.clone(),
            },
        }
    }

    /// The scheme driving cron trigger dispatch
    pub fn source_scheme(&self) -> Option<String> {
        if let Some(scheme) = &self.source_scheme {
            return Some(scheme.clone());
        }
        self.meta_url
            .as_deref()
            .and_then(url::scheme)
            .map(String::from)
    }

    /// The scan lookback window
    pub fn time_window(&self) -> Option<Duration> {
        self.time_window_secs.map(Duration::from_secs)
    }
}
