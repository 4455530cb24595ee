//! Mirroring rules
//!
//! A [`Rule`] binds a source resource to one or more destinations plus the
//! transform directives (compression, record codec, split policy, move flag,
//! schema) applied during the transfer.

use serde::{Deserialize, Serialize};

use objmirror_common::{url, MirrorError, Result};

use super::resource::Resource;
use crate::notify::NotificationTarget;
use crate::split::SplitPolicy;
use crate::template;

/// Default threshold above which transfers must stream (8 MiB)
pub const DEFAULT_STREAM_THRESHOLD_BYTES: u64 = 8 * 1024 * 1024;

/// Default number of partition parts uploaded concurrently
pub const DEFAULT_PART_FAN_OUT: usize = 4;

fn default_stream_threshold() -> u64 {
    DEFAULT_STREAM_THRESHOLD_BYTES
}

fn default_part_fan_out() -> usize {
    DEFAULT_PART_FAN_OUT
}

/// Payload compression applied on write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Lz4,
}

impl Compression {
    /// File-name suffix produced by this compression, without the dot
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Lz4 => Some("lz4"),
        }
    }

    /// Compression inferred from a file name's final extension
    pub fn from_file_name(name: &str) -> Self {
        match url::extension(name) {
            Some("gz") => Compression::Gzip,
            Some("lz4") => Compression::Lz4,
            _ => Compression::None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Compression::None
    }
}

/// Record-oriented payload transform
///
/// The set is an extensible registry keyed by these names; `schema-coerce`
/// rewrites NDJSON records against the rule's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordCodec {
    #[default]
    Passthrough,
    NdjsonToCsv,
    CsvToNdjson,
    SchemaCoerce,
}

impl RecordCodec {
    pub fn is_passthrough(self) -> bool {
        self == RecordCodec::Passthrough
    }
}

/// Split directive partitioning one source object into several destinations
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Records per part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,

    /// Part flush threshold in bytes, applied at record boundaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl SplitConfig {
    /// The concrete split policy, once validated
    pub fn policy(&self) -> Option<SplitPolicy> {
        match (self.lines, self.bytes) {
            (Some(n), None) => Some(SplitPolicy::Lines(n)),
            (None, Some(b)) => Some(SplitPolicy::Bytes(b)),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.lines, self.bytes) {
            (Some(0), _) | (_, Some(0)) => {
                Err(MirrorError::config("split sizes must be nonzero"))
            }
            (Some(_), Some(_)) => Err(MirrorError::config(
                "split accepts either 'lines' or 'bytes', not both",
            )),
            (None, None) => Err(MirrorError::config(
                "split requires one of 'lines' or 'bytes'",
            )),
            _ => Ok(()),
        }
    }
}

/// Field type in a record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

/// One named, typed field of a record schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

/// Record schema used for validation and coercion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: Vec<SchemaField>,
}

impl Schema {
    fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(MirrorError::config("schema must declare at least one field"));
        }
        Ok(())
    }
}

/// Post-mirror action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Remove the source object
    Delete,
    /// Relocate the source object under the action's target base URL
    Move,
}

/// Action applied to the source object after a rule completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action: ActionKind,

    /// Target base URL for `move` actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Action {
    fn validate(&self) -> Result<()> {
        match self.action {
            ActionKind::Move => match &self.url {
                Some(target) if url::split(target).is_some() => Ok(()),
                _ => Err(MirrorError::config(
                    "move action requires a scheme-qualified target url",
                )),
            },
            ActionKind::Delete => Ok(()),
        }
    }
}

/// One mirroring directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Optional identifier used in logs and notification payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub source: Resource,

    /// Single destination; alternative to `destinations`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Resource>,

    /// Destination list; alternative to `destination`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Resource>,

    /// URL pattern with `$name`, `$ext`, `$timestamp`, `$date`, `$mod{n}`
    /// and `$uuid` substitution tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_template: Option<String>,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub codec: RecordCodec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitConfig>,

    /// Delete the source after every destination succeeded
    #[serde(default, rename = "move")]
    pub move_source: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationTarget>,

    /// Skip the transfer when the destination already holds a byte-identical
    /// object (by storage checksum)
    #[serde(default)]
    pub checksum_skip: bool,

    #[serde(default = "default_stream_threshold")]
    pub stream_threshold_bytes: u64,

    /// Concurrent part uploads for partitioned transfers
    #[serde(default = "default_part_fan_out")]
    pub part_fan_out: usize,

    /// Actions applied to the source after the rule succeeds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,

    /// Actions applied to the source after the rule fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl Rule {
    /// Identifier used in logs, responses and notification payloads
    pub fn id(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match self.destination_resources().first() {
            Some(dest) => format!("{} -> {}", self.source.url, dest.url),
            None => self.source.url.clone(),
        }
    }

    /// All destination resources, regardless of spelling
    pub fn destination_resources(&self) -> Vec<&Resource> {
        let mut result: Vec<&Resource> = Vec::new();
        if let Some(dest) = &self.destination {
            result.push(dest);
        }
        result.extend(self.destinations.iter());
        result
    }

    /// The concrete split policy, when a split directive is present
    pub fn split_policy(&self) -> Option<SplitPolicy> {
        self.split.as_ref().and_then(SplitConfig::policy)
    }

    /// Whether the transfer must decode the payload into records
    pub fn needs_records(&self) -> bool {
        !self.codec.is_passthrough() || self.schema.is_some() || self.split.is_some()
    }

    /// Success actions, with the `move` flag desugared to a delete
    pub fn success_actions(&self) -> Vec<Action> {
        let mut actions = self.on_success.clone();
        if self.move_source {
            actions.push(Action {
                action: ActionKind::Delete,
                url: None,
            });
        }
        actions
    }

    /// Whether `url` is an object this rule applies to
    ///
    /// The URL must lie under the rule's source root and its bucket-relative
    /// path must pass the source filter. Malformed URLs match nothing.
    pub fn matches(&self, target: &str) -> bool {
        let Some(parts) = url::split(target) else {
            return false;
        };
        if parts.path.is_empty() {
            return false;
        }
        url::is_under(&self.source.url, target) && self.source.filter.matches(parts.path)
    }

    /// Validate the rule's structural invariants
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        let destinations = self.destination_resources();
        if destinations.is_empty() {
            return Err(MirrorError::config(format!(
                "rule '{}' declares no destination",
                self.id()
            )));
        }
        for dest in &destinations {
            dest.validate()?;
        }
        if let Some(split) = &self.split {
            split.validate()?;
            match &self.destination_template {
                Some(t) if template::has_part_token(t) => {}
                _ => {
                    return Err(MirrorError::config(format!(
                        "rule '{}' splits but its destination_template has no $mod{{n}} token",
                        self.id()
                    )));
                }
            }
        }
        if let Some(t) = &self.destination_template {
            template::validate(t)?;
            if self.split.is_none() && template::has_part_token(t) {
                return Err(MirrorError::config(format!(
                    "rule '{}' uses $mod{{n}} without a split directive",
                    self.id()
                )));
            }
            if destinations.len() > 1 {
                return Err(MirrorError::config(format!(
                    "rule '{}' combines a destination_template with multiple destinations",
                    self.id()
                )));
            }
        }
        if let Some(schema) = &self.schema {
            schema.validate()?;
            if matches!(self.split_policy(), Some(SplitPolicy::Bytes(_))) {
                return Err(MirrorError::config(format!(
                    "rule '{}' combines a schema with a byte-size split; records must stay parseable",
                    self.id()
                )));
            }
        }
        if self.codec == RecordCodec::SchemaCoerce {
            if self.schema.is_none() {
                return Err(MirrorError::config(format!(
                    "rule '{}' uses the schema-coerce codec without a schema",
                    self.id()
                )));
            }
            if matches!(self.split_policy(), Some(SplitPolicy::Bytes(_))) {
                return Err(MirrorError::config(format!(
                    "rule '{}' combines schema-coerce with a byte-size split",
                    self.id()
                )));
            }
        }
        if self.stream_threshold_bytes == 0 {
            return Err(MirrorError::config(format!(
                "rule '{}' sets stream_threshold_bytes to zero",
                self.id()
            )));
        }
        if self.part_fan_out == 0 {
            return Err(MirrorError::config(format!(
                "rule '{}' sets part_fan_out to zero",
                self.id()
            )));
        }
        for action in self.on_success.iter().chain(self.on_failure.iter()) {
            action.validate()?;
        }
        Ok(())
    }

    /// Resources referenced by the rule, source first
    pub fn resources(&self) -> Vec<&Resource> {
        let mut result = vec![&self.source];
        result.extend(self.destination_resources());
        result
    }
}

impl Rule {
    /// Plain source-to-destination rule with no transforms
    pub fn simple(source_url: impl Into<String>, dest_url: impl Into<String>) -> Self {
        Self {
            name: None,
            source: Resource::new(source_url),
            destination: Some(Resource::new(dest_url)),
            destinations: Vec::new(),
            destination_template: None,
            compression: Compression::None,
            codec: RecordCodec::Passthrough,
            split: None,
            move_source: false,
            schema: None,
            notification: None,
            checksum_skip: false,
            stream_threshold_bytes: DEFAULT_STREAM_THRESHOLD_BYTES,
            part_fan_out: DEFAULT_PART_FAN_OUT,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }
}

/// Parse one rule file payload: a JSON array of rules
pub fn parse_rules(data: &[u8]) -> Result<Vec<Rule>> {
    let rules: Vec<Rule> = serde_json::from_slice(data)?;
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}
