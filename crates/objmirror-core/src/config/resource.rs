//! Storage resource descriptors
//!
//! A [`Resource`] identifies one storage location together with the filter
//! deciding which objects under it participate in mirroring.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use objmirror_common::{MirrorError, Result};

/// Object filter applied to bucket-relative paths
///
/// `prefix` and `suffix` are plain string checks; `pattern` is a regular
/// expression that must match the entire path. Empty components match
/// everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(skip)]
    compiled: OnceCell<Regex>,
}

impl Filter {
    /// Filter accepting every path
    pub fn any() -> Self {
        Self::default()
    }

    /// Validate the filter, compiling the regex pattern when present
    pub fn validate(&self) -> Result<()> {
        self.regex()?;
        Ok(())
    }

    fn regex(&self) -> Result<Option<&Regex>> {
        let Some(pattern) = &self.pattern else {
            return Ok(None);
        };
        let compiled = self.compiled.get_or_try_init(|| {
            // Anchored so a pattern must describe the whole path.
            Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                MirrorError::config(format!("invalid filter pattern '{}': {}", pattern, e))
            })
        })?;
        Ok(Some(compiled))
    }

    /// Whether a bucket-relative object path passes the filter
    ///
    /// A pattern that failed to compile rejects everything; `validate`
    /// surfaces that error at load time.
    pub fn matches(&self, path: &str) -> bool {
        if !self.prefix.is_empty() && !path.starts_with(&self.prefix) {
            return false;
        }
        if !self.suffix.is_empty() && !path.ends_with(&self.suffix) {
            return false;
        }
        match self.regex() {
            Ok(Some(regex)) => regex.is_match(path),
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

/// A storage location participating in mirroring
///
/// Immutable once loaded; `credentials_ref` is resolved through the secret
/// facade into backend storage options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Scheme-qualified URL, e.g. `mem://bucket/prefix`
    pub url: String,

    /// Opaque reference resolved by the secret facade
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials_ref: String,

    /// Object filter applied to candidates under `url`
    #[serde(default)]
    pub filter: Filter,

    /// Optional storage region hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Resource {
    /// Resource with a URL and an accept-everything filter
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials_ref: String::new(),
            filter: Filter::any(),
            region: None,
        }
    }

    /// Validate the resource URL and filter
    pub fn validate(&self) -> Result<()> {
        if objmirror_common::url::split(&self.url).is_none() {
            return Err(MirrorError::config(format!(
                "resource URL '{}' is not scheme-qualified",
                self.url
            )));
        }
        self.filter.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::any();
        assert!(filter.matches("a/b/c.txt"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_prefix_suffix_filter() {
        let filter = Filter {
            prefix: "incoming/".to_string(),
            suffix: ".json".to_string(),
            ..Filter::any()
        };
        assert!(filter.matches("incoming/batch-1.json"));
        assert!(!filter.matches("outgoing/batch-1.json"));
        assert!(!filter.matches("incoming/batch-1.csv"));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let filter = Filter {
            pattern: Some(r"incoming/\d+\.json".to_string()),
            ..Filter::any()
        };
        assert!(filter.matches("incoming/42.json"));
        assert!(!filter.matches("x/incoming/42.json"));
        assert!(!filter.matches("incoming/42.json.bak"));
    }

    #[test]
    fn test_invalid_pattern_fails_validation() {
        let filter = Filter {
            pattern: Some("(".to_string()),
            ..Filter::any()
        };
        assert!(filter.validate().is_err());
        assert!(!filter.matches("anything"));
    }

    #[test]
    fn test_resource_requires_scheme() {
        assert!(Resource::new("mem://bucket/dir").validate().is_ok());
        assert!(Resource::new("/var/data").validate().is_err());
    }
}
