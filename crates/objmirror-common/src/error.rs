//! Error types for objmirror
//!
//! All errors carry enough context (URL, rule identifier) to diagnose a
//! failed transfer from the log line alone.

use thiserror::Error;

/// Result type alias for objmirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for objmirror
#[derive(Error, Debug)]
pub enum MirrorError {
    /// File system or network I/O failed
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("Failed to process JSON data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is missing or invalid. Fatal on startup, non-fatal on
    /// rule reload (the previous snapshot stays active).
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A URL references a storage scheme with no registered backend
    #[error("Unsupported storage scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { scheme: String, url: String },

    /// Source object vanished between the event and the fetch
    #[error("Object not found: {url}")]
    NotFound { url: String },

    /// Storage backend operation failed
    #[error("Storage operation on '{url}' failed: {reason}")]
    Storage { url: String, reason: String },

    /// Payload failed a codec or schema check
    #[error("Schema violation in '{url}': {reason}")]
    Schema { url: String, reason: String },

    /// Codec stage failed to encode or decode a payload
    #[error("Codec failure: {reason}")]
    Codec { reason: String },

    /// Destination template could not be resolved to a concrete URL
    #[error("Invalid destination template '{template}': {reason}")]
    Template { template: String, reason: String },

    /// Publishing a notification message failed
    #[error("Notification to '{target}' failed: {reason}")]
    Notification { target: String, reason: String },
}

impl MirrorError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unsupported-scheme error
    pub fn unsupported_scheme(scheme: impl Into<String>, url: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
            url: url.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Create a storage error
    pub fn storage(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema error
    pub fn schema(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a codec error
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Create a template error
    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Create a notification error
    pub fn notification(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Notification {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error represents a missing source object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error represents a schema/codec payload violation
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }
}
