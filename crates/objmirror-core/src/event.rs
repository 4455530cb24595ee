//! Event entry point
//!
//! The shim invoked per-object by a cloud trigger. Builds a request from the
//! event, runs the mirror, and surfaces only catastrophic failures as
//! errors; terminal per-object outcomes stay on the response. Verbose output
//! is gated on the `LOGGING` environment variable.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

use objmirror_common::logging::is_logging_enabled;
use objmirror_common::{MirrorError, Result};

use crate::response::{Request, Response};
use crate::transfer::MirrorService;

/// An object-appeared event delivered by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub url: String,

    /// Original event metadata, echoed onto notifications and the response
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Event {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attributes: HashMap::new(),
        }
    }
}

/// Handle one event: mirror the object and report the outcome
///
/// Returns an error wrapping the source URL when the response carries one,
/// so the platform's retry machinery sees the failure.
pub async fn handle_event(service: &MirrorService, event: Event) -> Result<Response> {
    info!(url = %event.url, "triggered by object");
    let request = Request::new(&event.url).with_attributes(event.attributes);
    let response = service.mirror(request).await;

    if is_logging_enabled() {
        if let Ok(dump) = serde_json::to_string(&response) {
            info!(
                "mirrored {}: {} in {}ms: {}",
                response.status, event.url, response.time_taken_ms, dump
            );
        }
    }

    if let Some(error) = &response.error {
        return Err(MirrorError::storage(&event.url, error.clone()));
    }
    Ok(response)
}
