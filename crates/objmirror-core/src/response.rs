//! Request/response contract
//!
//! A [`Request`] carries the triggering object URL and its event metadata;
//! a [`Response`] aggregates per-object outcomes. Worker tasks mutate one
//! shared response concurrently, so every mutation goes through
//! [`SharedResponse`], which takes a scoped lock. Reads are valid once all
//! workers for the request have quiesced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Rule;

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_NOOP: &str = "noop";

/// One mirroring request
#[derive(Debug, Clone)]
pub struct Request {
    pub source_url: String,
    pub attributes: HashMap<String, String>,
}

impl Request {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Aggregated outcome of processing one request
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: String,
    pub triggered_by: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub destination_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<String>,
    pub time_taken_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
    pub total_rules: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub triggered: HashMap<String, String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub checksum_skip: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub moved: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub copied: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub invoked: HashMap<String, String>,
}

impl Response {
    fn new(triggered_by: &str, triggered: HashMap<String, String>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            triggered_by: triggered_by.to_string(),
            file_size: 0,
            destination_urls: Vec::new(),
            message_ids: Vec::new(),
            time_taken_ms: 0,
            rule: None,
            total_rules: 0,
            error: None,
            schema_error: None,
            not_found_error: None,
            start_time: Utc::now(),
            triggered,
            checksum_skip: false,
            moved: HashMap::new(),
            copied: HashMap::new(),
            invoked: HashMap::new(),
        }
    }
}

/// Concurrency-safe accumulator over one [`Response`]
#[derive(Clone)]
pub struct SharedResponse {
    inner: Arc<Mutex<Response>>,
}

impl SharedResponse {
    pub fn new(request: &Request) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Response::new(
                &request.source_url,
                request.attributes.clone(),
            ))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Response> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_url(&self, destination: &str) {
        self.lock().destination_urls.push(destination.to_string());
    }

    pub fn add_message_id(&self, id: &str) {
        self.lock().message_ids.push(id.to_string());
    }

    pub fn add_moved(&self, source: &str, destination: &str) {
        self.lock()
            .moved
            .insert(source.to_string(), destination.to_string());
    }

    pub fn add_copied(&self, source: &str, destination: &str) {
        self.lock()
            .copied
            .insert(source.to_string(), destination.to_string());
    }

    pub fn add_invoked(&self, source: &str, message_id: &str) {
        self.lock()
            .invoked
            .insert(source.to_string(), message_id.to_string());
    }

    /// Record an error, joining it onto any previous one
    pub fn set_error(&self, message: &str) {
        let mut guard = self.lock();
        guard.error = match guard.error.take() {
            Some(existing) => Some(format!("{}; {}", existing, message)),
            None => Some(message.to_string()),
        };
    }

    pub fn set_schema_error(&self, message: &str) {
        let mut guard = self.lock();
        guard.schema_error = Some(message.to_string());
    }

    pub fn set_not_found(&self, source_url: &str) {
        let mut guard = self.lock();
        guard.not_found_error = Some(format!("{} no longer exists", source_url));
        guard.status = STATUS_NOOP.to_string();
    }

    pub fn set_noop(&self) {
        self.lock().status = STATUS_NOOP.to_string();
    }

    pub fn mark_checksum_skip(&self) {
        self.lock().checksum_skip = true;
    }

    pub fn set_file_size(&self, size: u64) {
        self.lock().file_size = size;
    }

    pub fn set_rule(&self, rule: Rule) {
        self.lock().rule = Some(rule);
    }

    pub fn set_total_rules(&self, total: usize) {
        self.lock().total_rules = total;
    }

    /// Snapshot the response, computing elapsed time and the final status
    ///
    /// Valid once every worker for the request has quiesced.
    pub fn finalize(&self) -> Response {
        let mut response = self.lock().clone();
        let elapsed = Utc::now().signed_duration_since(response.start_time);
        response.time_taken_ms = elapsed.num_milliseconds().max(0) as u64;
        if response.error.is_some() || response.schema_error.is_some() {
            response.status = STATUS_ERROR.to_string();
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_ok() {
        let response = SharedResponse::new(&Request::new("mem://src/a")).finalize();
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.triggered_by, "mem://src/a");
    }

    #[test]
    fn test_errors_join_and_flip_status() {
        let shared = SharedResponse::new(&Request::new("mem://src/a"));
        shared.add_url("mem://dst/a");
        shared.set_error("first");
        shared.set_error("second");
        let response = shared.finalize();
        assert_eq!(response.status, STATUS_ERROR);
        assert_eq!(response.error.as_deref(), Some("first; second"));
        assert_eq!(response.destination_urls, vec!["mem://dst/a"]);
    }

    #[test]
    fn test_not_found_is_noop() {
        let shared = SharedResponse::new(&Request::new("mem://src/a"));
        shared.set_not_found("mem://src/a");
        let response = shared.finalize();
        assert_eq!(response.status, STATUS_NOOP);
        assert!(response.not_found_error.is_some());
    }

    #[test]
    fn test_concurrent_mutation() {
        let shared = SharedResponse::new(&Request::new("mem://src/a"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        shared.add_url(&format!("mem://dst/{}-{}", i, j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.finalize().destination_urls.len(), 800);
    }

    #[test]
    fn test_request_attributes_echoed() {
        let request = Request::new("mem://src/a")
            .with_attributes(HashMap::from([("event".to_string(), "put".to_string())]));
        let response = SharedResponse::new(&request).finalize();
        assert_eq!(response.triggered.get("event"), Some(&"put".to_string()));
    }
}
