//! Trigger dispatch
//!
//! The coordinator hands pending objects to a [`Trigger`], selected by the
//! configured source scheme from a `{scheme → factory}` registry. The
//! in-tree triggers invoke the executor in-process; cloud schemes register
//! their own implementations (function invocation, queue publish) from the
//! embedding application. Unknown schemes are a configuration error at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use objmirror_common::{MirrorError, Result};
use objmirror_core::response::Request;
use objmirror_core::storage::ObjectInfo;
use objmirror_core::{MirrorService, Rule};

/// Dispatches one pending object for processing
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn dispatch(&self, rule: &Rule, object: &ObjectInfo) -> Result<()>;
}

/// In-process trigger: runs the mirroring executor directly
pub struct LocalTrigger {
    service: MirrorService,
}

impl LocalTrigger {
    pub fn new(service: MirrorService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Trigger for LocalTrigger {
    async fn dispatch(&self, rule: &Rule, object: &ObjectInfo) -> Result<()> {
        debug!(rule = %rule.id(), url = %object.url, "dispatching");
        let response = self.service.mirror(Request::new(&object.url)).await;
        if let Some(error) = response.error {
            return Err(MirrorError::storage(&object.url, error));
        }
        if let Some(error) = response.schema_error {
            return Err(MirrorError::schema(&object.url, error));
        }
        Ok(())
    }
}

type TriggerFactory = Arc<dyn Fn(MirrorService) -> Arc<dyn Trigger> + Send + Sync>;

/// Scheme-keyed registry of trigger factories
#[derive(Clone)]
pub struct TriggerRegistry {
    factories: HashMap<String, TriggerFactory>,
}

impl TriggerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the in-process trigger bound to `mem` and `file`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let local: TriggerFactory =
            Arc::new(|service| Arc::new(LocalTrigger::new(service)) as Arc<dyn Trigger>);
        registry.factories.insert("mem".to_string(), local.clone());
        registry.factories.insert("file".to_string(), local);
        registry
    }

    /// Register a factory for a URL scheme
    pub fn register(
        &mut self,
        scheme: impl Into<String>,
        factory: impl Fn(MirrorService) -> Arc<dyn Trigger> + Send + Sync + 'static,
    ) {
        self.factories.insert(scheme.into(), Arc::new(factory));
    }

    /// Instantiate the trigger for a source scheme
    pub fn create(&self, scheme: &str, service: MirrorService) -> Result<Arc<dyn Trigger>> {
        match self.factories.get(scheme) {
            Some(factory) => Ok(factory(service)),
            None => Err(MirrorError::config(format!(
                "unsupported source scheme: {}",
                scheme
            ))),
        }
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
