//! Secret facade
//!
//! Resolves a resource's `credentials_ref` into the storage options a cloud
//! backend needs. References are either environment variable names or URLs
//! of JSON credential objects. Options are cached per resource for the life
//! of a rule snapshot; a reload re-materializes everything.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use objmirror_common::{MirrorError, Result};

use crate::config::Resource;
use crate::storage::StorageRegistry;

/// Credential material handed to a storage backend
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub values: HashMap<String, String>,
}

/// Materializes and caches storage credentials per resource
#[derive(Debug, Default)]
pub struct SecretService {
    cache: RwLock<HashMap<String, StorageOptions>>,
}

impl SecretService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-materialize credentials for every resource of a fresh snapshot
    pub async fn init(
        &self,
        storage: &StorageRegistry,
        resources: &[&Resource],
    ) -> Result<()> {
        let mut cache = HashMap::new();
        for resource in resources {
            let options = Self::materialize(storage, resource).await?;
            cache.insert(resource.url.clone(), options);
        }
        debug!(resources = cache.len(), "storage credentials materialized");
        *self.cache.write().await = cache;
        Ok(())
    }

    /// The storage options bound to a resource's credentials reference
    pub async fn storage_options(
        &self,
        storage: &StorageRegistry,
        resource: &Resource,
    ) -> Result<StorageOptions> {
        if let Some(options) = self.cache.read().await.get(&resource.url) {
            return Ok(options.clone());
        }
        let options = Self::materialize(storage, resource).await?;
        self.cache
            .write()
            .await
            .insert(resource.url.clone(), options.clone());
        Ok(options)
    }

    async fn materialize(
        storage: &StorageRegistry,
        resource: &Resource,
    ) -> Result<StorageOptions> {
        let reference = resource.credentials_ref.as_str();
        if reference.is_empty() {
            return Ok(StorageOptions::default());
        }
        if reference.contains("://") {
            let data = storage.download(reference).await.map_err(|e| {
                MirrorError::config(format!(
                    "failed to load credentials '{}' for '{}': {}",
                    reference, resource.url, e
                ))
            })?;
            let values: HashMap<String, String> = serde_json::from_slice(&data).map_err(|e| {
                MirrorError::config(format!(
                    "credentials '{}' are not a JSON string map: {}",
                    reference, e
                ))
            })?;
            return Ok(StorageOptions { values });
        }
        match std::env::var(reference) {
            Ok(value) => Ok(StorageOptions {
                values: HashMap::from([("token".to_string(), value)]),
            }),
            Err(_) => Err(MirrorError::config(format!(
                "credentials reference '{}' for '{}' is not set in the environment",
                reference, resource.url
            ))),
        }
    }
}
