//! In-memory storage backend
//!
//! Backs `mem://` URLs. Used by the test suite and by local trigger
//! dispatch; objects live in a process-wide map owned by the store instance.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;

use objmirror_common::{checksum, url, MirrorError, Result};

use super::{ListOptions, ObjectInfo, ObjectReader, ObjectStore, ObjectWriter};

#[derive(Debug, Clone)]
struct MemObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
    checksum: String,
}

type ObjectMap = HashMap<String, MemObject>;

/// In-memory object store
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    objects: Arc<Mutex<ObjectMap>>,
}

fn lock(objects: &Mutex<ObjectMap>) -> MutexGuard<'_, ObjectMap> {
    match objects.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn file_info(target: &str, object: &MemObject) -> ObjectInfo {
    ObjectInfo {
        url: target.to_string(),
        name: url::file_name(target).to_string(),
        is_dir: false,
        size: object.data.len() as u64,
        modified: object.modified,
        checksum: Some(object.checksum.clone()),
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, target: &str, data: Vec<u8>) {
        let object = MemObject {
            checksum: checksum::sha256_hex(&data),
            modified: Utc::now(),
            data,
        };
        lock(&self.objects).insert(target.trim_end_matches('/').to_string(), object);
    }

    fn get(&self, target: &str) -> Option<MemObject> {
        lock(&self.objects).get(target).cloned()
    }

    fn has_children(&self, base: &str) -> bool {
        let prefix = format!("{}/", base.trim_end_matches('/'));
        lock(&self.objects).keys().any(|k| k.starts_with(&prefix))
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn exists(&self, target: &str) -> Result<bool> {
        Ok(self.get(target).is_some() || self.has_children(target))
    }

    async fn metadata(&self, target: &str) -> Result<ObjectInfo> {
        if let Some(object) = self.get(target) {
            return Ok(file_info(target, &object));
        }
        if self.has_children(target) {
            return Ok(ObjectInfo {
                url: target.trim_end_matches('/').to_string(),
                name: url::file_name(target).to_string(),
                is_dir: true,
                size: 0,
                modified: Utc::now(),
                checksum: None,
            });
        }
        Err(MirrorError::not_found(target))
    }

    async fn list(&self, target: &str, options: &ListOptions) -> Result<Vec<ObjectInfo>> {
        let base = target.trim_end_matches('/').to_string();
        let prefix = format!("{}/", base);
        let mut files = Vec::new();
        let mut dirs: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        {
            let guard = lock(&self.objects);
            for (key, object) in guard.iter() {
                let Some(remainder) = key.strip_prefix(&prefix) else {
                    continue;
                };
                match remainder.split_once('/') {
                    None => files.push(file_info(key, object)),
                    Some((dir, _)) => {
                        let entry = dirs.entry(dir.to_string()).or_insert(object.modified);
                        if object.modified > *entry {
                            *entry = object.modified;
                        }
                    }
                }
            }
        }
        let mut entries: Vec<ObjectInfo> = dirs
            .into_iter()
            .map(|(dir, modified)| ObjectInfo {
                url: format!("{}/{}", base, dir),
                name: dir,
                is_dir: true,
                size: 0,
                modified,
                checksum: None,
            })
            .collect();
        entries.extend(files);
        entries.retain(|info| options.accepts(info));
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(entries)
    }

    async fn download(&self, target: &str) -> Result<Vec<u8>> {
        self.get(target)
            .map(|object| object.data)
            .ok_or_else(|| MirrorError::not_found(target))
    }

    async fn reader(&self, target: &str) -> Result<ObjectReader> {
        let data = self.download(target).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn upload(&self, target: &str, data: Vec<u8>) -> Result<()> {
        self.insert(target, data);
        Ok(())
    }

    async fn writer(&self, target: &str) -> Result<ObjectWriter> {
        Ok(Box::new(MemWriter {
            store: self.clone(),
            target: target.to_string(),
            buffer: Vec::new(),
            committed: false,
        }))
    }

    async fn delete(&self, target: &str) -> Result<()> {
        match lock(&self.objects).remove(target) {
            Some(_) => Ok(()),
            None => Err(MirrorError::not_found(target)),
        }
    }

    async fn copy(&self, source: &str, dest: &str) -> Result<()> {
        let data = self.download(source).await?;
        self.insert(dest, data);
        Ok(())
    }
}

/// Buffering writer; the object appears in the store on shutdown
struct MemWriter {
    store: MemStore,
    target: String,
    buffer: Vec<u8>,
    committed: bool,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if !self.committed {
            let data = std::mem::take(&mut self.buffer);
            let target = self.target.clone();
            self.store.insert(&target, data);
            self.committed = true;
        }
        Poll::Ready(Ok(()))
    }
}
