//! Local filesystem backend
//!
//! Backs `file://` URLs. URLs map to absolute paths: both `file:///var/x`
//! and `file://var/x` resolve to `/var/x`. The backend reports no content
//! checksum; features that need one (checksum skip) disable themselves.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use objmirror_common::{url, MirrorError, Result};

use super::{ListOptions, ObjectInfo, ObjectReader, ObjectStore, ObjectWriter};

/// Local filesystem object store
#[derive(Debug, Clone, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }
}

fn fs_path(target: &str) -> Result<PathBuf> {
    let parts = url::split(target)
        .ok_or_else(|| MirrorError::config(format!("'{}' is not a valid URL", target)))?;
    if parts.scheme != "file" {
        return Err(MirrorError::unsupported_scheme(parts.scheme, target));
    }
    let mut path = PathBuf::from("/");
    if !parts.authority.is_empty() {
        path.push(parts.authority);
    }
    if !parts.path.is_empty() {
        path.push(parts.path);
    }
    Ok(path)
}

fn url_for(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn map_io(target: &str, err: std::io::Error) -> MirrorError {
    if err.kind() == std::io::ErrorKind::NotFound {
        MirrorError::not_found(target)
    } else {
        MirrorError::Io(err)
    }
}

fn info_from(target: &str, meta: &std::fs::Metadata) -> ObjectInfo {
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    ObjectInfo {
        url: target.trim_end_matches('/').to_string(),
        name: url::file_name(target).to_string(),
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified,
        checksum: None,
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn exists(&self, target: &str) -> Result<bool> {
        let path = fs_path(target)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn metadata(&self, target: &str) -> Result<ObjectInfo> {
        let path = fs_path(target)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(target, e))?;
        Ok(info_from(target, &meta))
    }

    async fn list(&self, target: &str, options: &ListOptions) -> Result<Vec<ObjectInfo>> {
        let path = fs_path(target)?;
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| map_io(target, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            let info = info_from(&url_for(&entry.path()), &meta);
            if options.accepts(&info) {
                entries.push(info);
            }
        }
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(entries)
    }

    async fn download(&self, target: &str) -> Result<Vec<u8>> {
        let path = fs_path(target)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(target, e))
    }

    async fn reader(&self, target: &str) -> Result<ObjectReader> {
        let path = fs_path(target)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(target, e))?;
        Ok(Box::new(file))
    }

    async fn upload(&self, target: &str, data: Vec<u8>) -> Result<()> {
        let path = fs_path(target)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn writer(&self, target: &str) -> Result<ObjectWriter> {
        let path = fs_path(target)?;
        ensure_parent(&path).await?;
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(file))
    }

    async fn delete(&self, target: &str) -> Result<()> {
        let path = fs_path(target)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_io(target, e))
    }

    async fn copy(&self, source: &str, dest: &str) -> Result<()> {
        let from = fs_path(source)?;
        let to = fs_path(dest)?;
        ensure_parent(&to).await?;
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| map_io(source, e))?;
        Ok(())
    }
}
