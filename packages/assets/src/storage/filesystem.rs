use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::traits::{BoxReader, Listing, ObjectEntry, ObjectHead, ObjectStore};
use crate::sniff;

const TEMP_DIR: &str = ".tmp";
/// Attempts to move a finished temp file into place. A concurrent delete may
/// prune the parent directory between `create_dir_all` and `rename`.
const PLACE_ATTEMPTS: usize = 5;

/// Filesystem-backed object store.
///
/// Objects live at `{base_path}/{key}`. Writes go to `{base_path}/.tmp` first
/// and are renamed into place, so readers never observe a partial object.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemObjectStore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(TEMP_DIR)).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to its path, refusing anything that would escape the base.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let key = key.trim_start_matches('/');
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            if segment.is_empty()
                || segment == ".."
                || segment.starts_with('.')
                || segment.contains('\\')
                || segment.contains('\0')
            {
                return Err(StorageError::Permission(format!("invalid object key: {key}")));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(TEMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Rename `temp_path` to `object_path`, recreating parents that a
    /// concurrent prune removed underneath us.
    async fn place(&self, temp_path: &Path, object_path: &Path) -> std::io::Result<()> {
        let mut attempt = 1;
        loop {
            let result = match object_path.parent() {
                Some(parent) => fs::create_dir_all(parent).await,
                None => Ok(()),
            };
            let result = match result {
                Ok(()) => fs::rename(temp_path, object_path).await,
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt < PLACE_ATTEMPTS => {
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    /// Remove directories left empty by a delete, stopping at the base.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn not_found_or(err: std::io::Error, key: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        err.into()
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put_stream(
        &self,
        key: &str,
        mut reader: BoxReader,
        _content_type: &str,
    ) -> Result<u64, StorageError> {
        let object_path = self.object_path(key)?;
        let temp_path = self.temp_path();
        let mut total_bytes: u64 = 0;

        let mut buf = vec![0u8; 64 * 1024];
        let mut temp_file = fs::File::create(&temp_path).await?;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            temp_file.write_all(&buf[..n]).await?;
        }

        temp_file.flush().await?;
        drop(temp_file);

        if let Err(e) = self.place(&temp_path, &object_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(total_bytes)
    }

    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let path = self.object_path(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) => Err(not_found_or(e, key)),
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectHead, StorageError> {
        let path = self.object_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| not_found_or(e, key))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let modified = meta.modified().ok();
        let etag = modified
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| format!("{:x}-{:x}", meta.len(), d.as_nanos()));
        let content_type = sniff::sniff_path(&path)
            .await?
            .map(|s| s.mime.to_string());

        Ok(ObjectHead {
            key: key.trim_start_matches('/').to_string(),
            size: meta.len(),
            content_type,
            etag,
            last_modified: modified.map(DateTime::<Utc>::from),
        })
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing, StorageError> {
        let prefix = prefix.trim_start_matches('/');
        let delimiter = delimiter.filter(|d| !d.is_empty());
        let start = match prefix.rfind('/') {
            Some(pos) => self.object_path(&prefix[..pos])?,
            None => self.base_path.clone(),
        };

        let mut objects = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    let dir_key = format!("{key}/");
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() || !key.starts_with(prefix) {
                    continue;
                }

                let rest = &key[prefix.len()..];
                if let Some(d) = delimiter
                    && let Some(pos) = rest.find(d)
                {
                    common_prefixes.insert(format!("{prefix}{}", &rest[..pos + d.len()]));
                    continue;
                }

                let meta = entry.metadata().await?;
                objects.push(ObjectEntry {
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Listing {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
