use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::chunk::{ChunkAssembler, ChunkLimits, ChunkMeta, ChunkOutcome};
use crate::config::{AssetConfig, StorageConfig, UploadConfig};
use crate::error::UploadError;
use crate::id::IdGenerator;
use crate::ingest::{AcceptPolicy, StoredAsset, Target, place};
use crate::resolve::{AssetLocator, ModuleHint, validate_directory};
use crate::scratch::{FilesystemScratch, ScratchSpace};
use crate::sniff::{self, SNIFF_LEN};
use crate::storage::{BoxReader, ObjectStore, StorageError, open_store};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// A folder in the stored key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryNode {
    pub name: String,
    /// Full key prefix without a trailing slash, e.g. `image/user`.
    pub prefix: String,
    pub children: Vec<DirectoryNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub key: String,
    pub url: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePage {
    pub total: u64,
    pub list: Vec<FileEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub prefix: Option<String>,
    /// Case-insensitive substring of the file name.
    pub keyword: Option<String>,
    /// 1-based.
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Upload, delete and browse operations over one object store.
pub struct AssetService {
    store: Arc<dyn ObjectStore>,
    assembler: Arc<ChunkAssembler>,
    ids: Arc<IdGenerator>,
    locator: AssetLocator,
    blocked_extensions: Vec<String>,
    max_file_size: u64,
    fetch_timeout: Duration,
}

impl AssetService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scratch: Arc<dyn ScratchSpace>,
        ids: Arc<IdGenerator>,
        upload: &UploadConfig,
        assets: &AssetConfig,
    ) -> Self {
        let assembler = Arc::new(ChunkAssembler::new(
            scratch,
            store.clone(),
            ids.clone(),
            ChunkLimits::from(upload),
        ));
        Self {
            store,
            assembler,
            ids,
            locator: AssetLocator::new(&assets.public_prefix, &assets.root),
            blocked_extensions: upload.blocked_extensions.clone(),
            max_file_size: upload.max_file_size,
            fetch_timeout: upload.fetch_timeout(),
        }
    }

    /// Open the configured object store and a filesystem scratch space.
    pub async fn open(
        storage: &StorageConfig,
        upload: &UploadConfig,
        assets: &AssetConfig,
        ids: Arc<IdGenerator>,
    ) -> Result<Self, UploadError> {
        let store = open_store(storage, upload.max_file_size).await?;
        let scratch = Arc::new(FilesystemScratch::new(upload.temp_dir.clone()).await?);
        Ok(Self::new(store, scratch, ids, upload, assets))
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn assembler(&self) -> Arc<ChunkAssembler> {
        self.assembler.clone()
    }

    pub fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    pub fn public_url(&self, key: &str) -> String {
        self.locator.public_url(key)
    }

    /// Build an upload target from the raw `module`, `path` and `accept` fields.
    pub fn target(
        &self,
        module: Option<&str>,
        path: Option<&str>,
        accept: Option<&str>,
    ) -> Result<Target, UploadError> {
        Ok(Target {
            hint: ModuleHint::parse(module, path)?,
            accept: AcceptPolicy::new(&self.blocked_extensions).with_accept(accept)?,
        })
    }

    fn check_size(&self, size: u64) -> Result<(), UploadError> {
        if size > self.max_file_size {
            return Err(UploadError::TooLarge {
                what: "file",
                actual: size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Sniff, resolve and store an in-memory upload.
    pub async fn ingest_bytes(&self, data: &[u8], target: &Target) -> Result<StoredAsset, UploadError> {
        self.check_size(data.len() as u64)?;
        let sniffed =
            sniff::sniff(&data[..data.len().min(SNIFF_LEN)]).ok_or(UploadError::UnknownContent)?;
        let reader: BoxReader = Box::new(std::io::Cursor::new(data.to_vec()));
        place(self.store.as_ref(), &self.ids, target, sniffed, reader).await
    }

    /// Sniff, resolve and store an upload already spooled to disk.
    pub async fn ingest_file(&self, path: &Path, target: &Target) -> Result<StoredAsset, UploadError> {
        self.check_size(tokio::fs::metadata(path).await?.len())?;
        let sniffed = sniff::sniff_path(path)
            .await?
            .ok_or(UploadError::UnknownContent)?;
        let file = tokio::fs::File::open(path).await?;
        let reader: BoxReader = Box::new(tokio::io::BufReader::new(file));
        place(self.store.as_ref(), &self.ids, target, sniffed, reader).await
    }

    /// Download a remote file and store it like a direct upload. Used to
    /// import avatars and covers that live on another host.
    pub async fn ingest_url(&self, url: &str, target: &Target) -> Result<StoredAsset, UploadError> {
        let fetch_err = |source| UploadError::Fetch {
            url: url.to_string(),
            source,
        };
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| UploadError::invalid(format!("Invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UploadError::invalid(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(self.fetch_timeout)
            .build()
            .map_err(fetch_err)?;
        let mut response = client
            .get(parsed)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?;
        if let Some(len) = response.content_length() {
            self.check_size(len)?;
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
            data.extend_from_slice(&chunk);
            self.check_size(data.len() as u64)?;
        }

        let asset = self.ingest_bytes(&data, target).await?;
        info!(url = %url, key = %asset.key, size = data.len(), "Imported remote asset");
        Ok(asset)
    }

    pub async fn accept_chunk(
        &self,
        meta: &ChunkMeta,
        data: &[u8],
        target: &Target,
    ) -> Result<ChunkOutcome, UploadError> {
        self.assembler.accept(meta, data, target).await
    }

    /// Delete the asset a URL or path refers to. Returns the deleted key.
    pub async fn delete(&self, reference: &str) -> Result<String, UploadError> {
        let key = self.locator.normalize(reference)?;
        if !self.store.delete(&key).await? {
            return Err(StorageError::NotFound(key).into());
        }
        info!(key = %key, "Deleted asset");
        Ok(key)
    }

    fn listing_prefix(prefix: Option<&str>) -> Result<String, UploadError> {
        match prefix.map(|p| p.trim().trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(p) => Ok(format!("{}/", validate_directory(p)?)),
            None => Ok(String::new()),
        }
    }

    /// Folder tree below `prefix`.
    pub async fn directories(&self, prefix: Option<&str>) -> Result<Vec<DirectoryNode>, UploadError> {
        let root = Self::listing_prefix(prefix)?;
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut pending = VecDeque::from([root.clone()]);

        while let Some(current) = pending.pop_front() {
            let listing = self.store.list(&current, Some("/")).await?;
            pending.extend(listing.common_prefixes.iter().cloned());
            children.insert(current, listing.common_prefixes);
        }

        Ok(build_tree(&root, &children))
    }

    /// One page of files below `prefix`, newest first.
    pub async fn files(&self, query: &FileQuery) -> Result<FilePage, UploadError> {
        let prefix = Self::listing_prefix(query.prefix.as_deref())?;
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut objects: Vec<_> = self
            .store
            .list(&prefix, None)
            .await?
            .objects
            .into_iter()
            .filter(|o| {
                keyword
                    .as_deref()
                    .is_none_or(|k| file_name(&o.key).to_lowercase().contains(k))
            })
            .collect();
        objects.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });

        let total = objects.len() as u64;
        let offset = usize::try_from((page - 1).saturating_mul(page_size)).unwrap_or(usize::MAX);
        let list = objects
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|o| FileEntry {
                name: file_name(&o.key).to_string(),
                url: self.locator.public_url(&o.key),
                key: o.key,
                size: o.size,
                last_modified: o.last_modified,
            })
            .collect();

        Ok(FilePage { total, list })
    }
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn build_tree(prefix: &str, children: &BTreeMap<String, Vec<String>>) -> Vec<DirectoryNode> {
    children
        .get(prefix)
        .map(|subs| {
            subs.iter()
                .map(|sub| {
                    let trimmed = sub.trim_end_matches('/');
                    DirectoryNode {
                        name: file_name(trimmed).to_string(),
                        prefix: trimmed.to_string(),
                        children: build_tree(sub, children),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolveError;
    use crate::sniff::fixtures::{PNG, jpeg_of_len, mp4};
    use crate::storage::FilesystemObjectStore;

    async fn service() -> (AssetService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FilesystemObjectStore::new(dir.path().join("upload"), 1024 * 1024)
                .await
                .unwrap(),
        );
        let scratch = Arc::new(FilesystemScratch::new(dir.path().join("chunks")).await.unwrap());
        let ids = Arc::new(IdGenerator::new(3, 1).unwrap());
        let upload = UploadConfig {
            max_file_size: 512 * 1024,
            ..Default::default()
        };
        let service = AssetService::new(store, scratch, ids, &upload, &AssetConfig::default());
        (service, dir)
    }

    #[tokio::test]
    async fn sniff_resolve_put_get_round_trip() {
        let (service, _dir) = service().await;
        let target = service.target(Some("user"), None, None).unwrap();

        let asset = service.ingest_bytes(PNG, &target).await.unwrap();
        assert!(asset.key.starts_with("image/user/"));
        assert!(asset.key.ends_with(".png"));
        assert_eq!(service.store().get(&asset.key).await.unwrap(), PNG);
        assert_eq!(
            service.public_url(&asset.key),
            format!("/upload/{}", asset.key)
        );
    }

    #[tokio::test]
    async fn png_named_jpeg_is_stored_as_jpeg() {
        let (service, dir) = service().await;
        let spooled = dir.path().join("photo.png");
        std::fs::write(&spooled, jpeg_of_len(4096)).unwrap();

        let asset = service
            .ingest_file(&spooled, &service.target(None, None, None).unwrap())
            .await
            .unwrap();
        assert!(asset.key.starts_with("image/"));
        assert!(asset.key.ends_with(".jpg"));
        assert_eq!(asset.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn rejects_unknown_blocked_and_oversized_content() {
        let (service, _dir) = service().await;
        let target = service.target(None, None, None).unwrap();

        assert!(matches!(
            service.ingest_bytes(b"plain text", &target).await,
            Err(UploadError::UnknownContent)
        ));
        assert!(matches!(
            service.ingest_bytes(b"MZ\x90\x00\x03", &target).await,
            Err(UploadError::Disallowed(_))
        ));
        assert!(matches!(
            service.ingest_bytes(&jpeg_of_len(600 * 1024), &target).await,
            Err(UploadError::TooLarge { what: "file", .. })
        ));
    }

    #[tokio::test]
    async fn directory_hint_places_under_kind() {
        let (service, _dir) = service().await;
        let target = service.target(Some("article"), Some("covers/2024"), None).unwrap();
        let asset = service.ingest_bytes(&mp4(), &target).await.unwrap();
        assert!(asset.key.starts_with("video/covers/2024/"));

        assert!(matches!(
            service.target(None, Some("../escape"), None),
            Err(UploadError::Resolve(ResolveError::InvalidDirectory(_)))
        ));
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn ingest_url_stores_sniffed_remote_file() {
        let (service, _dir) = service().await;
        let base = serve(
            axum::Router::new()
                .route("/avatar", axum::routing::get(|| async { PNG }))
                .route("/text", axum::routing::get(|| async { "plain text" }))
                .route(
                    "/huge",
                    axum::routing::get(|| async { jpeg_of_len(600 * 1024) }),
                ),
        )
        .await;
        let target = service.target(Some("user"), None, None).unwrap();

        let asset = service
            .ingest_url(&format!("{base}/avatar"), &target)
            .await
            .unwrap();
        assert!(asset.key.starts_with("image/user/"));
        assert!(asset.key.ends_with(".png"));
        assert_eq!(service.store().get(&asset.key).await.unwrap(), PNG);

        assert!(matches!(
            service.ingest_url(&format!("{base}/text"), &target).await,
            Err(UploadError::UnknownContent)
        ));
        assert!(matches!(
            service.ingest_url(&format!("{base}/huge"), &target).await,
            Err(UploadError::TooLarge { what: "file", .. })
        ));
        assert!(matches!(
            service.ingest_url(&format!("{base}/missing"), &target).await,
            Err(UploadError::Fetch { .. })
        ));
        assert!(matches!(
            service.ingest_url("file:///etc/passwd", &target).await,
            Err(UploadError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn delete_normalizes_and_classifies() {
        let (service, _dir) = service().await;
        let asset = service
            .ingest_bytes(PNG, &service.target(None, None, None).unwrap())
            .await
            .unwrap();

        let url = service.public_url(&asset.key);
        assert_eq!(service.delete(&url).await.unwrap(), asset.key);
        assert!(matches!(
            service.delete(&url).await,
            Err(UploadError::Storage(StorageError::NotFound(_)))
        ));
        assert!(matches!(
            service.delete("/upload/../config.toml").await,
            Err(UploadError::Resolve(ResolveError::OutsideRoot(_)))
        ));
    }

    #[tokio::test]
    async fn directories_build_nested_tree() {
        let (service, _dir) = service().await;
        for (module, path) in [(Some("user"), None), (None, Some("covers/2024")), (None, None)] {
            let target = service.target(module, path, None).unwrap();
            service.ingest_bytes(PNG, &target).await.unwrap();
        }

        let tree = service.directories(None).await.unwrap();
        assert_eq!(tree.len(), 1);
        let image = &tree[0];
        assert_eq!(image.prefix, "image");
        let names: Vec<_> = image.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["covers", "user"]);
        assert_eq!(image.children[0].children[0].prefix, "image/covers/2024");

        let sub = service.directories(Some("/image/covers/")).await.unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].name, "2024");
        assert!(service.directories(Some("../")).await.is_err());
    }

    #[tokio::test]
    async fn files_filter_and_paginate() {
        let (service, _dir) = service().await;
        let target = service.target(Some("article"), None, None).unwrap();
        let mut keys = Vec::new();
        for _ in 0..5 {
            keys.push(service.ingest_bytes(PNG, &target).await.unwrap().key);
        }

        let page = service
            .files(&FileQuery {
                prefix: Some("image/article".into()),
                page: Some(2),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.list.len(), 2);
        assert!(page.list.iter().all(|f| f.url.starts_with("/upload/image/article/")));

        let wanted = file_name(&keys[3]).to_string();
        let found = service
            .files(&FileQuery {
                keyword: Some(wanted.to_uppercase()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.list[0].key, keys[3]);
    }

    #[tokio::test]
    async fn files_page_past_the_end_is_empty() {
        let (service, _dir) = service().await;
        service
            .ingest_bytes(PNG, &service.target(None, None, None).unwrap())
            .await
            .unwrap();

        let page = service
            .files(&FileQuery {
                page: Some(u64::MAX),
                page_size: Some(MAX_PAGE_SIZE),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.list.is_empty());
    }
}
