//! Chunk sessions and the merge engine.
//!
//! A session is keyed by the client-supplied name. Each chunk is staged as
//! `{hash}-{index}`; once every index in `1..=total` is present the entries
//! are concatenated in index order, verified, sniffed and handed to the
//! object store. The session is deleted afterwards whatever the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::digest::{Md5Digest, Md5Hasher};
use crate::error::UploadError;
use crate::id::IdGenerator;
use crate::ingest::{StoredAsset, Target, place};
use crate::resolve::validate_session_name;
use crate::scratch::ScratchSpace;
use crate::sniff;
use crate::storage::ObjectStore;

/// Scratch entry holding the concatenated output.
pub const MERGED_ENTRY: &str = "merged";

/// Declared properties of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub name: String,
    /// 1-based position of this chunk.
    pub index: u32,
    pub total: u32,
    pub hash: Md5Digest,
    /// Digest of the whole file, checked after merging when present.
    pub file_hash: Option<Md5Digest>,
}

impl ChunkMeta {
    /// Parse the raw form fields of a chunk request.
    pub fn parse(
        name: Option<&str>,
        index: Option<&str>,
        total: Option<&str>,
        hash: Option<&str>,
        file_hash: Option<&str>,
    ) -> Result<Self, UploadError> {
        let name = name.ok_or_else(|| UploadError::invalid("Missing 'name' field"))?;
        let name = validate_session_name(name)?.to_string();

        let index = parse_count(index, "chunk")?;
        let total = parse_count(total, "chunks")?;

        let hash = hash
            .ok_or_else(|| UploadError::invalid("Missing 'hash' field"))?
            .parse()
            .map_err(|e| UploadError::invalid(format!("Invalid 'hash' field: {e}")))?;
        let file_hash = match file_hash.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e| UploadError::invalid(format!("Invalid 'file_hash' field: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            name,
            index,
            total,
            hash,
            file_hash,
        })
    }

    fn entry_name(&self) -> String {
        format!("{}-{}", self.hash, self.index)
    }
}

fn parse_count(raw: Option<&str>, field: &str) -> Result<u32, UploadError> {
    raw.ok_or_else(|| UploadError::invalid(format!("Missing '{field}' field")))?
        .trim()
        .parse()
        .map_err(|_| UploadError::invalid(format!("'{field}' must be a positive integer")))
}

/// Split a staged entry name into its hash and index.
fn parse_entry(entry: &str) -> Option<(&str, u32)> {
    let (hash, index) = entry.rsplit_once('-')?;
    Some((hash, index.parse().ok()?))
}

/// Result of accepting one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Staged; more chunks are needed.
    Progress { received: u32, total: u32 },
    /// An identical chunk was already staged. Nothing changed.
    Duplicate { received: u32, total: u32 },
    /// Every chunk arrived and the merged file was stored.
    Complete(StoredAsset),
}

/// Limits applied to chunk sessions.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    pub max_chunk_size: u64,
    pub max_chunks: u32,
    pub max_file_size: u64,
}

impl From<&UploadConfig> for ChunkLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            max_chunks: config.max_chunks,
            max_file_size: config.max_file_size,
        }
    }
}

/// Owns a session's scratch directory until it is released.
///
/// Dropping an unreleased guard schedules the removal on the current tokio
/// runtime, which covers cancelled requests.
pub struct StagingGuard {
    scratch: Arc<dyn ScratchSpace>,
    session: String,
    released: bool,
}

impl StagingGuard {
    pub fn new(scratch: Arc<dyn ScratchSpace>, session: impl Into<String>) -> Self {
        Self {
            scratch,
            session: session.into(),
            released: false,
        }
    }

    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        self.scratch.remove_session(&self.session).await
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.session, "No runtime to remove abandoned chunk session");
            return;
        };
        let scratch = self.scratch.clone();
        let session = std::mem::take(&mut self.session);
        handle.spawn(async move {
            if let Err(e) = scratch.remove_session(&session).await {
                warn!(session = %session, error = %e, "Failed to remove abandoned chunk session");
            }
        });
    }
}

/// Stages chunks and merges completed sessions into the object store.
pub struct ChunkAssembler {
    scratch: Arc<dyn ScratchSpace>,
    store: Arc<dyn ObjectStore>,
    ids: Arc<IdGenerator>,
    limits: ChunkLimits,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ChunkAssembler {
    pub fn new(
        scratch: Arc<dyn ScratchSpace>,
        store: Arc<dyn ObjectStore>,
        ids: Arc<IdGenerator>,
        limits: ChunkLimits,
    ) -> Self {
        Self {
            scratch,
            store,
            ids,
            limits,
            locks: DashMap::new(),
        }
    }

    fn validate(&self, meta: &ChunkMeta, len: u64) -> Result<(), UploadError> {
        if meta.total == 0 {
            return Err(UploadError::invalid("'chunks' must be at least 1"));
        }
        if meta.index == 0 || meta.index > meta.total {
            return Err(UploadError::invalid(format!(
                "chunk index {} is outside 1..={}",
                meta.index, meta.total
            )));
        }
        if meta.total > self.limits.max_chunks {
            return Err(UploadError::invalid(format!(
                "too many chunks: {} (max {})",
                meta.total, self.limits.max_chunks
            )));
        }
        if len > self.limits.max_chunk_size {
            return Err(UploadError::TooLarge {
                what: "chunk",
                actual: len,
                limit: self.limits.max_chunk_size,
            });
        }
        Ok(())
    }

    /// Accept one chunk. Chunks of the same session are processed one at a time.
    pub async fn accept(
        &self,
        meta: &ChunkMeta,
        data: &[u8],
        target: &Target,
    ) -> Result<ChunkOutcome, UploadError> {
        self.validate(meta, data.len() as u64)?;

        let actual = Md5Digest::compute(data);
        if actual != meta.hash {
            return Err(UploadError::ChecksumMismatch {
                expected: meta.hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let lock = self.locks.entry(meta.name.clone()).or_default().clone();
        let _session = lock.lock().await;
        let result = self.accept_locked(meta, data, target).await;
        // Drop the map entry unless another request is already waiting on it.
        self.locks
            .remove_if(&meta.name, |_, m| Arc::strong_count(m) <= 2);
        result
    }

    async fn accept_locked(
        &self,
        meta: &ChunkMeta,
        data: &[u8],
        target: &Target,
    ) -> Result<ChunkOutcome, UploadError> {
        let name = meta.name.as_str();
        let entry = meta.entry_name();
        let mut staged = self.staged(name).await?;

        if let Some(index) = staged.keys().copied().find(|i| *i > meta.total) {
            return Err(UploadError::invalid(format!(
                "session {name} already holds chunk {index}, beyond the declared {} chunks",
                meta.total
            )));
        }

        if staged.get(&meta.index) == Some(&entry) {
            debug!(session = name, index = meta.index, "Duplicate chunk");
            return Ok(ChunkOutcome::Duplicate {
                received: staged.len() as u32,
                total: meta.total,
            });
        }

        if let Some(previous) = staged.remove(&meta.index) {
            self.scratch.remove(name, &previous).await?;
        }
        self.scratch.stage(name, &entry, data).await?;
        staged.insert(meta.index, entry);

        let received = staged.len() as u32;
        if received < meta.total {
            debug!(session = name, index = meta.index, received, total = meta.total, "Chunk staged");
            return Ok(ChunkOutcome::Progress {
                received,
                total: meta.total,
            });
        }

        let guard = StagingGuard::new(self.scratch.clone(), name);
        let merged = self.merge(meta, &staged, target).await;
        if let Err(e) = guard.release().await {
            warn!(session = name, error = %e, "Failed to remove chunk session");
        }

        match &merged {
            Ok(asset) => info!(session = name, key = %asset.key, chunks = meta.total, "Chunk session merged"),
            Err(e) => warn!(session = name, error = %e, "Chunk session failed"),
        }
        merged.map(ChunkOutcome::Complete)
    }

    /// Staged entries keyed by index. Entries that do not parse are ignored.
    async fn staged(&self, name: &str) -> Result<BTreeMap<u32, String>, UploadError> {
        let mut staged = BTreeMap::new();
        for entry in self.scratch.entries(name).await? {
            if let Some((_, index)) = parse_entry(&entry) {
                staged.insert(index, entry);
            }
        }
        Ok(staged)
    }

    async fn merge(
        &self,
        meta: &ChunkMeta,
        staged: &BTreeMap<u32, String>,
        target: &Target,
    ) -> Result<StoredAsset, UploadError> {
        let name = meta.name.as_str();
        self.scratch.remove(name, MERGED_ENTRY).await?;

        let mut expected_len = 0u64;
        let mut merged_len = 0u64;
        for entry in staged.values() {
            expected_len += self.scratch.size(name, entry).await?;
            if expected_len > self.limits.max_file_size {
                return Err(UploadError::TooLarge {
                    what: "file",
                    actual: expected_len,
                    limit: self.limits.max_file_size,
                });
            }
            merged_len += self.scratch.append(name, MERGED_ENTRY, entry).await?;
        }

        if merged_len != expected_len {
            return Err(UploadError::Merge {
                name: name.to_string(),
                reason: format!("merged {merged_len} bytes, staged {expected_len}"),
            });
        }

        if let Some(expected) = meta.file_hash {
            let actual = self.digest_merged(name).await?;
            if actual != expected {
                return Err(UploadError::ChecksumMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
        }

        let mut prefix = self.scratch.read(name, MERGED_ENTRY).await?;
        let sniffed = sniff::sniff_reader(&mut prefix)
            .await?
            .ok_or(UploadError::UnknownContent)?;
        drop(prefix);

        let reader = self.scratch.read(name, MERGED_ENTRY).await?;
        place(self.store.as_ref(), &self.ids, target, sniffed, reader).await
    }

    async fn digest_merged(&self, name: &str) -> Result<Md5Digest, UploadError> {
        let mut reader = self.scratch.read(name, MERGED_ENTRY).await?;
        let mut hasher = Md5Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Remove sessions idle for at least `max_age`. Sessions with a chunk in
    /// flight are skipped. Returns the number removed.
    pub async fn sweep(&self, max_age: Duration) -> std::io::Result<usize> {
        let mut removed = 0;
        for session in self.scratch.sessions().await? {
            if session.idle < max_age {
                continue;
            }
            let lock = self.locks.entry(session.name.clone()).or_default().clone();
            let Ok(_held) = lock.try_lock() else {
                continue;
            };
            self.scratch.remove_session(&session.name).await?;
            self.locks
                .remove_if(&session.name, |_, m| Arc::strong_count(m) <= 2);
            debug!(session = %session.name, idle_secs = session.idle.as_secs(), "Evicted orphan chunk session");
            removed += 1;
        }
        Ok(removed)
    }
}

/// Spawn a background task that periodically evicts orphan chunk sessions.
pub fn spawn_sweep_task(
    assembler: Arc<ChunkAssembler>,
    sweep_interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);

        loop {
            interval.tick().await;
            match assembler.sweep(max_age).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Swept orphan chunk sessions"),
                Err(e) => warn!(error = %e, "Chunk session sweep failed"),
            }
        }
    })
}
