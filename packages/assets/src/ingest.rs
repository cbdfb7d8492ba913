//! Final placement of sniffed content: accept check, key resolution, store.

use serde::Serialize;
use tracing::info;

use crate::error::UploadError;
use crate::id::IdGenerator;
use crate::resolve::{ModuleHint, asset_key, resolve};
use crate::sniff::{MediaKind, Sniffed};
use crate::storage::{BoxReader, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AcceptRule {
    Kind(MediaKind),
    Mime(String),
}

/// Which sniffed types an upload may resolve to.
#[derive(Debug, Clone, Default)]
pub struct AcceptPolicy {
    rules: Vec<AcceptRule>,
    blocked_extensions: Vec<String>,
}

impl AcceptPolicy {
    pub fn new(blocked_extensions: &[String]) -> Self {
        Self {
            rules: Vec::new(),
            blocked_extensions: blocked_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Restrict to a comma-separated list of media kinds (`image`),
    /// wildcards (`video/*`) or exact types (`application/pdf`).
    /// An empty list accepts every kind.
    pub fn with_accept(mut self, accept: Option<&str>) -> Result<Self, UploadError> {
        let Some(accept) = accept else {
            return Ok(self);
        };
        for item in accept.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let item = item.to_ascii_lowercase();
            let rule = match item.split_once('/') {
                None => AcceptRule::Kind(item.parse().map_err(UploadError::Invalid)?),
                Some((kind, "*")) => AcceptRule::Kind(kind.parse().map_err(UploadError::Invalid)?),
                Some((kind, _)) => {
                    kind.parse::<MediaKind>().map_err(UploadError::Invalid)?;
                    AcceptRule::Mime(item)
                }
            };
            self.rules.push(rule);
        }
        Ok(self)
    }

    pub fn check(&self, sniffed: &Sniffed) -> Result<(), UploadError> {
        if self
            .blocked_extensions
            .iter()
            .any(|e| e == sniffed.extension)
        {
            return Err(UploadError::Disallowed(sniffed.mime.to_string()));
        }
        if self.rules.is_empty() {
            return Ok(());
        }
        let allowed = self.rules.iter().any(|rule| match rule {
            AcceptRule::Kind(kind) => *kind == sniffed.kind(),
            AcceptRule::Mime(mime) => mime == sniffed.mime,
        });
        if allowed {
            Ok(())
        } else {
            Err(UploadError::Disallowed(sniffed.mime.to_string()))
        }
    }
}

/// Where an upload should go and what it may be.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub hint: ModuleHint,
    pub accept: AcceptPolicy,
}

/// A persisted asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredAsset {
    pub key: String,
    pub mime: String,
    pub size: u64,
}

pub(crate) async fn place(
    store: &dyn ObjectStore,
    ids: &IdGenerator,
    target: &Target,
    sniffed: Sniffed,
    reader: BoxReader,
) -> Result<StoredAsset, UploadError> {
    target.accept.check(&sniffed)?;

    let prefix = resolve(sniffed.kind(), &target.hint);
    let key = asset_key(&prefix, ids.next_id(), sniffed.extension);
    let size = store.put_stream(&key, reader, sniffed.mime).await?;

    info!(key = %key, size, mime = sniffed.mime, "Stored asset");
    Ok(StoredAsset {
        key,
        mime: sniffed.mime.to_string(),
        size,
    })
}
