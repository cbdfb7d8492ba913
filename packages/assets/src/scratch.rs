//! Scratch space for chunk sessions.
//!
//! A session is a flat namespace of entries. The merge engine only ever
//! talks to this port, so sessions can live anywhere that supports
//! stage/append/read/remove.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::storage::BoxReader;

/// A session directory and how long ago it was last touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub name: String,
    pub idle: Duration,
}

#[async_trait]
pub trait ScratchSpace: Send + Sync {
    /// Write `data` as `entry` in `session`, replacing an existing entry.
    async fn stage(&self, session: &str, entry: &str, data: &[u8]) -> std::io::Result<()>;

    /// Entry names currently staged in `session`. Missing sessions are empty.
    async fn entries(&self, session: &str) -> std::io::Result<Vec<String>>;

    async fn contains(&self, session: &str, entry: &str) -> std::io::Result<bool>;

    async fn remove(&self, session: &str, entry: &str) -> std::io::Result<()>;

    /// Append the bytes of `source` to the end of `target`, creating it if
    /// needed. Returns the number of bytes appended.
    async fn append(&self, session: &str, target: &str, source: &str) -> std::io::Result<u64>;

    async fn read(&self, session: &str, entry: &str) -> std::io::Result<BoxReader>;

    async fn size(&self, session: &str, entry: &str) -> std::io::Result<u64>;

    /// Remove a session and everything in it. Missing sessions are not an error.
    async fn remove_session(&self, session: &str) -> std::io::Result<()>;

    async fn sessions(&self) -> std::io::Result<Vec<SessionInfo>>;
}

/// Scratch space rooted at a local directory: `{root}/{session}/{entry}`.
pub struct FilesystemScratch {
    root: PathBuf,
}

impl FilesystemScratch {
    pub async fn new(root: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session: &str) -> std::io::Result<PathBuf> {
        check_component(session)?;
        Ok(self.root.join(session))
    }

    fn entry_path(&self, session: &str, entry: &str) -> std::io::Result<PathBuf> {
        check_component(entry)?;
        Ok(self.session_dir(session)?.join(entry))
    }
}

fn check_component(name: &str) -> std::io::Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid scratch name: {name:?}"),
        ));
    }
    Ok(())
}

fn ignore_not_found(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl ScratchSpace for FilesystemScratch {
    async fn stage(&self, session: &str, entry: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.entry_path(session, entry)?;
        let dir = self.session_dir(session)?;
        fs::create_dir_all(&dir).await?;

        // Hidden temp names are skipped by `entries`, so a half-written
        // chunk is never counted as received.
        let temp = dir.join(format!(".{entry}.{}", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&temp, data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn entries(&self, session: &str) -> std::io::Result<Vec<String>> {
        let dir = self.session_dir(session)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn contains(&self, session: &str, entry: &str) -> std::io::Result<bool> {
        fs::try_exists(self.entry_path(session, entry)?).await
    }

    async fn remove(&self, session: &str, entry: &str) -> std::io::Result<()> {
        ignore_not_found(fs::remove_file(self.entry_path(session, entry)?).await)
    }

    async fn append(&self, session: &str, target: &str, source: &str) -> std::io::Result<u64> {
        let source = self.entry_path(session, source)?;
        let target = self.entry_path(session, target)?;

        let mut reader = fs::File::open(&source).await?;
        let mut writer = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await?;
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        Ok(copied)
    }

    async fn read(&self, session: &str, entry: &str) -> std::io::Result<BoxReader> {
        let file = fs::File::open(self.entry_path(session, entry)?).await?;
        Ok(Box::new(BufReader::new(file)))
    }

    async fn size(&self, session: &str, entry: &str) -> std::io::Result<u64> {
        Ok(fs::metadata(self.entry_path(session, entry)?).await?.len())
    }

    async fn remove_session(&self, session: &str) -> std::io::Result<()> {
        ignore_not_found(fs::remove_dir_all(self.session_dir(session)?).await)
    }

    async fn sessions(&self) -> std::io::Result<Vec<SessionInfo>> {
        let mut read_dir = fs::read_dir(&self.root).await?;
        let now = SystemTime::now();

        let mut sessions = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            sessions.push(SessionInfo {
                name,
                idle: now.duration_since(modified).unwrap_or_default(),
            });
        }
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }
}
