//! Garbage collection of assets that lose their last reference.
//!
//! There is no reference table. Liveness is recomputed when an entity is
//! written: structured fields are diffed old against new, and free-form
//! content is scanned for Markdown image links.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::resolve::AssetLocator;
use crate::storage::{ObjectStore, StorageError};

static IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).expect("Valid image link regex")
});

/// Raw targets of every `![alt](target)` link, in order of appearance.
pub fn image_links(content: &str) -> Vec<&str> {
    IMAGE_LINK
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Rewrite the target of every image link that starts with `from` so it
/// starts with `to` instead. Other text is left untouched.
pub fn rewrite_asset_prefix<'a>(content: &'a str, from: &str, to: &str) -> Cow<'a, str> {
    if from.is_empty() || !content.contains(from) {
        return Cow::Borrowed(content);
    }
    IMAGE_LINK.replace_all(content, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let Some(target) = caps.get(1) else {
            return whole.to_string();
        };
        let Some(rest) = target.as_str().strip_prefix(from) else {
            return whole.to_string();
        };
        let Some(whole_match) = caps.get(0) else {
            return whole.to_string();
        };
        let start = target.start() - whole_match.start();
        let end = target.end() - whole_match.start();
        format!("{}{to}{rest}{}", &whole[..start], &whole[end..])
    })
}

/// Asset references held by an entity and everything it owns.
#[derive(Debug, Clone, Default)]
pub struct EntityNode {
    /// Structured fields holding a single asset path (avatar, cover, video).
    pub fields: Vec<String>,
    /// Free-form content scanned for embedded image links.
    pub content: Vec<String>,
    pub children: Vec<EntityNode>,
}

impl EntityNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            let value = value.into();
            if !value.trim().is_empty() {
                self.fields.push(value);
            }
        }
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content.push(content.into());
        self
    }

    pub fn with_child(mut self, child: EntityNode) -> Self {
        self.children.push(child);
        self
    }

    /// Storage keys referenced anywhere in the tree, deduplicated in
    /// first-seen order. References outside the asset store are dropped.
    pub fn collect_references(&self, locator: &AssetLocator) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut pending = vec![self];

        while let Some(node) = pending.pop() {
            let raw = node
                .fields
                .iter()
                .map(String::as_str)
                .chain(node.content.iter().flat_map(|c| image_links(c)));
            for reference in raw {
                if let Ok(key) = locator.normalize(reference)
                    && seen.insert(key.clone())
                {
                    keys.push(key);
                }
            }
            pending.extend(node.children.iter().rev());
        }
        keys
    }
}

/// Outcome of one release batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub deleted: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Deletes assets whose owning entity no longer references them.
#[derive(Clone)]
pub struct AssetLifecycle {
    store: Arc<dyn ObjectStore>,
    locator: AssetLocator,
    protected: Arc<HashSet<String>>,
}

impl AssetLifecycle {
    pub fn new(store: Arc<dyn ObjectStore>, locator: AssetLocator, protected: &[String]) -> Self {
        let protected = protected
            .iter()
            .map(|p| locator.normalize(p).unwrap_or_else(|_| p.clone()))
            .collect();
        Self {
            store,
            locator,
            protected: Arc::new(protected),
        }
    }

    pub fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    pub fn is_protected(&self, key: &str) -> bool {
        self.protected.contains(key)
    }

    /// Keys of assets embedded in `content`, deduplicated.
    pub fn embedded_assets(&self, content: &str) -> Vec<String> {
        EntityNode::new()
            .with_content(content)
            .collect_references(&self.locator)
    }

    /// Key to release when a single-asset field changes from `old` to `new`.
    pub fn replaced(&self, old: Option<&str>, new: Option<&str>) -> Option<String> {
        let old_key = self.locator.normalize(old?).ok()?;
        let new_key = new.and_then(|n| self.locator.normalize(n).ok());
        if new_key.as_deref() == Some(old_key.as_str()) || self.is_protected(&old_key) {
            return None;
        }
        Some(old_key)
    }

    /// Keys embedded in `old` content that `new` content no longer embeds.
    pub fn dropped_from_content(&self, old: &str, new: &str) -> Vec<String> {
        let kept: HashSet<_> = self.embedded_assets(new).into_iter().collect();
        self.embedded_assets(old)
            .into_iter()
            .filter(|k| !kept.contains(k))
            .collect()
    }

    /// Keys in `released` that the rewritten entity `kept` no longer refers
    /// to, deduplicated. An asset moved between fields of one row survives.
    pub fn unreferenced(&self, released: Vec<String>, kept: &EntityNode) -> Vec<String> {
        let kept: HashSet<_> = kept.collect_references(&self.locator).into_iter().collect();
        let mut seen = HashSet::new();
        released
            .into_iter()
            .filter(|k| !kept.contains(k) && seen.insert(k.clone()))
            .collect()
    }

    /// Release the previous value of a single-asset field. Call after the
    /// entity write has committed.
    pub fn release_replaced(&self, old: Option<&str>, new: Option<&str>) -> JoinHandle<ReleaseReport> {
        self.spawn_release(self.replaced(old, new))
    }

    /// Release every asset embedded in `content`.
    pub fn release_content(&self, content: &str) -> JoinHandle<ReleaseReport> {
        self.spawn_release(self.embedded_assets(content))
    }

    /// Release every asset referenced by an entity tree.
    pub fn release_tree(&self, root: &EntityNode) -> JoinHandle<ReleaseReport> {
        self.spawn_release(root.collect_references(&self.locator))
    }

    /// Delete `keys` on a background task. Failures are logged and counted,
    /// never returned to the writer that triggered the release.
    pub fn spawn_release<I>(&self, keys: I) -> JoinHandle<ReleaseReport>
    where
        I: IntoIterator<Item = String>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .filter(|k| !self.is_protected(k))
            .collect();
        let lifecycle = self.clone();
        tokio::spawn(async move { lifecycle.release(keys).await })
    }

    pub async fn release(&self, keys: Vec<String>) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if keys.is_empty() {
            return report;
        }

        for key in &keys {
            match self.store.delete(key).await {
                Ok(true) => {
                    debug!(key = %key, "Released asset");
                    report.deleted += 1;
                }
                Ok(false) => report.missing += 1,
                Err(StorageError::NotFound(_)) => report.missing += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to release asset");
                    report.failed += 1;
                }
            }
        }

        info!(
            deleted = report.deleted,
            missing = report.missing,
            failed = report.failed,
            "Asset release finished"
        );
        report
    }
}
