//! Media download and re-upload.

use crate::cms::RecordSink;
use crate::network::{HttpRequest, ResilientClient};
use crate::record::{AssetHandle, MediaAsset};
use crate::{MigrateError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome remembered for a remote URL within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupEntry {
    Uploaded(AssetHandle),
    Failed(String),
}

/// Remembers which remote URLs were already migrated.
///
/// Owned by the caller of the orchestrator and only mutated between
/// concurrent stages.
pub trait DedupStore: Send {
    fn lookup(&self, remote_url: &str) -> Option<DedupEntry>;
    fn record(&mut self, remote_url: &str, entry: DedupEntry);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`DedupStore`] that lives for one process.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    entries: HashMap<String, DedupEntry>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStore for InMemoryDedupStore {
    fn lookup(&self, remote_url: &str) -> Option<DedupEntry> {
        self.entries.get(remote_url).cloned()
    }

    fn record(&mut self, remote_url: &str, entry: DedupEntry) {
        self.entries.insert(remote_url.to_string(), entry);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Downloads a remote asset into scratch space and uploads it to the target.
pub struct MediaMigrator {
    downloader: ResilientClient,
    sink: Arc<dyn RecordSink>,
    scratch_dir: PathBuf,
}

impl MediaMigrator {
    pub fn new(downloader: ResilientClient, sink: Arc<dyn RecordSink>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloader,
            sink,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Migrate one asset. The scratch file is removed on every path.
    pub async fn migrate(&self, asset: &MediaAsset) -> Result<AssetHandle> {
        let media_error = |message: String| MigrateError::Media {
            url: asset.remote_url.clone(),
            message,
        };

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| media_error(format!("cannot create scratch dir: {e}")))?;

        let scratch = tempfile::Builder::new()
            .prefix("media-")
            .suffix(&format!("-{}", sanitize_file_name(&asset.file_name)))
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| media_error(format!("cannot create scratch file: {e}")))?;

        let bytes = self
            .downloader
            .download(HttpRequest::get(asset.remote_url.clone()), scratch.path())
            .await
            .map_err(|e| media_error(format!("download failed: {e}")))?;
        debug!("Downloaded {} ({} bytes)", asset.remote_url, bytes);

        let handle = self
            .sink
            .upload_media(scratch.path(), &asset.file_name, &asset.alt_text)
            .await
            .map_err(|e| media_error(format!("upload failed: {e}")))?;

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch file for {}: {}", asset.remote_url, e);
        }
        Ok(handle)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}
