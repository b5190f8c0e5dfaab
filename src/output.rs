//! Output reconciler: turns returned result items into downloaded artifacts.
//!
//! Downloads are one-shot: an item leaves the held collection once its artifact
//! has been handed to the sink. Batch downloads are staggered so that consumers
//! which throttle bursts of downloads (browsers do) see them one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::envelope::ProcessingResult;
use crate::error::{DispatchError, Result};

/// Result items held between a successful request and their download.
///
/// Shared between the dispatcher, which replaces or clears it, and the
/// reconciler, which drains it.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    items: Arc<Mutex<Vec<ProcessingResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, items: Vec<ProcessingResult>) {
        *self.items.lock() = items;
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ProcessingResult> {
        self.items.lock().get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<ProcessingResult> {
        self.items.lock().clone()
    }

    /// Remove `item`, preferring `index` if it still holds it.
    fn remove_item(&self, index: usize, item: &ProcessingResult) -> bool {
        let mut items = self.items.lock();
        let position = if items.get(index) == Some(item) {
            Some(index)
        } else {
            items.iter().position(|i| i == item)
        };
        match position {
            Some(position) => {
                items.remove(position);
                true
            }
            None => false,
        }
    }

    /// Remove one occurrence of each of `removed`; items added since are kept.
    fn remove_items(&self, removed: &[ProcessingResult]) -> usize {
        let mut items = self.items.lock();
        let mut count = 0;
        for item in removed {
            if let Some(position) = items.iter().position(|i| i == item) {
                items.remove(position);
                count += 1;
            }
        }
        count
    }
}

/// A decoded artifact ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// False when the content was not valid base64 and was taken as literal text
    pub decoded: bool,
}

impl Artifact {
    pub fn from_result(result: &ProcessingResult) -> Self {
        let (bytes, decoded) = match STANDARD.decode(result.content.trim()) {
            Ok(bytes) => (bytes, true),
            Err(e) => {
                tracing::debug!(
                    filename = %result.filename,
                    error = %e,
                    "Content is not base64, using it as literal text"
                );
                (result.content.as_bytes().to_vec(), false)
            }
        };
        Self {
            filename: result.filename.clone(),
            mime_type: result.mime_type.clone(),
            bytes,
            decoded,
        }
    }
}

/// Destination for downloaded artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(&self, artifact: &Artifact) -> Result<()>;
}

/// Writes artifacts into a directory, one file per artifact.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, artifact: &Artifact) -> Result<()> {
        // Never let a backend-supplied name escape the output directory
        let name = Path::new(&artifact.filename)
            .file_name()
            .ok_or_else(|| {
                DispatchError::Validation(format!(
                    "Artifact has no usable file name: {:?}",
                    artifact.filename
                ))
            })?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, &artifact.bytes).await?;
        tracing::info!(path = %path.display(), size = artifact.bytes.len(), "Artifact written");
        Ok(())
    }
}

/// Record of an artifact handed to [`MockArtifactSink`].
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub artifact: Artifact,
    pub at: Instant,
}

/// Sink that records artifacts in memory.
#[derive(Debug, Clone, Default)]
pub struct MockArtifactSink {
    saved: Arc<Mutex<Vec<SavedArtifact>>>,
}

impl MockArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<SavedArtifact> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl ArtifactSink for MockArtifactSink {
    async fn save(&self, artifact: &Artifact) -> Result<()> {
        self.saved.lock().push(SavedArtifact {
            artifact: artifact.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Downloads held results into an [`ArtifactSink`].
pub struct OutputReconciler<K: ArtifactSink> {
    results: ResultStore,
    sink: K,
    stagger: Duration,
    clear_delay: Duration,
}

impl<K: ArtifactSink> OutputReconciler<K> {
    pub fn new(results: ResultStore, sink: K, stagger: Duration, clear_delay: Duration) -> Self {
        Self {
            results,
            sink,
            stagger,
            clear_delay,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Download the item at `index` and remove it from the held collection.
    ///
    /// An out-of-range index does nothing and returns `Ok(false)`.
    pub async fn download_one(&self, index: usize) -> Result<bool> {
        let Some(item) = self.results.get(index) else {
            tracing::debug!(index, held = self.results.len(), "No result at index");
            return Ok(false);
        };

        self.sink.save(&Artifact::from_result(&item)).await?;
        self.results.remove_item(index, &item);
        counter!("edi_dispatch_artifacts_downloaded_total", "mode" => "single").increment(1);
        Ok(true)
    }

    /// Download every held item, `stagger` apart, then drop the downloaded
    /// items from the collection.
    ///
    /// Results that replace the collection while the batch runs are kept.
    /// Returns the number of artifacts downloaded. On a sink error the
    /// collection is left as it was.
    pub async fn download_all(&self) -> Result<usize> {
        let items = self.results.snapshot();
        if items.is_empty() {
            return Ok(0);
        }

        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.stagger).await;
            }
            tracing::debug!(filename = %item.filename, position = i + 1, total = items.len(), "Downloading artifact");
            self.sink.save(&Artifact::from_result(item)).await?;
        }

        tokio::time::sleep(self.clear_delay).await;
        let removed = self.results.remove_items(&items);
        if removed < items.len() {
            tracing::debug!(
                downloaded = items.len(),
                removed,
                "Results changed during batch download"
            );
        }
        counter!("edi_dispatch_artifacts_downloaded_total", "mode" => "batch")
            .increment(items.len() as u64);
        tracing::info!(count = items.len(), "Downloaded all artifacts");
        Ok(items.len())
    }
}
