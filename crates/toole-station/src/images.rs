//! # Image Store
//!
//! Captured frames on disk.
//!
//! ```text
//! captured_images/
//! ├── temp/                     one file per capture, named by transaction ID
//! │   └── 20240304-100000-000-0.jpg
//! ├── Yes/<tool>/               classifier was right
//! │   └── Hammer_20240304_100412_a1b2c3.jpg
//! └── No/<tool>/                user overrode it, or it never answered
//! ```
//!
//! Relocation happens per row just before the batch commit and is not part
//! of the commit's atomicity: a moved image with a rolled-back row (or the
//! reverse) is logged and otherwise accepted.
//!
//! A frame reserved with [`ImageStore::reserve_temp`] is not relocated until
//! its [`TempReservation`] is dropped.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use toole_core::{ImageRef, TransactionId, UNKNOWN_LABEL};

use crate::error::{StationError, StationResult};

const TEMP_DIR: &str = "temp";

/// Frames still being written, shared by every clone of a store.
type SavesInFlight = Arc<Mutex<HashMap<ImageRef, watch::Receiver<()>>>>;

/// Owns the capture directory tree.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    saving: SavesInFlight,
}

/// Marks a temp frame as being written. Dropping it releases any
/// `relocate` waiting on the frame.
#[derive(Debug)]
pub struct TempReservation {
    image_ref: ImageRef,
    saving: SavesInFlight,
    _done: watch::Sender<()>,
}

impl Drop for TempReservation {
    fn drop(&mut self) {
        lock(&self.saving).remove(&self.image_ref);
    }
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ImageStore {
            root: root.into(),
            saving: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    /// Where the frame for `transaction_id` lives until it is relocated.
    pub fn temp_ref(&self, transaction_id: &TransactionId) -> ImageRef {
        let path = self.temp_dir().join(format!("{}.jpg", transaction_id));
        ImageRef::new(path.to_string_lossy())
    }

    /// Registers a frame that is about to be written. Call before handing the
    /// write to a background task so a racing `relocate` sees it.
    pub fn reserve_temp(&self, image_ref: &ImageRef) -> TempReservation {
        let (done, waiter) = watch::channel(());
        lock(&self.saving).insert(image_ref.clone(), waiter);
        TempReservation {
            image_ref: image_ref.clone(),
            saving: self.saving.clone(),
            _done: done,
        }
    }

    async fn wait_for_save(&self, image_ref: &ImageRef) {
        let waiter = lock(&self.saving).get(image_ref).cloned();
        if let Some(mut waiter) = waiter {
            debug!(image = %image_ref, "Waiting for capture to finish saving");
            // Errors once the reservation's sender is dropped
            while waiter.changed().await.is_ok() {}
        }
    }

    /// Writes a captured frame to its temp location.
    pub async fn save_temp(&self, image_ref: &ImageRef, bytes: &[u8]) -> StationResult<()> {
        tokio::fs::create_dir_all(self.temp_dir())
            .await
            .map_err(|e| image_error("create temp dir", e))?;
        tokio::fs::write(image_ref.as_str(), bytes)
            .await
            .map_err(|e| image_error("write capture", e))?;
        debug!(image = %image_ref, bytes = bytes.len(), "Capture saved");
        Ok(())
    }

    /// Reads a stored frame back, e.g. to retry identification.
    pub async fn load(&self, image_ref: &ImageRef) -> io::Result<Vec<u8>> {
        tokio::fs::read(image_ref.as_str()).await
    }

    /// Moves a frame into the `Yes/` or `No/` archive under its tool name.
    ///
    /// Returns `Ok(None)` when the source file is gone; the caller keeps
    /// the original reference in that case.
    pub async fn relocate(
        &self,
        image_ref: &ImageRef,
        tool_label: &str,
        classification_correct: Option<bool>,
        now: DateTime<Utc>,
    ) -> StationResult<Option<ImageRef>> {
        self.wait_for_save(image_ref).await;

        let source = Path::new(image_ref.as_str());
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            warn!(image = %image_ref, "Capture missing from temp, not relocating");
            return Ok(None);
        }

        let safe = sanitize_label(tool_label);
        let outcome = if classification_correct.unwrap_or(false) {
            "Yes"
        } else {
            "No"
        };
        let target_dir = self.root.join(outcome).join(&safe);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| image_error("create archive dir", e))?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let file_name = format!("{}_{}_{}.jpg", safe, now.format("%Y%m%d_%H%M%S"), &suffix[..6]);
        let target = target_dir.join(file_name);

        if tokio::fs::rename(source, &target).await.is_err() {
            // Different filesystem: copy then remove
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| image_error("copy capture", e))?;
            if let Err(e) = tokio::fs::remove_file(source).await {
                warn!(image = %image_ref, error = %e, "Copied capture but could not remove temp file");
            }
        }

        let moved = ImageRef::new(target.to_string_lossy());
        debug!(from = %image_ref, to = %moved, "Capture relocated");
        Ok(Some(moved))
    }

    /// Deletes temp captures older than `max_age`. Returns how many went.
    pub async fn cleanup_temp(&self, max_age: Duration) -> StationResult<usize> {
        let dir = self.temp_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(image_error("read temp dir", e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| image_error("read temp dir", e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());

            if matches!(age, Some(age) if age > max_age) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = ?entry.path(), error = %e, "Could not delete stale capture"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up old temp captures");
        }
        Ok(removed)
    }
}

/// Keeps letters, digits, space, `-` and `_`.
pub fn sanitize_label(label: &str) -> String {
    let safe: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe = safe.trim();
    if safe.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        safe.to_string()
    }
}

fn lock(saving: &SavesInFlight) -> MutexGuard<'_, HashMap<ImageRef, watch::Receiver<()>>> {
    saving.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn image_error(action: &str, err: io::Error) -> StationError {
    StationError::Image(format!("{}: {}", action, err))
}
