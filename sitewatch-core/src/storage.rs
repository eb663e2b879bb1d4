use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::document::StateDocument;
use crate::error::StoreError;

/// Owner of the durable [`StateDocument`].
///
/// The document mutex doubles as the processing lock: every read-modify-write
/// of history, the dedup set and settings happens while holding it, and the
/// write to disk completes before the guard is released.
#[derive(Debug)]
pub struct StateStore {
    doc: Mutex<StateDocument>,
    path: Option<PathBuf>,
}

impl StateStore {
    pub fn in_memory(doc: StateDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
            path: None,
        }
    }

    /// Loads the document at `path`, falling back to the temp file of an
    /// interrupted write and finally to defaults. Never fails: a broken file
    /// is set aside as `*.corrupt` so the next write cannot destroy it.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, path = %parent.display(), "failed to create data dir");
            }
        }

        let (doc, dirty) = match read_document(&path).await {
            Some(loaded) => loaded,
            None => {
                let tmp = tmp_path(&path);
                match read_document(&tmp).await {
                    Some((doc, _)) => {
                        warn!(path = %tmp.display(), "recovered state from temp file");
                        (doc, true)
                    }
                    None => {
                        info!(path = %path.display(), "starting with a fresh state document");
                        (StateDocument::default(), true)
                    }
                }
            }
        };

        let store = Self {
            doc: Mutex::new(doc),
            path: Some(path),
        };
        if dirty {
            let doc = store.doc.lock().await;
            store.persist_logged(&doc).await;
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn lock(&self) -> MutexGuard<'_, StateDocument> {
        self.doc.lock().await
    }

    pub async fn snapshot(&self) -> StateDocument {
        self.doc.lock().await.clone()
    }

    pub async fn settings(&self) -> Settings {
        self.doc.lock().await.settings.clone()
    }

    /// Writes `doc` atomically, retrying the write once before giving up.
    pub async fn persist(&self, doc: &StateDocument) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            debug!("state store is in-memory only; skipping persist");
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(doc)?;
        if let Err(first) = write_atomic(path, &bytes).await {
            warn!(error = %first, path = %path.display(), "state write failed, retrying once");
            write_atomic(path, &bytes).await?;
        }
        Ok(())
    }

    /// Like [`persist`](Self::persist) for background paths: failures are
    /// logged and the in-memory document stays authoritative.
    pub async fn persist_logged(&self, doc: &StateDocument) {
        if let Err(e) = self.persist(doc).await {
            error!(error = %e, "failed to persist state; keeping in-memory copy");
        }
    }

    /// Applies `f` under the lock and persists the result.
    pub async fn update<R>(&self, f: impl FnOnce(&mut StateDocument) -> R) -> Result<R, StoreError> {
        let mut doc = self.doc.lock().await;
        let out = f(&mut doc);
        self.persist(&doc).await?;
        Ok(out)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

/// `path` with `suffix` appended to its full file name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

async fn read_document(path: &Path) -> Option<(StateDocument, bool)> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, path = %path.display(), "state file not readable");
            return None;
        }
    };
    let parsed = serde_json::from_slice::<Value>(&bytes)
        .and_then(StateDocument::from_value);
    match parsed {
        Ok(loaded) => Some(loaded),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse state file");
            let corrupt = with_suffix(path, ".corrupt");
            if let Err(e) = tokio::fs::copy(path, &corrupt).await {
                warn!(error = %e, path = %corrupt.display(), "failed to preserve corrupt state file");
            }
            None
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}
