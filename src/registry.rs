//! Durable file registry: an ordered JSON document of [`FileRecord`]s,
//! newest first.
//!
//! Every mutation is a read-modify-write of the whole document, serialized by
//! a per-registry mutex. Mutations publish a [`RegistryEvent`]; changes made
//! by other processes are picked up by the polling [`Registry::watch`] task.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::FileRecord;

pub const REGISTRY_FILE: &str = "file_registry.json";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(String),
    Removed(String),
    Shared(String),
    /// The document changed outside this process (seen by polling).
    Changed,
}

pub struct Registry {
    path: PathBuf,
    write_lock: Mutex<()>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Open the registry stored under `root`, creating an empty document if
    /// none exists yet.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| Error::io(e, format!("creating {}", root.display())))?;

        let path = root.join(REGISTRY_FILE);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let registry = Self {
            path,
            write_lock: Mutex::new(()),
            events,
        };

        match tokio::fs::try_exists(&registry.path).await {
            Ok(true) => {}
            Ok(false) => registry.write_document(&[]).await?,
            Err(e) => {
                return Err(Error::Storage(format!(
                    "checking {}: {e}",
                    registry.path.display()
                )));
            }
        }

        info!(path = %registry.path.display(), "file registry opened");
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// All records, newest first. Read failures are logged and yield an
    /// empty list.
    pub async fn list(&self) -> Vec<FileRecord> {
        match self.read_document().await {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read file registry");
                Vec::new()
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        self.list().await.into_iter().find(|r| r.id == id)
    }

    /// Insert `record` at the head and persist.
    pub async fn add(&self, record: FileRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load_for_update().await?;

        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::Storage(format!("duplicate file id {}", record.id)));
        }

        let id = record.id.clone();
        records.insert(0, record);
        self.write_document(&records).await?;

        debug!(file_id = %id, count = records.len(), "registry entry added");
        let _ = self.events.send(RegistryEvent::Added(id));
        Ok(())
    }

    /// Remove the entry with `id`. Returns whether one was present.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load_for_update().await?;

        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }

        self.write_document(&records).await?;
        debug!(file_id = %id, "registry entry removed");
        let _ = self.events.send(RegistryEvent::Removed(id.to_string()));
        Ok(true)
    }

    /// Flag `id` as shared now. A missing id is a no-op returning `None`.
    pub async fn mark_shared(&self, id: &str) -> Result<Option<FileRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load_for_update().await?;

        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        record.shared = true;
        record.last_shared = Some(Utc::now());
        let updated = record.clone();

        self.write_document(&records).await?;
        debug!(file_id = %id, "registry entry marked shared");
        let _ = self.events.send(RegistryEvent::Shared(id.to_string()));
        Ok(Some(updated))
    }

    /// Poll the document every `interval` and publish
    /// [`RegistryEvent::Changed`] when the listing differs from the last poll.
    pub fn watch(self: &Arc<Self>, interval: Duration) -> Watcher {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last = registry.list().await;
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = registry.list().await;
                        if current != last {
                            debug!(count = current.len(), "registry changed on disk");
                            let _ = registry.events.send(RegistryEvent::Changed);
                            last = current;
                        }
                    }
                }
            }
        });

        Watcher {
            cancel,
            handle: Some(handle),
        }
    }

    async fn read_document(&self) -> Result<Vec<FileRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(e, format!("reading {}", self.path.display()))),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("parsing {}: {e}", self.path.display())))
    }

    /// Read for a mutation. A corrupt document is moved aside so the write
    /// that follows does not destroy it silently.
    async fn load_for_update(&self) -> Result<Vec<FileRecord>> {
        match self.read_document().await {
            Ok(records) => Ok(records),
            Err(Error::Storage(msg)) => {
                let backup = self.path.with_extension("json.corrupt");
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %msg,
                    "corrupt file registry, starting a new one"
                );
                tokio::fs::rename(&self.path, &backup)
                    .await
                    .map_err(|e| Error::Storage(format!("moving corrupt registry aside: {e}")))?;
                Ok(Vec::new())
            }
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn write_document(&self, records: &[FileRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| Error::Storage(format!("serializing registry: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Error::Storage(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("replacing {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Handle for a polling task started by [`Registry::watch`]. Dropping it
/// stops the task.
pub struct Watcher {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
