//! Publish and retrieve flows built from the registry, store, gateway and
//! exchange client.
//!
//! A [`Workflow`] is constructed once per process and shared by reference.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::code::PickupCode;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{OpenTarget, SharingGateway};
use crate::record::{FileRecord, FileRef};
use crate::registry::Registry;
use crate::remote::{Deleted, ExchangeClient, FetchOutcome};
use crate::store::{LocalFileStore, guess_mime};

pub const NO_FILES_MESSAGE: &str = "No files found for this code";

/// A file selected for publishing.
#[derive(Debug, Clone)]
pub struct PublishItem {
    pub path: PathBuf,
    /// Where the receiving side can fetch the content. Defaults to the
    /// `file://` URL of the stored copy.
    pub remote_url: Option<String>,
    pub mime_type: Option<String>,
}

impl PublishItem {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remote_url: None,
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedCode {
    pub code: PickupCode,
    pub scan_payload: String,
    pub share_message: String,
}

#[derive(Debug)]
pub struct PublishOutcome {
    /// Registry entries created for the selection, in selection order.
    pub records: Vec<FileRecord>,
    /// The code, or why none could be obtained. Local records exist either
    /// way.
    pub upload: Result<PublishedCode>,
}

/// How the user supplied a pickup code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeInput {
    Typed(String),
    Scanned(String),
}

impl CodeInput {
    pub fn resolve(&self) -> Result<PickupCode> {
        match self {
            CodeInput::Typed(text) => PickupCode::parse(text),
            CodeInput::Scanned(payload) => PickupCode::from_scan(payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub code: PickupCode,
    pub outcome: FetchOutcome,
}

pub struct Workflow {
    registry: Arc<Registry>,
    store: LocalFileStore,
    client: ExchangeClient,
    gateway: Arc<SharingGateway>,
    scan_prefix: String,
}

impl Workflow {
    pub fn new(
        registry: Arc<Registry>,
        store: LocalFileStore,
        client: ExchangeClient,
        gateway: SharingGateway,
        scan_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            client,
            gateway: Arc::new(gateway),
            scan_prefix: scan_prefix.into(),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::open(&config.storage_root).await?);
        let store = LocalFileStore::new(&config.storage_root)?;
        let client = ExchangeClient::new(&config.base_url, config.timeout())?;
        let gateway = SharingGateway::desktop(config.preview_app.clone());
        Ok(Self::new(
            registry,
            store,
            client,
            gateway,
            config.scan_prefix.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn client(&self) -> &ExchangeClient {
        &self.client
    }

    pub async fn list_files(&self) -> Vec<FileRecord> {
        self.registry.list().await
    }

    /// Copy `source` into the store and record it.
    ///
    /// If the registry write fails the stored copy is removed again.
    pub async fn import(
        &self,
        source: &Path,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<FileRecord> {
        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::Validation(format!("{} has no file name", source.display())))?,
        };
        let mime_type = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime(&name));

        let blob = self.store.store(source, &name).await.inspect_err(|e| {
            error!(source = %source.display(), error = %e, "failed to store file");
        })?;

        let record = FileRecord::new(
            blob.id,
            name,
            Some(mime_type),
            blob.location,
            Utc::now(),
        );

        if let Err(e) = self.registry.add(record.clone()).await {
            error!(file_id = %record.id, error = %e, "failed to record file, removing stored copy");
            if let Err(cleanup) = self.store.delete(&record.location).await {
                warn!(location = %record.location.display(), error = %cleanup, "orphaned content left behind");
            }
            return Err(e);
        }

        info!(file_id = %record.id, file = %record.name, "file imported");
        Ok(record)
    }

    /// Delete the registry entry for `id`, then its content.
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let removed = self.remove_record(&record).await.inspect_err(|e| {
            error!(file_id = %id, error = %e, "failed to remove registry entry");
        })?;
        if !removed {
            return Err(Error::NotFound(id.to_string()));
        }

        info!(file_id = %id, file = %record.name, "file deleted");
        Ok(())
    }

    /// Drop the entry first so a failure can only orphan content, never
    /// metadata. Returns whether the entry was still present.
    async fn remove_record(&self, record: &FileRecord) -> Result<bool> {
        if !self.registry.remove(&record.id).await? {
            return Ok(false);
        }
        if let Err(e) = self.store.delete(&record.location).await {
            warn!(file_id = %record.id, location = %record.location.display(), error = %e, "orphaned content left behind");
        }
        Ok(true)
    }

    async fn hand_off(&self, record: FileRecord) -> Result<&'static str> {
        let gateway = Arc::clone(&self.gateway);
        tokio::task::spawn_blocking(move || gateway.open(&target_for(&record)))
            .await
            .map_err(|e| Error::io(std::io::Error::other(e), "opening file"))?
    }

    /// Hand the file to the sharing chain and mark it delivered.
    pub async fn share_file(&self, id: &str) -> Result<FileRecord> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        self.hand_off(record).await?;

        self.registry
            .mark_shared(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Open the file without changing its shared state.
    pub async fn open_file(&self, id: &str) -> Result<&'static str> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.hand_off(record).await
    }

    /// Store every item locally, then register them with the exchange.
    ///
    /// If any item cannot be stored, the items stored before it are removed
    /// again and nothing is uploaded.
    pub async fn publish(&self, items: &[PublishItem]) -> Result<PublishOutcome> {
        let mut records = Vec::with_capacity(items.len());
        let mut refs = Vec::with_capacity(items.len());

        for item in items {
            let record = match self
                .import(&item.path, None, item.mime_type.as_deref())
                .await
            {
                Ok(record) => record,
                Err(e) => return Err(self.abandon(&records, e).await),
            };
            let name = record.name.clone();
            let mime_type = record.mime_type.clone();
            let url = match &item.remote_url {
                Some(url) => Ok(url.clone()),
                None => file_url(&record.location),
            };
            records.push(record);
            match url {
                Ok(url) => refs.push(FileRef {
                    url,
                    name,
                    mime_type,
                }),
                Err(e) => return Err(self.abandon(&records, e).await),
            }
        }

        let upload = self.client.upload(&refs).await.map(|code| PublishedCode {
            scan_payload: code.scan_payload(&self.scan_prefix),
            share_message: code.share_message(),
            code,
        });
        if let Err(e) = &upload {
            warn!(error = %e, files = records.len(), "files kept locally but no code was issued");
        }

        Ok(PublishOutcome { records, upload })
    }

    async fn abandon(&self, records: &[FileRecord], cause: Error) -> Error {
        warn!(error = %cause, files = records.len(), "publish aborted, removing files stored so far");
        for record in records {
            if let Err(e) = self.remove_record(record).await {
                warn!(file_id = %record.id, error = %e, "failed to remove abandoned record");
            }
        }
        cause
    }

    /// Withdraw a code, e.g. after it has been handed to the recipient.
    pub async fn revoke(&self, code: &PickupCode) -> Result<Deleted> {
        self.client.delete_by_code(code).await
    }

    pub async fn check_code(&self, input: &CodeInput) -> Result<bool> {
        let code = input.resolve()?;
        self.client.exists(&code).await
    }

    /// Validate the input, then fetch the files registered under it.
    pub async fn retrieve(&self, input: &CodeInput) -> Result<Retrieved> {
        let code = input.resolve()?;
        let outcome = self.client.fetch_by_code(&code).await?;
        if outcome == FetchOutcome::NoFiles {
            info!(code = %code, "{NO_FILES_MESSAGE}");
        }
        Ok(Retrieved { code, outcome })
    }

    /// Download a retrieved file and record it locally.
    pub async fn download(&self, file: &FileRef, cancel: &CancellationToken) -> Result<FileRecord> {
        let fetched = self.store.fetch_remote(&file.url, &file.name, cancel).await?;
        let result = self
            .import(&fetched.path, Some(&file.name), file.mime_type.as_deref())
            .await;
        fetched.discard().await;
        result
    }
}

fn target_for(record: &FileRecord) -> OpenTarget<'_> {
    OpenTarget {
        location: &record.location,
        mime_type: record.mime_type.as_deref(),
        name: &record.name,
    }
}

fn file_url(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .map_err(|e| Error::io(e, format!("resolving {}", path.display())))?;
    reqwest::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| Error::Validation(format!("cannot build a url for {}", absolute.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OpenStrategy;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Accept;

    impl OpenStrategy for Accept {
        fn name(&self) -> &'static str {
            "accept"
        }

        fn attempt(&self, _target: &OpenTarget<'_>) -> io::Result<()> {
            Ok(())
        }
    }

    struct Refuse;

    impl OpenStrategy for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        fn attempt(&self, _target: &OpenTarget<'_>) -> io::Result<()> {
            Err(io::Error::other("refused"))
        }
    }

    async fn workflow(tmp: &TempDir, gateway: SharingGateway) -> Workflow {
        let root = tmp.path().join("root");
        let registry = Arc::new(Registry::open(&root).await.unwrap());
        let store = LocalFileStore::new(&root).unwrap();
        // Nothing listens here; remote calls fail fast.
        let client = ExchangeClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        Workflow::new(registry, store, client, gateway, "pickup://scan/")
    }

    fn accepting() -> SharingGateway {
        SharingGateway::new(vec![Box::new(Accept)], Box::new(Accept))
    }

    async fn source(tmp: &TempDir, name: &str) -> PathBuf {
        let path = tmp.path().join(name);
        tokio::fs::write(&path, b"content").await.unwrap();
        path
    }

    #[tokio::test]
    async fn import_records_file_unshared() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "report.pdf").await;

        let record = wf.import(&path, None, None).await.unwrap();
        assert_eq!(record.name, "report.pdf");
        assert_eq!(record.mime_type.as_deref(), Some("application/pdf"));
        assert!(!record.shared);
        assert!(record.location.exists());
        assert_eq!(wf.list_files().await, vec![record]);
    }

    #[tokio::test]
    async fn share_marks_delivered() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "report.pdf").await;
        let record = wf.import(&path, None, Some("application/pdf")).await.unwrap();

        let shared = wf.share_file(&record.id).await.unwrap();
        assert!(shared.shared);
        assert!(shared.last_shared.is_some());

        let listed = wf.list_files().await;
        assert_eq!(listed[0].status().to_string(), "Delivered");
    }

    #[tokio::test]
    async fn failed_share_leaves_record_unshared() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, SharingGateway::new(vec![Box::new(Refuse)], Box::new(Refuse))).await;
        let path = source(&tmp, "report.pdf").await;
        let record = wf.import(&path, None, None).await.unwrap();

        assert!(matches!(wf.share_file(&record.id).await, Err(Error::Open { .. })));
        assert!(!wf.registry().get(&record.id).await.unwrap().shared);
    }

    #[tokio::test]
    async fn delete_removes_content_and_metadata() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "notes.txt").await;
        let record = wf.import(&path, None, None).await.unwrap();

        wf.delete_file(&record.id).await.unwrap();
        assert!(!record.location.exists());
        assert!(wf.list_files().await.iter().all(|r| r.id != record.id));

        assert!(matches!(
            wf.delete_file(&record.id).await,
            Err(Error::NotFound(id)) if id == record.id
        ));
    }

    #[tokio::test]
    async fn failed_registry_write_keeps_content_with_its_entry() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "notes.txt").await;
        let record = wf.import(&path, None, None).await.unwrap();

        // A directory where the staged document goes makes every write fail.
        let staged = wf.registry().path().with_extension("json.tmp");
        tokio::fs::create_dir(&staged).await.unwrap();

        assert!(matches!(wf.delete_file(&record.id).await, Err(Error::Storage(_))));
        assert!(wf.registry().get(&record.id).await.is_some());
        assert!(record.location.exists());

        tokio::fs::remove_dir(&staged).await.unwrap();
        wf.delete_file(&record.id).await.unwrap();
        assert!(!record.location.exists());
    }

    #[tokio::test]
    async fn publish_failure_removes_earlier_items() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let first = source(&tmp, "first.txt").await;
        let missing = tmp.path().join("missing.txt");

        let err = wf
            .publish(&[PublishItem::local(&first), PublishItem::local(&missing)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(wf.list_files().await.is_empty());

        let mut stored = tokio::fs::read_dir(tmp.path().join("root").join("files"))
            .await
            .unwrap();
        assert!(stored.next_entry().await.unwrap().is_none());
        assert!(first.exists());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        assert!(matches!(wf.share_file("nope").await, Err(Error::NotFound(_))));
        assert!(matches!(wf.open_file("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_code_is_rejected_before_network() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;

        let err = wf
            .retrieve(&CodeInput::Typed("12a".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = wf
            .retrieve(&CodeInput::Scanned("https://host/f/abcd".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn publish_keeps_local_copy_when_upload_fails() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "photo.png").await;

        let outcome = wf.publish(&[PublishItem::local(&path)]).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(matches!(outcome.upload, Err(Error::Remote { .. })));
        assert_eq!(wf.list_files().await.len(), 1);
    }

    #[tokio::test]
    async fn download_of_file_url_registers_copy() {
        let tmp = TempDir::new().unwrap();
        let wf = workflow(&tmp, accepting()).await;
        let path = source(&tmp, "photo.png").await;
        let file = FileRef {
            url: file_url(&path).unwrap(),
            name: "photo.png".into(),
            mime_type: Some("image/png".into()),
        };

        let record = wf.download(&file, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.name, "photo.png");
        assert_ne!(record.location, path);
        assert!(path.exists());
        assert_eq!(tokio::fs::read(&record.location).await.unwrap(), b"content");
    }
}
