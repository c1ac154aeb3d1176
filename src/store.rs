//! App-private content store for the bytes behind each registry entry.
//!
//! Blobs live in `<root>/files/<id>_<name>`. Remote downloads are staged in
//! `<root>/partial/` and only handed back once the transfer is complete.

use chrono::Utc;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const FILES_DIR: &str = "files";
const PARTIAL_DIR: &str = "partial";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Result of importing content into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub id: String,
    pub location: PathBuf,
}

pub struct LocalFileStore {
    root: PathBuf,
    http: reqwest::Client,
    last_id: AtomicI64,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::from_reqwest("Creating download client", e))?;
        Ok(Self::with_client(root, http))
    }

    pub fn with_client(root: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            http,
            last_id: AtomicI64::new(0),
        }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    fn partial_dir(&self) -> PathBuf {
        self.root.join(PARTIAL_DIR)
    }

    /// Time-based id, strictly increasing within this store.
    fn mint_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_id
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Copy `source` into the store under a fresh id.
    pub async fn store(&self, source: &Path, name: &str) -> Result<StoredBlob> {
        let dir = self.files_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(e, format!("creating {}", dir.display())))?;

        let id = self.mint_id();
        let location = dir.join(format!("{id}_{}", sanitize_name(name)));

        if let Err(e) = tokio::fs::copy(source, &location).await {
            if let Err(cleanup) = tokio::fs::remove_file(&location).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %location.display(), error = %cleanup, "failed to remove partial copy");
            }
            return Err(Error::io(
                e,
                format!("copying {} to {}", source.display(), location.display()),
            ));
        }

        debug!(file_id = %id, location = %location.display(), "content stored");
        Ok(StoredBlob { id, location })
    }

    /// Remove stored content. Already-absent content counts as removed.
    pub async fn delete(&self, location: &Path) -> Result<()> {
        match tokio::fs::remove_file(location).await {
            Ok(()) => {
                debug!(location = %location.display(), "content deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(location = %location.display(), "content already absent");
                Ok(())
            }
            Err(e) => Err(Error::io(e, format!("deleting {}", location.display()))),
        }
    }

    /// Bring remote content to a local path suitable for [`store`](Self::store).
    ///
    /// `file://` URLs resolve to the local file directly. HTTP downloads are
    /// written to a staging file that is removed on any failure, including
    /// a short body or cancellation.
    pub async fn fetch_remote(
        &self,
        url: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid file url {url:?}: {e}")))?;

        match parsed.scheme() {
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| Error::Validation(format!("invalid file url {url:?}")))?;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(Error::io(
                        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                        format!("reading {}", path.display()),
                    ));
                }
                Ok(FetchedFile {
                    path,
                    temporary: false,
                })
            }
            "http" | "https" => {
                let path = self.download(parsed, name, cancel).await?;
                Ok(FetchedFile {
                    path,
                    temporary: true,
                })
            }
            other => Err(Error::Validation(format!(
                "unsupported url scheme {other:?} for {name}"
            ))),
        }
    }

    async fn download(
        &self,
        url: reqwest::Url,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let dir = self.partial_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(e, format!("creating {}", dir.display())))?;
        let staging = dir.join(format!("{}_{}", nanoid::nanoid!(12), sanitize_name(name)));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Io {
                context: format!("downloading {name}"),
                source: std::io::Error::new(std::io::ErrorKind::Interrupted, "download cancelled"),
            }),
            result = self.download_to(url, &staging, name) => result,
        };

        if let Err(e) = &result {
            warn!(file = %name, error = %e, "download failed, discarding partial file");
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove partial file");
            }
        }
        result.map(|_| staging)
    }

    async fn download_to(&self, url: reqwest::Url, staging: &Path, name: &str) -> Result<()> {
        const ACTION: &str = "Downloading file";

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote_status(ACTION, status.as_u16(), None));
        }
        let expected = response.content_length();

        let mut file = tokio::fs::File::create(staging)
            .await
            .map_err(|e| Error::io(e, format!("creating {}", staging.display())))?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::from_reqwest(ACTION, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(e, format!("writing {}", staging.display())))?;
            received += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::io(e, format!("writing {}", staging.display())))?;

        if let Some(expected) = expected
            && received != expected
        {
            return Err(Error::io(
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("received {received} of {expected} bytes"),
                ),
                format!("downloading {name}"),
            ));
        }

        info!(url = %url, file = %name, bytes = received, "download complete");
        Ok(())
    }
}

/// Local copy of remote content.
#[derive(Debug)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Staging file owned by the store; remove once imported.
    pub temporary: bool,
}

impl FetchedFile {
    pub async fn discard(self) {
        if self.temporary
            && let Err(e) = tokio::fs::remove_file(&self.path).await
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove staging file");
        }
    }
}

/// MIME type for `name`, guessed from its extension.
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// Single path component derived from a display name.
pub(crate) fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "file".to_string(),
        trimmed => trimmed.to_string(),
    }
}
