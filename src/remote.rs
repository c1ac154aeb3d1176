//! Client for the pickup exchange service.
//!
//! Four single-shot calls against a base URL. There are no retries; every
//! request is bounded by the configured timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::code::PickupCode;
use crate::error::{Error, Result};
use crate::record::FileRef;

pub const FILES_PATH: &str = "/api/expo/files";
pub const EXIST_PATH: &str = "/api/expo/exist";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<FileRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub code: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FilesResponse {
    #[serde(default)]
    pub files: Option<Vec<FileRef>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Files(Vec<FileRef>),
    /// Unknown code or a code with no files; the service does not let the
    /// client tell these apart.
    NoFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Removed,
    AlreadyGone,
}

#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    base: reqwest::Url,
}

impl ExchangeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("base_url {base_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::from_reqwest("Creating HTTP client", e))?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("joining {path} onto {}: {e}", self.base)))
    }

    /// Register `files` with the service and obtain a pickup code.
    pub async fn upload(&self, files: &[FileRef]) -> Result<PickupCode> {
        const ACTION: &str = "Storing files";

        let response = self
            .http
            .post(self.endpoint(FILES_PATH)?)
            .json(&UploadRequest {
                files: files.to_vec(),
            })
            .send()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "upload rejected");
            return Err(Error::remote_status(ACTION, status.as_u16(), None));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;
        let code = PickupCode::parse(&body.code).map_err(|_| Error::Remote {
            action: ACTION,
            status: Some(status.as_u16()),
            detail: Some(format!("malformed code {:?}", body.code)),
            timeout: false,
        })?;

        info!(code = %code, files = files.len(), "files registered with exchange");
        Ok(code)
    }

    /// Files registered under `code`.
    pub async fn fetch_by_code(&self, code: &PickupCode) -> Result<FetchOutcome> {
        const ACTION: &str = "Getting files";

        let response = self
            .http
            .get(self.endpoint(FILES_PATH)?)
            .query(&[("code", code.as_str())])
            .send()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(code = %code, "code not found");
            return Ok(FetchOutcome::NoFiles);
        }
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error);
            return Err(Error::remote_status(ACTION, status.as_u16(), detail));
        }

        let body: FilesResponse = response
            .json()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;
        match body.files {
            Some(files) if !files.is_empty() => {
                debug!(code = %code, files = files.len(), "files fetched");
                Ok(FetchOutcome::Files(files))
            }
            _ => Ok(FetchOutcome::NoFiles),
        }
    }

    /// Whether the service knows `code`.
    pub async fn exists(&self, code: &PickupCode) -> Result<bool> {
        const ACTION: &str = "Checking code";

        let response = self
            .http
            .get(self.endpoint(EXIST_PATH)?)
            .query(&[("code", code.as_str())])
            .send()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote_status(ACTION, status.as_u16(), None));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;
        Ok(existence_flag(&body))
    }

    /// Remove `code` and its files from the service.
    pub async fn delete_by_code(&self, code: &PickupCode) -> Result<Deleted> {
        const ACTION: &str = "Deleting files";

        let response = self
            .http
            .delete(self.endpoint(FILES_PATH)?)
            .query(&[("code", code.as_str())])
            .send()
            .await
            .map_err(|e| Error::from_reqwest(ACTION, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(code = %code, "code already deleted");
            return Ok(Deleted::AlreadyGone);
        }
        if !status.is_success() {
            return Err(Error::remote_status(ACTION, status.as_u16(), None));
        }

        info!(code = %code, "code deleted");
        Ok(Deleted::Removed)
    }
}

/// Interpret an existence payload: a bare boolean or an object with an
/// `exists` field.
fn existence_flag(body: &serde_json::Value) -> bool {
    match body {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Object(map) => map
            .get("exists")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}
