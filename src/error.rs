//! Error type shared by every pickup component.
//!
//! Local failures (`Io`, `Storage`) are logged with detail where they happen
//! and surfaced to the user through [`Error::user_message`]. Remote failures
//! carry the action that was attempted so callers can name it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Local file system failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Registry document could not be persisted.
    #[error("registry storage error: {0}")]
    Storage(String),

    /// Exchange service call failed.
    #[error("{action} failed{}{}", status_suffix(.status, .timeout), detail_suffix(.detail))]
    Remote {
        action: &'static str,
        status: Option<u16>,
        detail: Option<String>,
        timeout: bool,
    },

    /// No registry entry with this id.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Every open/share strategy failed.
    #[error("could not open {name} (tried {})", .attempts.join(", "))]
    Open { name: String, attempts: Vec<String> },

    /// Malformed pickup code input.
    #[error("{0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>, timeout: &bool) -> String {
    match (status, timeout) {
        (_, true) => ": request timed out".to_string(),
        (Some(status), false) => format!(": {status}"),
        (None, false) => String::new(),
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!(" {detail}"),
        _ => String::new(),
    }
}

impl Error {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn remote_status(action: &'static str, status: u16, detail: Option<String>) -> Self {
        Self::Remote {
            action,
            status: Some(status),
            detail,
            timeout: false,
        }
    }

    /// Map a transport-level `reqwest` failure.
    pub fn from_reqwest(action: &'static str, err: reqwest::Error) -> Self {
        Self::Remote {
            action,
            status: err.status().map(|s| s.as_u16()),
            detail: Some(err.to_string()),
            timeout: err.is_timeout(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Remote { timeout: true, .. })
    }

    /// Short message suitable for showing to a user. Detail belongs in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Io { .. } | Self::Storage(_) => {
                "Failed to load your files. Please try again.".to_string()
            }
            Self::Remote { action, timeout: true, .. } => {
                format!("{action} timed out. Check your connection and try again.")
            }
            Self::Remote { .. } => self.to_string(),
            Self::NotFound(_) => "File not found".to_string(),
            Self::Open { .. } => "Failed to open file. Try sharing instead.".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Config(msg) => format!("Invalid configuration: {msg}"),
        }
    }
}
