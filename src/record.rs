use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata for a locally imported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
    pub location: PathBuf,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_shared: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(
        id: String,
        name: String,
        mime_type: Option<String>,
        location: PathBuf,
        date_added: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            mime_type,
            location,
            date_added,
            shared: false,
            last_shared: None,
        }
    }

    pub fn status(&self) -> RecordStatus {
        if self.shared {
            RecordStatus::Delivered
        } else {
            RecordStatus::Added
        }
    }

    /// Timestamp the status refers to: last share for delivered files.
    pub fn status_time(&self) -> DateTime<Utc> {
        match (self.shared, self.last_shared) {
            (true, Some(at)) => at,
            _ => self.date_added,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(self.mime_type.as_deref())
    }

    /// One-line summary, e.g. `report.pdf  Delivered 3 minutes ago`.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}  {} {}",
            self.name,
            self.status(),
            time_since(self.status_time(), now)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Added,
    Delivered,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Added => f.write_str("Added"),
            RecordStatus::Delivered => f.write_str("Delivered"),
        }
    }
}

/// A file reference as exchanged with the pickup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
}

/// Coarse content category derived from a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Pdf,
    Spreadsheet,
    Presentation,
    Document,
    Archive,
    Other,
}

impl FileKind {
    pub fn from_mime(mime: Option<&str>) -> Self {
        let Some(mime) = mime else {
            return FileKind::Other;
        };
        if mime.starts_with("image/") {
            FileKind::Image
        } else if mime.starts_with("video/") {
            FileKind::Video
        } else if mime.starts_with("audio/") {
            FileKind::Audio
        } else if mime.contains("pdf") {
            FileKind::Pdf
        } else if mime.contains("spreadsheet") || mime.contains("excel") {
            FileKind::Spreadsheet
        } else if mime.contains("presentation") || mime.contains("powerpoint") {
            FileKind::Presentation
        } else if mime.contains("word") || mime.contains("document") {
            FileKind::Document
        } else if mime.contains("zip") || mime.contains("compressed") {
            FileKind::Archive
        } else {
            FileKind::Other
        }
    }

    /// Photos and videos, which can go to the user's media folders.
    pub fn is_media(self) -> bool {
        matches!(self, FileKind::Image | FileKind::Video)
    }
}

/// Relative age of `then` as seen at `now`.
pub fn time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} minutes ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} hours ago");
    }
    format!("{} days ago", hours / 24)
}
