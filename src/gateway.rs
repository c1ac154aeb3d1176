//! Hands stored files to the desktop's open/share affordances.
//!
//! Strategies are tried in priority order; the first success wins. When all
//! of them fail the final fallback (reveal in the file manager) runs, and
//! only its failure is reported as [`Error::Open`].
//!
//! Strategies do blocking file system work and spawn processes, so async
//! callers run [`SharingGateway::open`] on the blocking pool.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::FileKind;
use crate::store::sanitize_name;

/// A stored file about to be opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenTarget<'a> {
    pub location: &'a Path,
    pub mime_type: Option<&'a str>,
    pub name: &'a str,
}

pub trait OpenStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(&self, target: &OpenTarget<'_>) -> io::Result<()>;
}

/// User-configured preview application.
pub struct PreviewApp {
    pub app: Option<String>,
}

impl OpenStrategy for PreviewApp {
    fn name(&self) -> &'static str {
        "preview app"
    }

    fn attempt(&self, target: &OpenTarget<'_>) -> io::Result<()> {
        let Some(app) = &self.app else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no preview app configured",
            ));
        };
        open::with_detached(target.location, app)
    }
}

/// Copies photos and videos into the user's media folders and opens the copy.
pub struct MediaLibrary {
    pub pictures: Option<PathBuf>,
    pub videos: Option<PathBuf>,
}

impl MediaLibrary {
    pub fn from_user_dirs() -> Self {
        Self {
            pictures: dirs::picture_dir(),
            videos: dirs::video_dir(),
        }
    }

    /// Copy the target into the matching media folder. Never overwrites an
    /// existing file of the same name.
    pub fn import(&self, target: &OpenTarget<'_>) -> io::Result<PathBuf> {
        let dir = match FileKind::from_mime(target.mime_type) {
            FileKind::Image => self.pictures.as_ref(),
            FileKind::Video => self.videos.as_ref(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "not a photo or video",
                ));
            }
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no media folder"))?;

        std::fs::create_dir_all(dir)?;
        let mut dest = dir.join(sanitize_name(target.name));
        if dest.exists() {
            let stored_name = target
                .location
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad location"))?;
            dest = dir.join(stored_name);
        }
        if dest.parent() != Some(dir.as_path()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside {}", dest.display(), dir.display()),
            ));
        }
        if !dest.exists() {
            std::fs::copy(target.location, &dest)?;
        }
        Ok(dest)
    }
}

impl OpenStrategy for MediaLibrary {
    fn name(&self) -> &'static str {
        "media library"
    }

    fn attempt(&self, target: &OpenTarget<'_>) -> io::Result<()> {
        let copy = self.import(target)?;
        debug!(path = %copy.display(), "saved to media library");
        open::that_detached(&copy)
    }
}

/// The platform's default handler for the file type.
pub struct SystemViewer;

impl OpenStrategy for SystemViewer {
    fn name(&self) -> &'static str {
        "system viewer"
    }

    fn attempt(&self, target: &OpenTarget<'_>) -> io::Result<()> {
        open::that_detached(target.location)
    }
}

/// Opens the containing folder so the user can share the file by hand.
pub struct RevealInFolder;

impl OpenStrategy for RevealInFolder {
    fn name(&self) -> &'static str {
        "reveal in folder"
    }

    fn attempt(&self, target: &OpenTarget<'_>) -> io::Result<()> {
        let parent = target
            .location
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no parent directory"))?;
        open::that_detached(parent)
    }
}

pub struct SharingGateway {
    strategies: Vec<Box<dyn OpenStrategy>>,
    fallback: Box<dyn OpenStrategy>,
}

impl SharingGateway {
    pub fn new(strategies: Vec<Box<dyn OpenStrategy>>, fallback: Box<dyn OpenStrategy>) -> Self {
        Self {
            strategies,
            fallback,
        }
    }

    /// Default chain: preview app, media library, system viewer, then
    /// reveal in folder.
    pub fn desktop(preview_app: Option<String>) -> Self {
        Self::new(
            vec![
                Box::new(PreviewApp { app: preview_app }),
                Box::new(MediaLibrary::from_user_dirs()),
                Box::new(SystemViewer),
            ],
            Box::new(RevealInFolder),
        )
    }

    /// Open `target`, returning the name of the strategy that succeeded.
    pub fn open(&self, target: &OpenTarget<'_>) -> Result<&'static str> {
        if !target.location.exists() {
            return Err(Error::io(
                io::Error::new(io::ErrorKind::NotFound, "file doesn't exist or has been moved"),
                format!("opening {}", target.name),
            ));
        }

        let mut attempts = Vec::new();
        for strategy in self.strategies.iter().chain(std::iter::once(&self.fallback)) {
            match strategy.attempt(target) {
                Ok(()) => {
                    info!(file = %target.name, strategy = strategy.name(), "file handed off");
                    return Ok(strategy.name());
                }
                Err(e) => {
                    debug!(file = %target.name, strategy = strategy.name(), error = %e, "strategy failed");
                    attempts.push(format!("{}: {e}", strategy.name()));
                }
            }
        }

        warn!(file = %target.name, attempts = attempts.len(), "no strategy could open file");
        Err(Error::Open {
            name: target.name.to_string(),
            attempts,
        })
    }
}
