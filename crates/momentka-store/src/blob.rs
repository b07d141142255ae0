//! Content-addressed blob host for event media.
//!
//! Uploads land under `<root>/image/` or `<root>/video/` named by the
//! SHA-256 of their bytes, so the published URL carries the kind marker
//! that [`MediaItem::from_url`] reads back out. Identical uploads share
//! one blob.

use momentka_core::{MediaItem, MediaKind};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
/// File extensions accepted as video clips.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi"];

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// A blob that has been written and published.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub url: String,
    pub kind: MediaKind,
    pub path: PathBuf,
}

impl StoredBlob {
    pub fn media_item(&self) -> MediaItem {
        MediaItem::from_url(self.url.as_str())
    }
}

/// Writes media blobs to disk and hands back their URLs.
pub struct BlobStore {
    root: PathBuf,
    base_url: Option<String>,
}

impl BlobStore {
    /// Host blobs under `root`, publishing `file://` URLs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
        }
    }

    /// Publish URLs under an HTTP base instead of `file://` paths.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        self.base_url = Some(base);
        self
    }

    /// Ingest a media file from disk.
    pub fn store_file(&self, source: &Path) -> Result<StoredBlob, BlobError> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| BlobError::UnsupportedMedia(source.display().to_string()))?;
        let bytes = fs::read(source)?;
        self.store_bytes(&bytes, &ext)
    }

    /// Ingest media bytes under a (lowercase) file extension.
    pub fn store_bytes(&self, bytes: &[u8], extension: &str) -> Result<StoredBlob, BlobError> {
        let kind = kind_for_extension(extension)
            .ok_or_else(|| BlobError::UnsupportedMedia(extension.to_string()))?;
        let segment = match kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        };

        let name = format!("{}.{}", hex_digest(bytes), extension);
        let dir = self.root.join(segment);
        let target = dir.join(&name);

        if target.exists() {
            tracing::debug!(blob = %name, "blob already stored, reusing");
        } else {
            fs::create_dir_all(&dir)?;
            // Write-then-rename so a crash never leaves a half blob at the
            // published path.
            let tmp = dir.join(format!(".{name}.partial"));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &target)?;
            tracing::debug!(blob = %name, bytes = bytes.len(), "blob stored");
        }

        let url = match &self.base_url {
            Some(base) => format!("{base}/{segment}/{name}"),
            None => format!("file://{}", target.display()),
        };

        Ok(StoredBlob {
            url,
            kind,
            path: target,
        })
    }
}

/// Classify a (lowercase) extension, `None` when it is neither kind.
pub fn kind_for_extension(extension: &str) -> Option<MediaKind> {
    if IMAGE_EXTENSIONS.contains(&extension) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&extension) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
