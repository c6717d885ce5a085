//! Export of generated images to local files

use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::error::Result;
use crate::response::base64::{detect_image_format, extension_for_mime};
use crate::response::handles::ImageBlob;

/// Writes images into an output directory
pub struct FileHandler {
    storage_path: PathBuf,
}

impl FileHandler {
    /// Create a new file handler
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Write an image as `{stem}.{ext}`, preferring the sniffed format over the declared one
    pub async fn save(&self, stem: &str, blob: &ImageBlob) -> Result<PathBuf> {
        self.ensure_storage_dir().await?;

        let ext = detect_image_format(&blob.bytes)
            .unwrap_or_else(|| extension_for_mime(&blob.mime_type));
        let file_path = self.storage_path.join(format!("{}.{}", stem, ext));

        fs::write(&file_path, &blob.bytes[..]).await?;
        debug!(path = ?file_path, size = blob.bytes.len(), "Saved image file");

        Ok(file_path)
    }
}
