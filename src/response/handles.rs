//! Tracked object handles for in-memory image data

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const HANDLE_SCHEME: &str = "blob:artgen/";

/// In-memory image referenced by an object handle
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

/// Every handle created for a session; anything not released here leaks
/// for the session's lifetime
#[derive(Debug, Clone, Default)]
pub struct ObjectHandles {
    blobs: Arc<DashMap<String, ImageBlob>>,
}

impl ObjectHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bytes and return a fresh handle
    pub fn create(&self, bytes: Vec<u8>, mime_type: impl Into<String>) -> String {
        let url = format!("{}{}", HANDLE_SCHEME, Uuid::new_v4());
        let blob = ImageBlob {
            bytes: Arc::from(bytes),
            mime_type: mime_type.into(),
        };
        debug!(handle = %url, size = blob.bytes.len(), "Created object handle");
        self.blobs.insert(url.clone(), blob);
        url
    }

    pub fn get(&self, url: &str) -> Option<ImageBlob> {
        self.blobs.get(url).map(|entry| entry.value().clone())
    }

    /// Release one handle; releasing twice is a no-op returning `false`
    pub fn release(&self, url: &str) -> bool {
        let released = self.blobs.remove(url).is_some();
        if released {
            debug!(handle = %url, "Released object handle");
        }
        released
    }

    /// Release every tracked handle, returning how many were live
    pub fn release_all(&self) -> usize {
        let count = self.blobs.len();
        self.blobs.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
