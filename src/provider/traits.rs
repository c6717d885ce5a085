//! Common traits and types for image generation providers

use serde_json::Value;

use crate::error::Result;

/// One image's worth of work handed to a provider
#[derive(Debug, Clone)]
pub struct ImageJob {
    /// Position within the batch, used for attribution
    pub index: usize,

    /// Composed prompt
    pub prompt: String,

    /// Negative prompt for providers that accept it as a separate field
    pub negative_prompt: Option<String>,

    pub width: u32,
    pub height: u32,

    /// Pinned seed, if any
    pub seed: Option<u64>,
}

/// Wire request produced by an adapter
#[derive(Debug, Clone)]
pub enum ProviderRequest {
    /// Direct binary image fetch
    Get { url: String },

    /// JSON POST to a configurable endpoint
    Post {
        url: String,
        headers: Vec<(String, String)>,
        body: Value,
    },
}

impl ProviderRequest {
    pub fn url(&self) -> &str {
        match self {
            ProviderRequest::Get { url } => url,
            ProviderRequest::Post { url, .. } => url,
        }
    }
}

/// Raw response of a successful (2xx, non-empty) provider call
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// Image payload extracted from a provider response, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderPayload {
    /// Raw image bytes
    Binary { bytes: Vec<u8>, content_type: String },

    /// Data URL, bare base64, or an http(s) URL to fetch
    Encoded(String),
}

/// Capability set of one provider family
pub trait ProviderAdapter: Send + Sync {
    /// Model id the adapter is registered under
    fn id(&self) -> &str;

    /// Name shown to users and stored with images
    fn display_name(&self) -> &str;

    /// Provider family label for listings and logs
    fn family(&self) -> &str;

    /// Whether the negative prompt is merged into the prompt text
    fn merges_negative_prompt(&self) -> bool {
        true
    }

    /// Whether a random seed must be chosen when none is pinned
    fn pins_random_seed(&self) -> bool {
        false
    }

    /// Build the wire request for one image
    fn build_request(&self, job: &ImageJob) -> Result<ProviderRequest>;

    /// Interpret a successful response
    fn decode_response(&self, response: ProviderResponse) -> Result<ProviderPayload>;
}
