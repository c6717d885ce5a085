//! Request, image, and custom model types shared across the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, Result};

/// Dimensions must be multiples of this value
pub const DIMENSION_STEP: u32 = 64;

/// Seed selection for a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seed {
    #[default]
    Random,
    Fixed(u64),
}

impl Seed {
    /// Seed for the image at `index` within a batch
    pub fn for_index(&self, index: usize) -> Option<u64> {
        match self {
            Seed::Random => None,
            Seed::Fixed(seed) => Some(seed.wrapping_add(index as u64)),
        }
    }
}

impl Serialize for Seed {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Seed::Random => serializer.serialize_str("random"),
            Seed::Fixed(seed) => serializer.serialize_u64(*seed),
        }
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(seed) => Ok(Seed::Fixed(seed)),
            Raw::Text(text) if text.eq_ignore_ascii_case("random") => Ok(Seed::Random),
            Raw::Text(text) => text
                .trim()
                .parse()
                .map(Seed::Fixed)
                .map_err(|_| serde::de::Error::custom(format!("invalid seed '{}'", text))),
        }
    }
}

/// Free-text metadata attached to user-defined or community styles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub inspiration: Option<String>,
    #[serde(default)]
    pub characteristics: Option<String>,
}

/// Style chosen for a generation: a preset name or a user style with metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSelection {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<StyleMetadata>,
}

impl StyleSelection {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }
}

/// A logical generation request as submitted by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub base_prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub style: StyleSelection,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub seed: Seed,
    pub model_id: String,
    pub count: u32,
}

impl GenerationRequest {
    pub fn new(base_prompt: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            negative_prompt: None,
            place: None,
            style: StyleSelection::default(),
            width: 1024,
            height: 1024,
            seed: Seed::Random,
            model_id: model_id.into(),
            count: 1,
        }
    }

    /// Reject requests that must never reach a provider
    pub fn validate(&self, max_count: u32) -> Result<()> {
        if self.base_prompt.trim().is_empty() {
            return Err(AppError::InvalidRequest("Prompt cannot be empty".to_string()));
        }
        for (label, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % DIMENSION_STEP != 0 {
                return Err(AppError::InvalidRequest(format!(
                    "{} must be a positive multiple of {}, got {}",
                    label, DIMENSION_STEP, value
                )));
            }
        }
        if self.count == 0 {
            return Err(AppError::InvalidRequest(
                "At least one image must be requested".to_string(),
            ));
        }
        if self.count > max_count {
            return Err(AppError::InvalidRequest(format!(
                "Too many images requested: {} (maximum {})",
                self.count, max_count
            )));
        }
        Ok(())
    }
}

/// An image produced by a successful provider call, owned by one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    /// Session-local handle, released on removal or teardown
    pub object_url: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Body shape used for generic custom APIs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestFormat {
    #[default]
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

/// Provider-specific part of a custom model configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum CustomModelKind {
    #[serde(rename = "custom_api")]
    CustomApi { api_url: String, api_key: String },
    #[serde(rename = "huggingface")]
    HuggingFace {
        /// Hugging Face model id, e.g. `stabilityai/stable-diffusion-xl-base-1.0`
        api_url: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

/// A user-registered provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModelConfig {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: CustomModelKind,
    #[serde(default)]
    pub request_format: RequestFormat,
}

impl CustomModelConfig {
    /// Id under which the model is selectable alongside built-in providers
    pub fn registry_id(&self) -> String {
        format!("custom-{}", self.id)
    }

    pub fn api_url(&self) -> &str {
        match &self.kind {
            CustomModelKind::CustomApi { api_url, .. } => api_url,
            CustomModelKind::HuggingFace { api_url, .. } => api_url,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match &self.kind {
            CustomModelKind::CustomApi { api_key, .. } => Some(api_key.as_str()),
            CustomModelKind::HuggingFace { api_key, .. } => api_key.as_deref(),
        }
        .map(str::trim)
        .filter(|key| !key.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidModelConfig("id cannot be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidModelConfig(format!(
                "model '{}' needs a name",
                self.id
            )));
        }
        if self.api_url().trim().is_empty() {
            return Err(AppError::InvalidModelConfig(format!(
                "model '{}' needs an API URL or model id",
                self.id
            )));
        }
        if let CustomModelKind::CustomApi { api_key, .. } = &self.kind {
            if api_key.trim().is_empty() {
                return Err(AppError::InvalidModelConfig(format!(
                    "custom API model '{}' requires an API key",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Moderation state of a published image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Approved,
    #[default]
    Pending,
    Rejected,
}

/// Gallery record appended after a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedImage {
    pub prompt: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// Base64 data URL
    pub image_data: String,
    pub style: Option<String>,
    pub author_name: String,
    pub status: ModerationStatus,
}

/// Payload for the user's "save" action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImage {
    pub image_id: String,
    pub prompt: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub image_data: String,
}
