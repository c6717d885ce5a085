//! Client for the community gallery backend
//!
//! Publishing after a generation is fire-and-forget: at most one attempt, no
//! retry, failures only logged. Saving is awaited and reported to the caller.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::GalleryConfig;
use crate::error::{AppError, Result};
use crate::models::{CustomModelConfig, PersistedImage, SavedImage};

/// REST client for `/api/...` gallery endpoints
#[derive(Clone)]
pub struct GalleryClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    author_name: String,
}

impl GalleryClient {
    pub fn new(config: &GalleryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            author_name: config.author_name.clone(),
        })
    }

    pub fn author_name(&self) -> &str {
        &self.author_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| AppError::Persistence(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Persistence(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }
        Ok(response)
    }

    /// Append an image to the community gallery
    pub async fn publish(&self, image: &PersistedImage) -> Result<()> {
        self.send(self.client.post(self.url("/api/images")).json(image), "Gallery upload")
            .await?;
        debug!(model = %image.model, "Published image to gallery");
        Ok(())
    }

    /// Publish in a detached task that nobody joins
    pub fn upload_detached(&self, image: PersistedImage) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.publish(&image).await {
                error!(error = %e, model = %image.model, "Gallery upload failed");
            }
        })
    }

    /// Store an image in the user's saved collection
    pub async fn save_image(&self, image: &SavedImage) -> Result<()> {
        self.send(
            self.client.post(self.url("/api/saved-images")).json(image),
            "Saving image",
        )
        .await?;
        debug!(image_id = %image.image_id, "Saved image");
        Ok(())
    }

    /// Custom models registered by a user
    pub async fn fetch_custom_models(&self, user_id: &str) -> Result<Vec<CustomModelConfig>> {
        let response = self
            .send(
                self.client
                    .get(self.url("/api/custom-models"))
                    .query(&[("userId", user_id)]),
                "Loading custom models",
            )
            .await?;

        response
            .json::<Vec<CustomModelConfig>>()
            .await
            .map_err(|e| AppError::Persistence(format!("Invalid custom model list: {}", e)))
    }
}
