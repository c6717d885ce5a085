//! Response handling module - payload decoding, object handles, and file export

pub mod base64;
pub mod extract;
pub mod file;
pub mod handles;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::provider::{ImageJob, ProviderClient, ProviderPayload};
use crate::models::GeneratedImage;
use handles::ObjectHandles;

/// Encoding of a string payload, detected by signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// `data:image/...;base64,...`
    DataUrl,
    /// Bare base64 starting with the JPEG signature
    JpegBase64,
    /// Bare base64 starting with the PNG signature
    PngBase64,
    /// `http(s)://` URL to re-fetch
    RemoteUrl,
}

impl PayloadEncoding {
    pub fn detect(payload: &str) -> Option<Self> {
        let payload = payload.trim_start();
        if payload.starts_with("data:image/") {
            Some(Self::DataUrl)
        } else if payload.starts_with("/9j/") {
            Some(Self::JpegBase64)
        } else if payload.starts_with("iVBOR") {
            Some(Self::PngBase64)
        } else if payload.starts_with("http://") || payload.starts_with("https://") {
            Some(Self::RemoteUrl)
        } else {
            None
        }
    }
}

/// Decoded image bytes with their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

fn sniffed_mime(bytes: &[u8], declared: &str) -> String {
    let declared = declared.split(';').next().unwrap_or_default().trim();
    if declared.starts_with("image/") {
        declared.to_string()
    } else {
        base64::detect_image_format(bytes)
            .map(base64::mime_for_extension)
            .unwrap_or("image/png")
            .to_string()
    }
}

/// Turn a provider payload into image bytes, re-fetching remote URLs
pub async fn resolve_payload(client: &ProviderClient, payload: ProviderPayload) -> Result<ImageBytes> {
    match payload {
        ProviderPayload::Binary {
            bytes,
            content_type,
        } => {
            if bytes.is_empty() {
                return Err(AppError::EmptyResponse);
            }
            let mime_type = sniffed_mime(&bytes, &content_type);
            Ok(ImageBytes { bytes, mime_type })
        }
        ProviderPayload::Encoded(text) => {
            let text = text.trim();
            match PayloadEncoding::detect(text) {
                Some(PayloadEncoding::DataUrl) => {
                    let mime_type = base64::get_mime_from_data_url(text)
                        .unwrap_or("image/png")
                        .to_string();
                    let bytes = base64::decode(text)?;
                    non_empty(ImageBytes { bytes, mime_type })
                }
                Some(PayloadEncoding::JpegBase64) => non_empty(ImageBytes {
                    bytes: base64::decode(text)?,
                    mime_type: "image/jpeg".to_string(),
                }),
                Some(PayloadEncoding::PngBase64) => non_empty(ImageBytes {
                    bytes: base64::decode(text)?,
                    mime_type: "image/png".to_string(),
                }),
                Some(PayloadEncoding::RemoteUrl) => {
                    let response = client.fetch_url(text).await?;
                    let declared = response.content_type.clone().unwrap_or_default();
                    if !response.is_image() && base64::detect_image_format(&response.body).is_none() {
                        return Err(AppError::UnsupportedPayload(format!(
                            "referenced URL did not return an image ({})",
                            if declared.is_empty() { "no content type" } else { declared.as_str() }
                        )));
                    }
                    let mime_type = sniffed_mime(&response.body, &declared);
                    Ok(ImageBytes {
                        bytes: response.body,
                        mime_type,
                    })
                }
                None => {
                    let preview: String = text.chars().take(24).collect();
                    Err(AppError::UnsupportedPayload(format!(
                        "unrecognized encoding starting with '{}'",
                        preview
                    )))
                }
            }
        }
    }
}

fn non_empty(image: ImageBytes) -> Result<ImageBytes> {
    if image.bytes.is_empty() {
        Err(AppError::EmptyResponse)
    } else {
        Ok(image)
    }
}

/// Wrap decoded bytes into a tracked image for the job
pub fn normalize(
    image: ImageBytes,
    job: &ImageJob,
    model: &str,
    handles: &ObjectHandles,
) -> GeneratedImage {
    let object_url = handles.create(image.bytes, image.mime_type.clone());
    GeneratedImage {
        id: Uuid::new_v4().to_string(),
        object_url,
        prompt: job.prompt.clone(),
        negative_prompt: job.negative_prompt.clone(),
        model: model.to_string(),
        width: job.width,
        height: job.height,
        seed: job.seed,
        mime_type: image.mime_type,
        created_at: Utc::now(),
    }
}
