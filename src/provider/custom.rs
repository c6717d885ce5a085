//! User-configured providers: Hugging Face models and arbitrary JSON APIs

use serde_json::{json, Map, Value};

use crate::error::{AppError, Result};
use crate::models::{CustomModelConfig, CustomModelKind, RequestFormat};
use crate::provider::query::binary_payload;
use crate::provider::traits::{
    ImageJob, ProviderAdapter, ProviderPayload, ProviderRequest, ProviderResponse,
};
use crate::response::base64::detect_image_format;
use crate::response::extract::find_image_payload;

fn auth_headers(api_key: Option<&str>) -> Vec<(String, String)> {
    match api_key {
        Some(key) => vec![("Authorization".to_string(), format!("Bearer {}", key))],
        None => Vec::new(),
    }
}

/// Interpret a response whose encoding is not known in advance
pub(crate) fn decode_flexible(response: ProviderResponse) -> Result<ProviderPayload> {
    if response.body.is_empty() {
        return Err(AppError::EmptyResponse);
    }
    if response.is_image() || detect_image_format(&response.body).is_some() {
        return binary_payload(response);
    }

    if let Ok(value) = serde_json::from_slice::<Value>(&response.body) {
        // Bare JSON string holding the payload itself
        if let Value::String(text) = &value {
            let text = text.trim();
            if !text.is_empty() {
                return Ok(ProviderPayload::Encoded(text.to_string()));
            }
        }
        return find_image_payload(&value).map(ProviderPayload::Encoded).ok_or_else(|| {
            AppError::UnsupportedPayload("no image field found in JSON response".to_string())
        });
    }

    let text = String::from_utf8_lossy(&response.body).trim().to_string();
    if text.is_empty() {
        return Err(AppError::EmptyResponse);
    }
    Ok(ProviderPayload::Encoded(text))
}

/// Hosted Hugging Face inference model
pub struct HuggingFaceProvider {
    registry_id: String,
    config: CustomModelConfig,
    base_url: String,
}

impl HuggingFaceProvider {
    pub fn new(config: CustomModelConfig, base_url: impl Into<String>) -> Self {
        Self {
            registry_id: config.registry_id(),
            config,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        let target = self.config.api_url().trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                target.trim_start_matches('/')
            )
        }
    }
}

impl ProviderAdapter for HuggingFaceProvider {
    fn id(&self) -> &str {
        &self.registry_id
    }

    fn display_name(&self) -> &str {
        &self.config.name
    }

    fn family(&self) -> &str {
        "huggingface"
    }

    fn merges_negative_prompt(&self) -> bool {
        false
    }

    fn build_request(&self, job: &ImageJob) -> Result<ProviderRequest> {
        // Only options that were actually supplied
        let mut parameters = Map::new();
        if let Some(negative) = job.negative_prompt.as_deref().filter(|n| !n.trim().is_empty()) {
            parameters.insert("negative_prompt".to_string(), json!(negative.trim()));
        }
        parameters.insert("width".to_string(), json!(job.width));
        parameters.insert("height".to_string(), json!(job.height));
        if let Some(seed) = job.seed {
            parameters.insert("seed".to_string(), json!(seed));
        }

        Ok(ProviderRequest::Post {
            url: self.endpoint(),
            headers: auth_headers(self.config.api_key()),
            body: json!({
                "inputs": job.prompt,
                "parameters": Value::Object(parameters),
            }),
        })
    }

    fn decode_response(&self, response: ProviderResponse) -> Result<ProviderPayload> {
        decode_flexible(response)
    }
}

/// Arbitrary third-party API with an unknown contract
pub struct CustomApiProvider {
    registry_id: String,
    config: CustomModelConfig,
}

impl CustomApiProvider {
    pub fn new(config: CustomModelConfig) -> Self {
        Self {
            registry_id: config.registry_id(),
            config,
        }
    }

    fn standard_body(&self, job: &ImageJob) -> Value {
        let mut body = Map::new();
        body.insert("prompt".to_string(), json!(job.prompt));
        body.insert("inputs".to_string(), json!(job.prompt));
        if let Some(negative) = job.negative_prompt.as_deref().filter(|n| !n.trim().is_empty()) {
            body.insert("negative_prompt".to_string(), json!(negative.trim()));
            body.insert("negativePrompt".to_string(), json!(negative.trim()));
        }
        body.insert("width".to_string(), json!(job.width));
        body.insert("height".to_string(), json!(job.height));
        if let Some(seed) = job.seed {
            body.insert("seed".to_string(), json!(seed));
        }
        Value::Object(body)
    }

    fn openai_body(&self, job: &ImageJob) -> Value {
        let mut prompt = job.prompt.clone();
        if let Some(negative) = job.negative_prompt.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str(", avoiding ");
            prompt.push_str(negative.trim());
        }
        json!({
            "prompt": prompt,
            "n": 1,
            "size": format!("{}x{}", job.width, job.height),
            "response_format": "b64_json",
        })
    }
}

impl ProviderAdapter for CustomApiProvider {
    fn id(&self) -> &str {
        &self.registry_id
    }

    fn display_name(&self) -> &str {
        &self.config.name
    }

    fn family(&self) -> &str {
        "custom_api"
    }

    fn merges_negative_prompt(&self) -> bool {
        false
    }

    fn build_request(&self, job: &ImageJob) -> Result<ProviderRequest> {
        let body = match self.config.request_format {
            RequestFormat::Standard => self.standard_body(job),
            RequestFormat::OpenAiCompatible => self.openai_body(job),
        };

        Ok(ProviderRequest::Post {
            url: self.config.api_url().trim().to_string(),
            headers: auth_headers(self.config.api_key()),
            body,
        })
    }

    fn decode_response(&self, response: ProviderResponse) -> Result<ProviderPayload> {
        decode_flexible(response)
    }
}

/// Build the adapter matching a custom model's kind
pub fn adapter_for(
    config: CustomModelConfig,
    huggingface_base_url: &str,
) -> Box<dyn ProviderAdapter> {
    match config.kind {
        CustomModelKind::HuggingFace { .. } => {
            Box::new(HuggingFaceProvider::new(config, huggingface_base_url))
        }
        CustomModelKind::CustomApi { .. } => Box::new(CustomApiProvider::new(config)),
    }
}
