//! Built-in query-parameter providers that answer with raw image bytes

use crate::config::BuiltinModelConfig;
use crate::error::{AppError, Result};
use crate::provider::traits::{
    ImageJob, ProviderAdapter, ProviderPayload, ProviderRequest, ProviderResponse,
};
use crate::response::base64::{detect_image_format, mime_for_extension};

/// `{base}/{encoded prompt}?k=v&...`
fn prompt_url(base_url: &str, prompt: &str, params: &[(&str, String)]) -> String {
    let query = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}/{}?{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(prompt),
        query
    )
}

/// Accept a binary body, trusting magic bytes over a missing or generic content type
pub(crate) fn binary_payload(response: ProviderResponse) -> Result<ProviderPayload> {
    if response.body.is_empty() {
        return Err(AppError::EmptyResponse);
    }
    if response.is_image() {
        let content_type = response.content_type.unwrap_or_default();
        return Ok(ProviderPayload::Binary {
            bytes: response.body,
            content_type,
        });
    }
    match detect_image_format(&response.body) {
        Some(ext) => Ok(ProviderPayload::Binary {
            bytes: response.body,
            content_type: mime_for_extension(ext).to_string(),
        }),
        None => Err(AppError::UnsupportedPayload(format!(
            "expected image bytes, got {}",
            response.content_type.as_deref().unwrap_or("unknown content type")
        ))),
    }
}

/// Provider keyed by model plus guidance/strength, sized to explicit dimensions
pub struct GuidedQueryProvider {
    model: BuiltinModelConfig,
    base_url: String,
}

impl GuidedQueryProvider {
    pub fn new(model: BuiltinModelConfig, base_url: impl Into<String>) -> Self {
        Self {
            model,
            base_url: base_url.into(),
        }
    }
}

impl ProviderAdapter for GuidedQueryProvider {
    fn id(&self) -> &str {
        &self.model.id
    }

    fn display_name(&self) -> &str {
        &self.model.display_name
    }

    fn family(&self) -> &str {
        "guided"
    }

    fn build_request(&self, job: &ImageJob) -> Result<ProviderRequest> {
        let mut params = vec![
            ("model", self.model.upstream_model.clone()),
            ("width", job.width.to_string()),
            ("height", job.height.to_string()),
        ];
        if let Some(guidance) = self.model.guidance {
            params.push(("guidance", guidance.to_string()));
        }
        if let Some(strength) = self.model.strength {
            params.push(("strength", strength.to_string()));
        }
        if let Some(seed) = job.seed {
            params.push(("seed", seed.to_string()));
        }

        Ok(ProviderRequest::Get {
            url: prompt_url(&self.base_url, &job.prompt, &params),
        })
    }

    fn decode_response(&self, response: ProviderResponse) -> Result<ProviderPayload> {
        binary_payload(response)
    }
}

/// Provider keyed by model plus seed
pub struct SeededQueryProvider {
    model: BuiltinModelConfig,
    base_url: String,
}

impl SeededQueryProvider {
    pub fn new(model: BuiltinModelConfig, base_url: impl Into<String>) -> Self {
        Self {
            model,
            base_url: base_url.into(),
        }
    }
}

impl ProviderAdapter for SeededQueryProvider {
    fn id(&self) -> &str {
        &self.model.id
    }

    fn display_name(&self) -> &str {
        &self.model.display_name
    }

    fn family(&self) -> &str {
        "seeded"
    }

    fn pins_random_seed(&self) -> bool {
        true
    }

    fn build_request(&self, job: &ImageJob) -> Result<ProviderRequest> {
        let seed = job.seed.unwrap_or_else(|| u64::from(rand::random::<u32>()));
        let params = [
            ("model", self.model.upstream_model.clone()),
            ("seed", seed.to_string()),
            ("width", job.width.to_string()),
            ("height", job.height.to_string()),
            ("nologo", "true".to_string()),
        ];

        Ok(ProviderRequest::Get {
            url: prompt_url(&self.base_url, &job.prompt, &params),
        })
    }

    fn decode_response(&self, response: ProviderResponse) -> Result<ProviderPayload> {
        binary_payload(response)
    }
}
