//! HTTP execution of provider requests

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::provider::traits::{ProviderRequest, ProviderResponse};

/// Longest error body kept in `HttpStatus` errors
const MAX_ERROR_BODY: usize = 300;

/// Body of a 503 returned while a hosted model is still loading
#[derive(Debug, Deserialize)]
struct LoadingBody {
    estimated_time: Option<f64>,
}

/// Executes provider requests and classifies failures
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
}

impl ProviderClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("artgen-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send a provider request; the caller owns the timeout
    pub async fn execute(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let builder = match request {
            ProviderRequest::Get { url } => self.client.get(url),
            ProviderRequest::Post { url, headers, body } => {
                let mut builder = self.client.post(url).json(body);
                for (name, value) in headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder
            }
        };

        debug!(url = %request.url(), "Sending provider request");
        let response = builder.send().await.map_err(classify)?;
        read_response(response).await
    }

    /// Fetch an image referenced by URL in a provider response
    pub async fn fetch_url(&self, url: &str) -> Result<ProviderResponse> {
        debug!(url = %url, "Fetching referenced image");
        let response = self.client.get(url).send().await.map_err(classify)?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<ProviderResponse> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await.map_err(classify)?.to_vec();

    if !status.is_success() {
        return Err(status_error(status.as_u16(), &body));
    }
    if body.is_empty() {
        return Err(AppError::EmptyResponse);
    }

    Ok(ProviderResponse {
        status: status.as_u16(),
        content_type,
        body,
    })
}

/// Map a non-2xx response to an error, singling out loading models
pub(crate) fn status_error(status: u16, body: &[u8]) -> AppError {
    if status == 503 {
        if let Ok(LoadingBody {
            estimated_time: Some(estimated_time),
        }) = serde_json::from_slice::<LoadingBody>(body)
        {
            return AppError::ModelLoading { estimated_time };
        }
    }

    let text = String::from_utf8_lossy(body);
    let body = match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    };
    AppError::HttpStatus { status, body }
}

fn classify(error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::Timeout(error.to_string())
    } else {
        AppError::Network(error.to_string())
    }
}
