//! Common error types for the generation orchestrator

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid custom model configuration: {0}")]
    InvalidModelConfig(String),

    #[error("A generation is already in progress")]
    Busy,

    #[error("Image {0} is already being saved")]
    AlreadySaving(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Model is still loading (estimated {estimated_time:.0}s)")]
    ModelLoading { estimated_time: f64 },

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Unsupported image payload: {0}")]
    UnsupportedPayload(String),

    #[error("Image {index} failed after {attempts} attempt(s): {source}")]
    ImageFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("All {count} image(s) failed to generate")]
    AllFailed { count: usize },

    #[error("Gallery error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// User-facing failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Timeout,
    Network,
    HttpStatus,
    ServiceUnavailable,
    Unknown,
}

impl AppError {
    /// Whether the retry controller should try the call again
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_)
            | AppError::Network(_)
            | AppError::HttpStatus { .. }
            | AppError::EmptyResponse => true,
            AppError::ImageFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidRequest(_)
            | AppError::UnknownModel(_)
            | AppError::InvalidModelConfig(_)
            | AppError::Busy
            | AppError::AlreadySaving(_) => ErrorCategory::Validation,
            AppError::Timeout(_) => ErrorCategory::Timeout,
            AppError::Network(_) => ErrorCategory::Network,
            AppError::HttpStatus { status: 503, .. } | AppError::ModelLoading { .. } => {
                ErrorCategory::ServiceUnavailable
            }
            AppError::HttpStatus { .. } => ErrorCategory::HttpStatus,
            AppError::ImageFailed { source, .. } => source.category(),
            _ => ErrorCategory::Unknown,
        }
    }

    /// Human-readable message for notices, never a raw status dump
    pub fn user_message(&self) -> String {
        match self {
            AppError::ImageFailed { index, source, .. } => {
                format!("Image {}: {}", index + 1, source.user_message())
            }
            AppError::ModelLoading { estimated_time } => format!(
                "The model is still loading. Please wait about {} seconds and try again.",
                estimated_time.ceil() as u64
            ),
            AppError::Persistence(_) => {
                "Could not save the image. Your generated images are unchanged.".to_string()
            }
            AppError::Busy => "Please wait for the current generation to finish.".to_string(),
            AppError::AllFailed { .. } => {
                "Image generation failed. Please try again later.".to_string()
            }
            other => match other.category() {
                ErrorCategory::Validation => other.to_string(),
                ErrorCategory::Timeout => {
                    "The image service took too long to respond.".to_string()
                }
                ErrorCategory::Network => {
                    "Network error. Check your connection and try again.".to_string()
                }
                ErrorCategory::ServiceUnavailable => {
                    "The image service is temporarily unavailable.".to_string()
                }
                ErrorCategory::HttpStatus => {
                    "The image service rejected the request.".to_string()
                }
                ErrorCategory::Unknown => "Something went wrong generating the image.".to_string(),
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
