//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::models::CustomModelConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub custom_models: Vec<CustomModelConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Retry and timeout configuration for provider calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Timeout of the first attempt; attempt k waits k times this long
    #[serde(default = "default_base_timeout")]
    pub base_timeout_ms: u64,
    /// Delay after failed attempt k is `backoff_base_ms * 2^k` plus jitter
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_timeout() -> u64 {
    30000
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_max_jitter() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_timeout_ms: default_base_timeout(),
            backoff_base_ms: default_backoff_base(),
            max_jitter_ms: default_max_jitter(),
        }
    }
}

/// Batch fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    /// Delay between consecutive task starts
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,
    /// Upper bound on tasks talking to a provider at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_stagger() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_count() -> u32 {
    2000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            stagger_ms: default_stagger(),
            max_concurrent: default_max_concurrent(),
            max_count: default_max_count(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Prompt length budget
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_max_encoded_len")]
    pub max_encoded_len: usize,
    #[serde(default = "default_overhead_margin")]
    pub overhead_margin: usize,
    #[serde(default = "default_hard_limit_ratio")]
    pub hard_limit_ratio: f64,
    #[serde(default = "default_style_field_max_chars")]
    pub style_field_max_chars: usize,
    #[serde(default = "default_style_collapse_threshold")]
    pub style_collapse_threshold: usize,
}

fn default_max_encoded_len() -> usize {
    1800
}

fn default_overhead_margin() -> usize {
    50
}

fn default_hard_limit_ratio() -> f64 {
    0.8
}

fn default_style_field_max_chars() -> usize {
    200
}

fn default_style_collapse_threshold() -> usize {
    100
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_encoded_len: default_max_encoded_len(),
            overhead_margin: default_overhead_margin(),
            hard_limit_ratio: default_hard_limit_ratio(),
            style_field_max_chars: default_style_field_max_chars(),
            style_collapse_threshold: default_style_collapse_threshold(),
        }
    }
}

/// Built-in provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Query-parameter API keyed by model, guidance and strength
    Guided,
    /// Query-parameter API keyed by model and seed
    Seeded,
}

/// A built-in model selectable by id
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuiltinModelConfig {
    pub id: String,
    pub display_name: String,
    pub family: ProviderFamily,
    /// Model name sent upstream
    pub upstream_model: String,
    #[serde(default)]
    pub guidance: Option<f32>,
    #[serde(default)]
    pub strength: Option<f32>,
}

/// Provider endpoints and built-in models
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_guided_base_url")]
    pub guided_base_url: String,
    #[serde(default = "default_seeded_base_url")]
    pub seeded_base_url: String,
    #[serde(default = "default_huggingface_base_url")]
    pub huggingface_base_url: String,
    #[serde(default = "default_models")]
    pub models: Vec<BuiltinModelConfig>,
}

fn default_guided_base_url() -> String {
    "http://127.0.0.1:7861/imagine".to_string()
}

fn default_seeded_base_url() -> String {
    "https://image.pollinations.ai/prompt".to_string()
}

fn default_huggingface_base_url() -> String {
    "https://api-inference.huggingface.co/models".to_string()
}

fn default_models() -> Vec<BuiltinModelConfig> {
    vec![
        BuiltinModelConfig {
            id: "flux".to_string(),
            display_name: "Flux".to_string(),
            family: ProviderFamily::Seeded,
            upstream_model: "flux".to_string(),
            guidance: None,
            strength: None,
        },
        BuiltinModelConfig {
            id: "turbo".to_string(),
            display_name: "Turbo".to_string(),
            family: ProviderFamily::Seeded,
            upstream_model: "turbo".to_string(),
            guidance: None,
            strength: None,
        },
        BuiltinModelConfig {
            id: "sdxl".to_string(),
            display_name: "Stable Diffusion XL".to_string(),
            family: ProviderFamily::Guided,
            upstream_model: "sdxl".to_string(),
            guidance: Some(7.5),
            strength: Some(0.8),
        },
    ]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            guided_base_url: default_guided_base_url(),
            seeded_base_url: default_seeded_base_url(),
            huggingface_base_url: default_huggingface_base_url(),
            models: default_models(),
        }
    }
}

/// Community gallery backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GalleryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Publish every successful generation without waiting for it
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default = "default_gallery_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_gallery_timeout")]
    pub timeout_ms: u64,
}

fn default_gallery_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_author_name() -> String {
    "Anonymous".to_string()
}

fn default_gallery_timeout() -> u64 {
    15000
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_publish: false,
            base_url: default_gallery_url(),
            api_key: None,
            author_name: default_author_name(),
            timeout_ms: default_gallery_timeout(),
        }
    }
}

/// Local export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub output_dir: String,
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_storage_path(),
        }
    }
}

impl RetryConfig {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .set_default("retry.max_attempts", default_max_attempts() as i64)?
            .set_default("batch.stagger_ms", default_stagger() as i64)?
            .set_default("batch.max_concurrent", default_max_concurrent() as i64)?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with ARTGEN_)
            .add_source(
                Environment::with_prefix("ARTGEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_timeout_ms == 0 {
            return Err(invalid("retry.base_timeout_ms cannot be 0"));
        }
        if self.batch.max_concurrent == 0 {
            return Err(invalid("batch.max_concurrent must be at least 1"));
        }
        if self.batch.max_count == 0 {
            return Err(invalid("batch.max_count must be at least 1"));
        }
        if self.prompt.max_encoded_len <= self.prompt.overhead_margin {
            return Err(invalid(
                "prompt.max_encoded_len must be larger than prompt.overhead_margin",
            ));
        }
        if !(self.prompt.hard_limit_ratio > 0.0 && self.prompt.hard_limit_ratio <= 1.0) {
            return Err(invalid("prompt.hard_limit_ratio must be in (0, 1]"));
        }

        let mut seen = HashSet::new();
        for model in &self.providers.models {
            if model.id.is_empty() {
                return Err(invalid("Model id cannot be empty"));
            }
            if model.id.starts_with("custom-") {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "Built-in model '{}' cannot use the reserved 'custom-' prefix",
                    model.id
                ))));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "Duplicate model id '{}'",
                    model.id
                ))));
            }
        }

        for custom in &self.custom_models {
            custom.validate()?;
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchSettings::default(),
            prompt: PromptConfig::default(),
            providers: ProvidersConfig::default(),
            gallery: GalleryConfig::default(),
            storage: StorageConfig::default(),
            custom_models: vec![],
        }
    }
}
