//! Lookup table from model id to provider adapter

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{ProviderFamily, ProvidersConfig};
use crate::error::{AppError, Result};
use crate::models::CustomModelConfig;
use crate::provider::custom;
use crate::provider::query::{GuidedQueryProvider, SeededQueryProvider};
use crate::provider::traits::ProviderAdapter;

/// Listing entry for a selectable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub display_name: String,
    pub family: String,
}

/// Registry of built-in and custom providers
pub struct ProviderRegistry {
    adapters: DashMap<String, Arc<dyn ProviderAdapter>>,
    huggingface_base_url: String,
}

impl ProviderRegistry {
    pub fn new(huggingface_base_url: impl Into<String>) -> Self {
        Self {
            adapters: DashMap::new(),
            huggingface_base_url: huggingface_base_url.into(),
        }
    }

    /// Build the registry from provider configuration and stored custom models
    pub fn from_config(
        providers: &ProvidersConfig,
        custom_models: &[CustomModelConfig],
    ) -> Result<Self> {
        let registry = Self::new(providers.huggingface_base_url.clone());

        for model in &providers.models {
            let adapter: Arc<dyn ProviderAdapter> = match model.family {
                ProviderFamily::Guided => Arc::new(GuidedQueryProvider::new(
                    model.clone(),
                    providers.guided_base_url.clone(),
                )),
                ProviderFamily::Seeded => Arc::new(SeededQueryProvider::new(
                    model.clone(),
                    providers.seeded_base_url.clone(),
                )),
            };
            registry.register(adapter);
        }

        for config in custom_models {
            registry.register_custom(config.clone())?;
        }

        info!(models = registry.len(), "Provider registry initialized");
        Ok(registry)
    }

    /// Register or replace an adapter under its own id
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Validate and register a user's custom model, returning its registry id
    pub fn register_custom(&self, config: CustomModelConfig) -> Result<String> {
        config.validate()?;
        let adapter: Arc<dyn ProviderAdapter> =
            Arc::from(custom::adapter_for(config, &self.huggingface_base_url));
        let id = adapter.id().to_string();
        info!(model = %id, family = %adapter.family(), "Registered custom model");
        self.register(adapter);
        Ok(id)
    }

    pub fn remove(&self, model_id: &str) -> bool {
        self.adapters.remove(model_id).is_some()
    }

    /// Resolve a model id without touching the network
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(model_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::UnknownModel(model_id.to_string()))
    }

    pub fn list(&self) -> Vec<ModelSummary> {
        let mut models: Vec<ModelSummary> = self
            .adapters
            .iter()
            .map(|entry| ModelSummary {
                id: entry.key().clone(),
                display_name: entry.value().display_name().to_string(),
                family: entry.value().family().to_string(),
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
