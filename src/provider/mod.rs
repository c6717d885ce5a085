//! Provider module - adapter trait, built-in and custom providers, registry

pub mod client;
pub mod custom;
pub mod query;
pub mod registry;
pub mod traits;

pub use client::ProviderClient;
pub use registry::{ModelSummary, ProviderRegistry};
pub use traits::{ImageJob, ProviderAdapter, ProviderPayload, ProviderRequest, ProviderResponse};
