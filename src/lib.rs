//! Image generation orchestrator
//!
//! Composes prompts under a URL-length budget, fans a request out into
//! staggered per-image tasks against built-in or user-configured providers,
//! retries transient failures with backoff, normalizes heterogeneous
//! response encodings, and optionally publishes results to a gallery.

pub mod config;
pub mod error;
pub mod gallery;
pub mod models;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod response;
pub mod session;

pub use error::{AppError, ErrorCategory, Result};
pub use models::{GeneratedImage, GenerationRequest, Seed, StyleMetadata, StyleSelection};
pub use session::{GenerationSession, InFlightBatch, SessionEvent};
