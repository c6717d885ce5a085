//! Staggered fan-out of one request into independent image tasks

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::BatchSettings;
use crate::error::{AppError, ErrorCategory, Result};
use crate::models::{GeneratedImage, Seed};
use crate::provider::{ImageJob, ProviderAdapter, ProviderClient};
use crate::queue::retry::RetryController;
use crate::response::{self, handles::ObjectHandles};

/// Configuration for the batch runner
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Spacing between the starts of the first `max_concurrent` tasks
    pub stagger: Duration,
    /// Maximum number of tasks in flight
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&BatchSettings::default())
    }
}

impl From<&BatchSettings> for BatchConfig {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            stagger: Duration::from_millis(settings.stagger_ms),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }
}

/// Everything needed to produce the images of one request
#[derive(Clone)]
pub struct BatchPlan {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub seed: Seed,
    pub count: usize,
}

impl BatchPlan {
    /// Job for task `index`; providers that need a seed get a random one
    pub fn job(&self, index: usize) -> ImageJob {
        let seed = self.seed.for_index(index).or_else(|| {
            self.adapter
                .pins_random_seed()
                .then(|| u64::from(rand::random::<u32>()))
        });
        ImageJob {
            index,
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            width: self.width,
            height: self.height,
            seed,
        }
    }
}

/// Receives per-image outcomes as they happen
pub trait BatchSink: Send + Sync {
    fn on_image(&self, index: usize, image: &GeneratedImage);
    fn on_failure(&self, index: usize, error: &AppError);
}

/// Overall outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every image succeeded
    Complete,
    /// At least one image succeeded and at least one failed
    Partial,
    /// Every image failed
    Failed,
}

/// A failed image within a batch
#[derive(Debug, Clone, Serialize)]
pub struct ImageFailure {
    pub index: usize,
    pub category: ErrorCategory,
    pub message: String,
}

/// Result of a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    /// Successful images in completion order
    pub images: Vec<GeneratedImage>,
    /// Failures ordered by index
    pub failures: Vec<ImageFailure>,
    pub status: BatchStatus,
}

impl BatchReport {
    fn new(requested: usize, images: Vec<GeneratedImage>, mut failures: Vec<ImageFailure>) -> Self {
        failures.sort_by_key(|f| f.index);
        let status = if failures.is_empty() {
            BatchStatus::Complete
        } else if images.is_empty() {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
        Self {
            requested,
            images,
            failures,
            status,
        }
    }
}

/// Runs batches against a provider through the retry controller
#[derive(Clone)]
pub struct BatchRunner {
    client: ProviderClient,
    retry: RetryController,
    handles: ObjectHandles,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(
        client: ProviderClient,
        retry: RetryController,
        handles: ObjectHandles,
        config: BatchConfig,
    ) -> Self {
        Self {
            client,
            retry,
            handles,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run every task of the plan to completion. Sibling tasks never affect
    /// each other; completion order is whatever the providers return.
    pub async fn run(&self, plan: BatchPlan, sink: Arc<dyn BatchSink>) -> BatchReport {
        let count = plan.count;
        let plan = Arc::new(plan);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = JoinSet::new();

        info!(
            model = %plan.adapter.id(),
            count,
            max_concurrent = self.config.max_concurrent,
            "Starting batch"
        );

        for index in 0..count {
            // Ramp up the first worker window; later starts are paced by free permits
            if index > 0 && index < self.config.max_concurrent && !self.config.stagger.is_zero() {
                tokio::time::sleep(self.config.stagger).await;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let err = AppError::Internal("Failed to acquire worker permit".to_string());
                    sink.on_failure(index, &err);
                    continue;
                }
            };

            let runner = self.clone();
            let plan = plan.clone();
            let sink = sink.clone();
            tasks.spawn(async move {
                let outcome = runner.generate_one(&plan, index).await;
                drop(permit);
                match &outcome {
                    Ok(image) => sink.on_image(index, image),
                    Err(e) => sink.on_failure(index, e),
                }
                (index, outcome)
            });
        }

        let mut images = Vec::with_capacity(count);
        let mut failures = Vec::new();
        let mut finished = vec![false; count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(image))) => {
                    finished[index] = true;
                    images.push(image);
                }
                Ok((index, Err(e))) => {
                    finished[index] = true;
                    failures.push(ImageFailure {
                        index,
                        category: e.category(),
                        message: e.user_message(),
                    });
                }
                Err(join_error) => {
                    error!(error = %join_error, "Image task panicked");
                }
            }
        }

        // Panicked or never-started tasks still count as failures
        for (index, _) in finished.iter().enumerate().filter(|(_, done)| !**done) {
            let err = AppError::Internal("Image task aborted".to_string());
            failures.push(ImageFailure {
                index,
                category: err.category(),
                message: err.user_message(),
            });
        }

        let report = BatchReport::new(count, images, failures);
        info!(
            succeeded = report.images.len(),
            failed = report.failures.len(),
            status = ?report.status,
            "Batch finished"
        );
        report
    }

    /// One image: request, decode and normalize under the retry policy
    async fn generate_one(&self, plan: &BatchPlan, index: usize) -> Result<GeneratedImage> {
        let job = plan.job(index);
        let client = &self.client;
        let adapter = plan.adapter.as_ref();
        let job_ref = &job;

        let image = self
            .retry
            .run(index, move |attempt| async move {
                debug!(index, attempt, model = %adapter.id(), "Requesting image");
                let request = adapter.build_request(job_ref)?;
                let response = client.execute(&request).await?;
                let payload = adapter.decode_response(response)?;
                response::resolve_payload(client, payload).await
            })
            .await?;

        Ok(response::normalize(
            image,
            &job,
            adapter.display_name(),
            &self.handles,
        ))
    }
}
