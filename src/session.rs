//! Generation session: the request-scoped owner of generated images
//!
//! A session holds the image board, the object handles backing it, the
//! "generation in progress" flag and the set of images currently being
//! saved. Sessions never share state with each other.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{AppError, ErrorCategory, Result};
use crate::gallery::GalleryClient;
use crate::models::{
    CustomModelConfig, GeneratedImage, GenerationRequest, ModerationStatus, PersistedImage,
    SavedImage,
};
use crate::prompt::{self, PromptBudget, PromptParts, TruncationStep};
use crate::provider::{ProviderClient, ProviderRegistry};
use crate::queue::{
    BatchConfig, BatchPlan, BatchReport, BatchRunner, BatchSink, BatchStatus, RetryController,
    RetryPolicy, Sleeper,
};
use crate::response::base64;
use crate::response::handles::{ImageBlob, ObjectHandles};

/// Notices emitted by a session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Shown once per session
    PromptTruncated { steps: Vec<TruncationStep> },
    ImageReady { index: usize, image: GeneratedImage },
    ImageFailed {
        index: usize,
        category: ErrorCategory,
        message: String,
    },
    BatchFinished {
        status: BatchStatus,
        succeeded: usize,
        failed: usize,
    },
    /// A request refused before any network call
    Rejected { message: String },
    SaveFailed { image_id: String, message: String },
}

/// Next event from a subscription, skipping over notices lost to lag.
/// `None` once the session is gone.
pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber fell behind, notices dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

struct SessionState {
    registry: Arc<ProviderRegistry>,
    runner: BatchRunner,
    handles: ObjectHandles,
    budget: PromptBudget,
    max_count: u32,
    board: Mutex<Vec<GeneratedImage>>,
    generating: AtomicBool,
    saving: Mutex<HashSet<String>>,
    truncation_notice_shown: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    gallery: Option<GalleryClient>,
    auto_publish: bool,
}

impl SessionState {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        let released = self.handles.release_all();
        if released > 0 {
            debug!(released, "Released object handles on session teardown");
        }
    }
}

/// Cloneable handle to one generation session
#[derive(Clone)]
pub struct GenerationSession {
    state: Arc<SessionState>,
}

impl GenerationSession {
    /// Build a session with providers from the settings
    pub fn new(settings: &Settings) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&settings.providers, &settings.custom_models)?;
        Self::with_registry(settings, Arc::new(registry))
    }

    /// Build a session over an existing registry
    pub fn with_registry(settings: &Settings, registry: Arc<ProviderRegistry>) -> Result<Self> {
        let retry = RetryController::new(RetryPolicy::from(&settings.retry));
        Self::build(settings, registry, retry)
    }

    /// Build a session whose retry delays go through `sleeper`
    pub fn with_sleeper(
        settings: &Settings,
        registry: Arc<ProviderRegistry>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let retry = RetryController::with_sleeper(RetryPolicy::from(&settings.retry), sleeper);
        Self::build(settings, registry, retry)
    }

    fn build(
        settings: &Settings,
        registry: Arc<ProviderRegistry>,
        retry: RetryController,
    ) -> Result<Self> {
        settings.validate()?;

        let handles = ObjectHandles::new();
        let runner = BatchRunner::new(
            ProviderClient::new()?,
            retry,
            handles.clone(),
            BatchConfig::from(&settings.batch),
        );
        let gallery = if settings.gallery.enabled {
            Some(GalleryClient::new(&settings.gallery)?)
        } else {
            None
        };
        let (events, _) = broadcast::channel(settings.batch.event_capacity.max(1));

        Ok(Self {
            state: Arc::new(SessionState {
                registry,
                runner,
                handles,
                budget: PromptBudget::from(&settings.prompt),
                max_count: settings.batch.max_count,
                board: Mutex::new(Vec::new()),
                generating: AtomicBool::new(false),
                saving: Mutex::new(HashSet::new()),
                truncation_notice_shown: AtomicBool::new(false),
                events,
                gallery,
                auto_publish: settings.gallery.enabled && settings.gallery.auto_publish,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events.subscribe()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.state.registry
    }

    pub fn register_custom_model(&self, config: CustomModelConfig) -> Result<String> {
        self.state.registry.register_custom(config)
    }

    /// Load a user's custom models from the gallery backend, skipping invalid ones
    pub async fn load_custom_models(&self, user_id: &str) -> Result<usize> {
        let gallery = self.gallery()?;
        let mut loaded = 0;
        for config in gallery.fetch_custom_models(user_id).await? {
            let id = config.id.clone();
            let registry_id = config.registry_id();
            match self.state.registry.register_custom(config) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    // A stale copy registered earlier must not stay selectable
                    self.state.registry.remove(&registry_id);
                    warn!(model = %id, error = %e, "Skipping invalid custom model");
                }
            }
        }
        Ok(loaded)
    }

    pub fn is_generating(&self) -> bool {
        self.state.generating.load(Ordering::SeqCst)
    }

    /// Start a batch. Runs synchronously up to the in-flight check: a second
    /// call while a batch is running fails with `Busy` before any network I/O.
    pub fn begin(&self, request: GenerationRequest) -> Result<InFlightBatch> {
        let guard = GenerationGuard::acquire(&self.state).map_err(|e| self.reject(e))?;

        request
            .validate(self.state.max_count)
            .map_err(|e| self.reject(e))?;
        let adapter = self
            .state
            .registry
            .resolve(&request.model_id)
            .map_err(|e| self.reject(e))?;

        let include_negative = adapter.merges_negative_prompt();
        let composed = prompt::compose(
            &PromptParts::from_request(&request, include_negative),
            &self.state.budget,
        );
        if composed.truncated {
            debug!(steps = ?composed.steps, "Prompt shortened to fit budget");
            if !self.state.truncation_notice_shown.swap(true, Ordering::SeqCst) {
                self.state.emit(SessionEvent::PromptTruncated {
                    steps: composed.steps.clone(),
                });
            }
        }

        let plan = BatchPlan {
            adapter,
            prompt: composed.text,
            negative_prompt: if include_negative {
                None
            } else {
                request.negative_prompt.clone()
            },
            width: request.width,
            height: request.height,
            seed: request.seed,
            count: request.count as usize,
        };

        info!(
            model = %request.model_id,
            count = request.count,
            truncated = composed.truncated,
            "Generation accepted"
        );

        Ok(InFlightBatch {
            session: self.clone(),
            plan,
            style: Some(request.style.name.trim().to_string()).filter(|s| !s.is_empty()),
            _guard: guard,
        })
    }

    /// Validate, start and run a batch to completion
    pub async fn generate(&self, request: GenerationRequest) -> Result<BatchReport> {
        self.begin(request)?.run().await
    }

    fn reject(&self, error: AppError) -> AppError {
        self.state.emit(SessionEvent::Rejected {
            message: error.user_message(),
        });
        error
    }

    /// Snapshot of the board
    pub fn images(&self) -> Vec<GeneratedImage> {
        self.state.board.lock().clone()
    }

    pub fn image(&self, id: &str) -> Option<GeneratedImage> {
        self.state.board.lock().iter().find(|img| img.id == id).cloned()
    }

    /// Bytes behind an image's object handle
    pub fn image_data(&self, id: &str) -> Option<ImageBlob> {
        let image = self.image(id)?;
        self.state.handles.get(&image.object_url)
    }

    /// Remove an image from the board and release its handle
    pub fn remove_image(&self, id: &str) -> bool {
        let removed = {
            let mut board = self.state.board.lock();
            board
                .iter()
                .position(|img| img.id == id)
                .map(|pos| board.remove(pos))
        };
        match removed {
            Some(image) => {
                self.state.handles.release(&image.object_url);
                true
            }
            None => false,
        }
    }

    /// Clear the board and release every handle
    pub fn teardown(&self) -> usize {
        self.state.board.lock().clear();
        self.state.handles.release_all()
    }

    pub fn live_handles(&self) -> usize {
        self.state.handles.len()
    }

    fn gallery(&self) -> Result<&GalleryClient> {
        self.state
            .gallery
            .as_ref()
            .ok_or_else(|| AppError::Persistence("Gallery is not configured".to_string()))
    }

    /// Save an image to the user's collection; concurrent saves of the same
    /// image are refused
    pub async fn save_image(&self, id: &str) -> Result<()> {
        let gallery = self.gallery()?.clone();
        let image = self
            .image(id)
            .ok_or_else(|| AppError::InvalidRequest(format!("Unknown image {}", id)))?;
        let blob = self
            .state
            .handles
            .get(&image.object_url)
            .ok_or_else(|| AppError::InvalidRequest(format!("Image {} was released", id)))?;

        let _saving = SavingGuard::acquire(&self.state, id)?;
        let saved = SavedImage {
            image_id: image.id.clone(),
            prompt: image.prompt.clone(),
            model: image.model.clone(),
            width: image.width,
            height: image.height,
            image_data: base64::create_data_url(&blob.bytes, &blob.mime_type),
        };

        if let Err(e) = gallery.save_image(&saved).await {
            self.state.emit(SessionEvent::SaveFailed {
                image_id: id.to_string(),
                message: e.user_message(),
            });
            return Err(e);
        }
        Ok(())
    }

    /// Publish an image to the community gallery without waiting for it
    pub fn publish_image(&self, id: &str, style: Option<String>) -> Result<JoinHandle<()>> {
        let gallery = self.gallery()?;
        let image = self
            .image(id)
            .ok_or_else(|| AppError::InvalidRequest(format!("Unknown image {}", id)))?;
        let blob = self
            .state
            .handles
            .get(&image.object_url)
            .ok_or_else(|| AppError::InvalidRequest(format!("Image {} was released", id)))?;
        Ok(gallery.upload_detached(persisted(&image, &blob, style, gallery.author_name())))
    }
}

fn persisted(
    image: &GeneratedImage,
    blob: &ImageBlob,
    style: Option<String>,
    author_name: &str,
) -> PersistedImage {
    PersistedImage {
        prompt: image.prompt.clone(),
        model: image.model.clone(),
        width: image.width,
        height: image.height,
        image_data: base64::create_data_url(&blob.bytes, &blob.mime_type),
        style,
        author_name: author_name.to_string(),
        status: ModerationStatus::Pending,
    }
}

/// Clears the in-flight flag when the batch ends or is dropped
struct GenerationGuard {
    state: Arc<SessionState>,
}

impl GenerationGuard {
    fn acquire(state: &Arc<SessionState>) -> Result<Self> {
        state
            .generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AppError::Busy)?;
        Ok(Self {
            state: state.clone(),
        })
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.state.generating.store(false, Ordering::SeqCst);
    }
}

/// Entry in the "currently saving" set for the guard's lifetime
struct SavingGuard<'a> {
    state: &'a SessionState,
    id: String,
}

impl<'a> SavingGuard<'a> {
    fn acquire(state: &'a SessionState, id: &str) -> Result<Self> {
        if !state.saving.lock().insert(id.to_string()) {
            return Err(AppError::AlreadySaving(id.to_string()));
        }
        Ok(Self {
            state,
            id: id.to_string(),
        })
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.state.saving.lock().remove(&self.id);
    }
}

/// A started batch holding the session's in-flight flag
pub struct InFlightBatch {
    session: GenerationSession,
    plan: BatchPlan,
    style: Option<String>,
    _guard: GenerationGuard,
}

impl InFlightBatch {
    /// Final prompt sent to the provider
    pub fn prompt(&self) -> &str {
        &self.plan.prompt
    }

    /// Run every image task; fails only when all of them fail
    pub async fn run(self) -> Result<BatchReport> {
        let InFlightBatch {
            session,
            plan,
            style,
            _guard,
        } = self;
        let state = session.state.clone();

        let sink: Arc<dyn BatchSink> = Arc::new(SessionSink {
            state: state.clone(),
            style,
        });
        let report = state.runner.run(plan, sink).await;
        drop(_guard);

        state.emit(SessionEvent::BatchFinished {
            status: report.status,
            succeeded: report.images.len(),
            failed: report.failures.len(),
        });

        if report.status == BatchStatus::Failed {
            return Err(AppError::AllFailed {
                count: report.requested,
            });
        }
        Ok(report)
    }
}

struct SessionSink {
    state: Arc<SessionState>,
    style: Option<String>,
}

impl BatchSink for SessionSink {
    fn on_image(&self, index: usize, image: &GeneratedImage) {
        self.state.board.lock().push(image.clone());
        self.state.emit(SessionEvent::ImageReady {
            index,
            image: image.clone(),
        });

        if !self.state.auto_publish {
            return;
        }
        if let (Some(gallery), Some(blob)) = (
            self.state.gallery.as_ref(),
            self.state.handles.get(&image.object_url),
        ) {
            gallery.upload_detached(persisted(
                image,
                &blob,
                self.style.clone(),
                gallery.author_name(),
            ));
        }
    }

    fn on_failure(&self, index: usize, error: &AppError) {
        warn!(index, error = %error, "Image generation failed");
        self.state.emit(SessionEvent::ImageFailed {
            index,
            category: error.category(),
            message: error.user_message(),
        });
    }
}
