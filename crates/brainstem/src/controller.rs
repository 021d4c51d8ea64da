use crate::progress::{ProgressBus, ProgressTracker, SubscriptionId};
use rand::Rng;
use rusty_dreams_atlas::ModelCatalog;
use rusty_dreams_core::manifest::ModelDescriptor;
use rusty_dreams_core::protocol::{Command, LifecycleState, ProgressEvent, ProgressPhase};
use rusty_dreams_core::request::{GenerationRequest, GenerationResult, ModelHandle};
use rusty_dreams_core::DreamError;
use rusty_dreams_cortex::InferenceCapability;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Upper bound for seeds drawn when the request asks for a random one
pub const MAX_RANDOM_SEED: u64 = u32::MAX as u64;

/// Internal state. Mirrors [`LifecycleState`] but also carries the handle and
/// the id of the in-flight operation, so a completion that arrives after an
/// `unload` can tell it has been superseded.
enum Slot {
    Idle,
    Loading {
        op: u64,
        model: Arc<ModelDescriptor>,
    },
    Ready {
        model: Arc<ModelDescriptor>,
        handle: ModelHandle,
    },
    Generating {
        op: u64,
        model: Arc<ModelDescriptor>,
    },
    Failed {
        reason: String,
        /// Handle still held after a failed generation
        retained: Option<(Arc<ModelDescriptor>, ModelHandle)>,
    },
}

impl Slot {
    fn snapshot(&self) -> LifecycleState {
        match self {
            Slot::Idle => LifecycleState::Idle,
            Slot::Loading { model, .. } => LifecycleState::Loading(model.id.clone()),
            Slot::Ready { model, .. } => LifecycleState::Ready(model.id.clone()),
            Slot::Generating { model, .. } => LifecycleState::Generating(model.id.clone()),
            Slot::Failed { reason, .. } => LifecycleState::Failed(reason.clone()),
        }
    }

    fn op(&self) -> Option<u64> {
        match self {
            Slot::Loading { op, .. } | Slot::Generating { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// The handle this state owns, if releasing it is this state's job.
    fn into_held_handle(self) -> Option<(Arc<ModelDescriptor>, ModelHandle)> {
        match self {
            Slot::Ready { model, handle } => Some((model, handle)),
            Slot::Failed { retained, .. } => retained,
            // An in-flight generation releases its own handle once it
            // notices it was superseded.
            Slot::Idle | Slot::Loading { .. } | Slot::Generating { .. } => None,
        }
    }
}

pub struct LifecycleController {
    catalog: Arc<ModelCatalog>,
    capability: Arc<dyn InferenceCapability>,
    progress: ProgressBus,
    slot: Mutex<Slot>,
    next_op: AtomicU64,
}

impl LifecycleController {
    pub fn new(catalog: Arc<ModelCatalog>, capability: Arc<dyn InferenceCapability>) -> Self {
        Self {
            catalog,
            capability,
            progress: ProgressBus::new(),
            slot: Mutex::new(Slot::Idle),
            next_op: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_state(&self) -> LifecycleState {
        self.lock().snapshot()
    }

    /// Descriptor of the model that is ready or generating
    pub fn model_info(&self) -> Option<ModelDescriptor> {
        match &*self.lock() {
            Slot::Ready { model, .. } | Slot::Generating { model, .. } => {
                Some(model.as_ref().clone())
            }
            _ => None,
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        matches!(
            &*self.lock(),
            Slot::Ready { .. } | Slot::Generating { .. }
        )
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.progress.unsubscribe(id)
    }

    /// Make `model_id` the loaded model.
    ///
    /// A no-op when that model is already ready. Rejected with `InvalidState`
    /// while another load or generation is in flight, and with
    /// `ModelNotFound` for ids the catalog does not know; neither rejection
    /// touches the state. Fails with `Superseded` when an `unload` lands
    /// before the capability finishes.
    pub async fn load_model(&self, model_id: &str) -> Result<(), DreamError> {
        let model = self
            .catalog
            .get_descriptor(model_id)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| DreamError::ModelNotFound(model_id.to_string()))?;

        let (op, previous) = {
            let mut slot = self.lock();
            match &*slot {
                Slot::Ready { model: current, .. } if current.id == model.id => {
                    log::debug!("Model '{}' already loaded", model.id);
                    return Ok(());
                }
                Slot::Loading { .. } | Slot::Generating { .. } => {
                    return Err(DreamError::InvalidState {
                        command: Command::LoadModel,
                        state: slot.snapshot(),
                    });
                }
                Slot::Idle | Slot::Ready { .. } | Slot::Failed { .. } => {}
            }
            let op = self.next_op.fetch_add(1, Ordering::Relaxed);
            let loading = Slot::Loading {
                op,
                model: model.clone(),
            };
            (op, std::mem::replace(&mut *slot, loading))
        };

        log::info!("Loading model '{}'", model.id);
        let tracker = ProgressTracker::default();
        self.emit(
            op,
            &tracker,
            ProgressEvent::new(
                ProgressPhase::Initialization,
                0,
                "Starting model initialization...",
            ),
        );

        if let Some((stale, handle)) = previous.into_held_handle() {
            self.release_quietly(&stale, handle).await;
        }

        let on_progress = |event: ProgressEvent| {
            let event = if event.phase.is_acquire() {
                event
            } else {
                ProgressEvent {
                    phase: ProgressPhase::Loading,
                    ..event
                }
            };
            self.emit(op, &tracker, event);
        };
        let outcome = self.capability.acquire(&model, &on_progress).await;

        match outcome {
            Ok(handle) => {
                let ready = Slot::Ready {
                    model: model.clone(),
                    handle,
                };
                if self.finish(op, ready) {
                    log::info!("Model '{}' ready", model.id);
                    self.announce(
                        &tracker,
                        ProgressEvent::new(ProgressPhase::Complete, 100, "Model loaded and ready!"),
                    );
                    Ok(())
                } else {
                    log::warn!(
                        "Model '{}' finished loading after being unloaded, releasing it",
                        model.id
                    );
                    self.release_quietly(&model, handle).await;
                    Err(self.superseded(Command::LoadModel))
                }
            }
            Err(cause) => {
                let err = DreamError::AcquireFailed {
                    model: model.id.clone(),
                    phase: tracker
                        .last_phase()
                        .unwrap_or(ProgressPhase::Initialization),
                    cause,
                };
                let failed = Slot::Failed {
                    reason: err.reason(),
                    retained: None,
                };
                if self.finish(op, failed) {
                    log::error!("{}", err.reason());
                    self.announce(
                        &tracker,
                        ProgressEvent::new(
                            ProgressPhase::Error,
                            0,
                            format!("Error loading model: {}", err.reason()),
                        ),
                    );
                }
                Err(err)
            }
        }
    }

    /// Generate one image with the loaded model. Only legal from `Ready`.
    /// An `unload` during generation discards the image and yields `Superseded`.
    pub async fn generate_image(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, DreamError> {
        let (op, model, handle) = {
            let mut slot = self.lock();
            let (model, handle) = match &*slot {
                Slot::Ready { model, handle } => (model.clone(), *handle),
                other => {
                    return Err(DreamError::InvalidState {
                        command: Command::GenerateImage,
                        state: other.snapshot(),
                    })
                }
            };
            request.validate()?;
            let op = self.next_op.fetch_add(1, Ordering::Relaxed);
            *slot = Slot::Generating {
                op,
                model: model.clone(),
            };
            (op, model, handle)
        };

        let seed = match request.explicit_seed() {
            Some(seed) => seed,
            None => rand::thread_rng().gen_range(0..=MAX_RANDOM_SEED),
        };
        let job = request.resolve(&model, seed);
        log::info!(
            "Generating with '{}': {} steps, guidance {}, seed {}",
            model.id,
            job.steps,
            job.guidance_scale,
            seed
        );

        let tracker = ProgressTracker::default();
        self.emit(
            op,
            &tracker,
            ProgressEvent::new(ProgressPhase::Generating, 0, "Starting image generation..."),
        );

        let on_progress = |event: ProgressEvent| {
            self.emit(
                op,
                &tracker,
                ProgressEvent {
                    phase: ProgressPhase::Generating,
                    ..event
                },
            );
        };
        let outcome = self.capability.generate(handle, &job, &on_progress).await;

        match outcome {
            Ok(image) => {
                let ready = Slot::Ready {
                    model: model.clone(),
                    handle,
                };
                if !self.finish(op, ready) {
                    self.release_quietly(&model, handle).await;
                    return Err(self.superseded(Command::GenerateImage));
                }
                self.announce(
                    &tracker,
                    ProgressEvent::new(
                        ProgressPhase::Complete,
                        100,
                        "Image generated successfully!",
                    ),
                );
                Ok(GenerationResult {
                    model_id: model.id.clone(),
                    image,
                    resolved_seed: seed,
                })
            }
            Err(cause) => {
                let err = DreamError::GenerateFailed {
                    model: model.id.clone(),
                    cause,
                };
                let failed = Slot::Failed {
                    reason: err.reason(),
                    retained: Some((model.clone(), handle)),
                };
                if self.finish(op, failed) {
                    log::error!("{}", err.reason());
                    self.announce(
                        &tracker,
                        ProgressEvent::new(
                            ProgressPhase::Error,
                            0,
                            format!("Error generating image: {}", err.reason()),
                        ),
                    );
                } else {
                    self.release_quietly(&model, handle).await;
                }
                Err(err)
            }
        }
    }

    /// Drop back to `Idle` from anywhere, releasing the handle on a
    /// best-effort basis. Release failures are logged, never returned.
    pub async fn unload(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Slot::Idle);
        if previous.op().is_some() {
            log::info!(
                "Unloading while {}; the in-flight result will be discarded",
                previous.snapshot()
            );
        }
        if let Some((model, handle)) = previous.into_held_handle() {
            log::info!("Unloading model '{}'", model.id);
            self.release_quietly(&model, handle).await;
        }
    }

    fn superseded(&self, command: Command) -> DreamError {
        DreamError::Superseded {
            command,
            state: self.current_state(),
        }
    }

    /// Apply the outcome of operation `op`, unless it has been superseded.
    fn finish(&self, op: u64, next: Slot) -> bool {
        let mut slot = self.lock();
        if slot.op() == Some(op) {
            *slot = next;
            true
        } else {
            false
        }
    }

    /// Forward progress for `op` while it is still the active operation.
    fn emit(&self, op: u64, tracker: &ProgressTracker, event: ProgressEvent) {
        if self.lock().op() != Some(op) {
            return;
        }
        self.announce(tracker, event);
    }

    fn announce(&self, tracker: &ProgressTracker, event: ProgressEvent) {
        self.progress.publish(&tracker.admit(event));
    }

    async fn release_quietly(&self, model: &ModelDescriptor, handle: ModelHandle) {
        if let Err(cause) = self.capability.release(handle).await {
            let err = DreamError::ReleaseFailed {
                model: model.id.clone(),
                cause,
            };
            log::warn!("{}", err.reason());
        }
    }
}
