//! Initialization state machine for the embedding pipeline.
//!
//! ```text
//! BOOT -> BACKEND_CONFIGURED -> RUNTIME_READY -> MODEL_READY
//!      -> TOKENIZER_READY -> WARMED_UP -> READY
//! ```
//!
//! Every step is validated before its transition is accepted. Any step may
//! fail into `ERROR`, and `ERROR` goes back to `BOOT` on the next
//! `initialize()` call. Only `READY` hands out the pipeline.
//!
//! Concurrent `initialize()` calls join the attempt already in flight. The
//! attempt runs as its own task, so it finishes even if every caller stops
//! waiting for it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::semantic::backend::{
    BackendError, BackendKind, InferenceBackend, InferenceSession, RuntimeHandles, RuntimeOptions,
};
use crate::semantic::embeddings::Pipeline;
use crate::semantic::tokenizer::Tokenizer;

/// Text run through the pipeline once before declaring it ready.
const WARMUP_PROBE: &str = "warm up the tab grouping embedding pipeline";

/// Buffered lifecycle events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Boot,
    BackendConfigured,
    RuntimeReady,
    ModelReady,
    TokenizerReady,
    WarmedUp,
    Ready,
    Error,
}

impl LifecycleState {
    /// Position in the forward sequence; `ERROR` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            LifecycleState::Boot => Some(0),
            LifecycleState::BackendConfigured => Some(1),
            LifecycleState::RuntimeReady => Some(2),
            LifecycleState::ModelReady => Some(3),
            LifecycleState::TokenizerReady => Some(4),
            LifecycleState::WarmedUp => Some(5),
            LifecycleState::Ready => Some(6),
            LifecycleState::Error => None,
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        match (self, next) {
            (LifecycleState::Error, LifecycleState::Error) => false,
            (_, LifecycleState::Error) => true,
            (LifecycleState::Error, LifecycleState::Boot) => true,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Boot => "BOOT",
            LifecycleState::BackendConfigured => "BACKEND_CONFIGURED",
            LifecycleState::RuntimeReady => "RUNTIME_READY",
            LifecycleState::ModelReady => "MODEL_READY",
            LifecycleState::TokenizerReady => "TOKENIZER_READY",
            LifecycleState::WarmedUp => "WARMED_UP",
            LifecycleState::Ready => "READY",
            LifecycleState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Which initialization steps validated in the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageFlags {
    pub backend_configured: bool,
    pub runtime_ready: bool,
    pub model_ready: bool,
    pub tokenizer_ready: bool,
    pub warmed_up: bool,
}

impl StageFlags {
    pub fn all(&self) -> bool {
        self.backend_configured
            && self.runtime_ready
            && self.model_ready
            && self.tokenizer_ready
            && self.warmed_up
    }
}

/// Structured description of a failed initialization stage.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("initialization failed at {stage}: {message}")]
pub struct ErrorEnvelope {
    /// The state the sequence was trying to reach.
    pub stage: LifecycleState,
    pub message: String,
    pub resource: Option<String>,
    pub backend_kind: BackendKind,
    pub timestamp: DateTime<Utc>,
}

/// Notifications published while the lifecycle moves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Status {
        state: LifecycleState,
        details: String,
    },
    Ready {
        details: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        envelope: ErrorEnvelope,
    },
}

/// Settings the lifecycle needs beyond the backend itself.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub runtime: RuntimeOptions,
    pub max_sequence_length: usize,
    pub dimensions: usize,
}

/// Point-in-time view of the lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    pub stages: StageFlags,
    pub backend_kind: BackendKind,
    pub runtime: Option<RuntimeHandles>,
    pub missing_resources: Vec<String>,
    pub ready_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorEnvelope>,
}

struct Status {
    state: LifecycleState,
    stages: StageFlags,
    runtime: Option<RuntimeHandles>,
    missing_resources: Vec<String>,
    ready_at: Option<DateTime<Utc>>,
    last_error: Option<ErrorEnvelope>,
    pipeline: Option<Arc<Pipeline>>,
}

type InitAttempt = Shared<BoxFuture<'static, Result<(), ErrorEnvelope>>>;

struct Inner {
    backend: Arc<dyn InferenceBackend>,
    options: LifecycleOptions,
    status: RwLock<Status>,
    in_flight: Mutex<Option<InitAttempt>>,
    events: broadcast::Sender<LifecycleEvent>,
    ready_emitted: AtomicBool,
}

/// Handle to the embedding pipeline lifecycle. Clones share one lifecycle.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new(backend: Arc<dyn InferenceBackend>, options: LifecycleOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                backend,
                options,
                status: RwLock::new(Status {
                    state: LifecycleState::Boot,
                    stages: StageFlags::default(),
                    runtime: None,
                    missing_resources: Vec::new(),
                    ready_at: None,
                    last_error: None,
                    pipeline: None,
                }),
                in_flight: Mutex::new(None),
                events,
                ready_emitted: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.status().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let status = self.inner.status();
        LifecycleSnapshot {
            state: status.state,
            stages: status.stages,
            backend_kind: self.inner.backend.kind(),
            runtime: status.runtime.clone(),
            missing_resources: status.missing_resources.clone(),
            ready_at: status.ready_at,
            last_error: status.last_error.clone(),
        }
    }

    /// The pipeline, only while the lifecycle is `READY`.
    pub fn ready_pipeline(&self) -> Option<Arc<Pipeline>> {
        let status = self.inner.status();
        match status.state {
            LifecycleState::Ready => status.pipeline.clone(),
            _ => None,
        }
    }

    /// Bring the pipeline to `READY`, or join the attempt already running.
    ///
    /// A no-op once `READY`. After a failure the next call starts over.
    pub async fn initialize(&self) -> Result<(), ErrorEnvelope> {
        let attempt = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match in_flight.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    if self.is_ready() {
                        return Ok(());
                    }

                    let attempt = self.start_attempt();
                    *in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    fn start_attempt(&self) -> InitAttempt {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = Arc::clone(&inner).run().await;
            inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            result
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let stage = inner.status().state;
                    Err(inner.fail(stage, format!("initialization task failed: {e}"), None))
                }
            }
        }
        .boxed()
        .shared()
    }

    #[cfg(test)]
    pub(crate) fn notify_ready(&self) {
        self.inner.notify_ready(Utc::now());
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: LifecycleState) {
        self.inner.status_mut().state = state;
    }
}

impl Inner {
    fn status(&self) -> RwLockReadGuard<'_, Status> {
        self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_mut(&self) -> RwLockWriteGuard<'_, Status> {
        self.status.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LifecycleEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn notify_ready(&self, timestamp: DateTime<Utc>) {
        if self.ready_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(LifecycleEvent::Ready {
            details: format!("{} embedding pipeline ready", self.backend.kind()),
            timestamp,
        });
    }

    fn transition(
        &self,
        next: LifecycleState,
        details: impl Into<String>,
    ) -> Result<(), ErrorEnvelope> {
        let details = details.into();
        let current = {
            let mut status = self.status_mut();
            let current = status.state;
            if current.can_transition_to(next) {
                status.state = next;
            }
            current
        };

        if !current.can_transition_to(next) {
            return Err(self.fail(next, format!("invalid transition {current} -> {next}"), None));
        }

        log::info!("lifecycle {current} -> {next}: {details}");
        self.emit(LifecycleEvent::Status {
            state: next,
            details,
        });
        Ok(())
    }

    fn fail(
        &self,
        stage: LifecycleState,
        message: impl Into<String>,
        resource: Option<String>,
    ) -> ErrorEnvelope {
        let envelope = ErrorEnvelope {
            stage,
            message: message.into(),
            resource,
            backend_kind: self.backend.kind(),
            timestamp: Utc::now(),
        };

        {
            let mut status = self.status_mut();
            status.state = LifecycleState::Error;
            status.pipeline = None;
            status.last_error = Some(envelope.clone());
        }

        log::error!(
            "initialization failed at {} (backend={} resource={:?}): {}",
            envelope.stage,
            envelope.backend_kind,
            envelope.resource,
            envelope.message
        );
        self.emit(LifecycleEvent::Status {
            state: LifecycleState::Error,
            details: envelope.message.clone(),
        });
        self.emit(LifecycleEvent::Error {
            envelope: envelope.clone(),
        });

        envelope
    }

    fn fail_backend(&self, stage: LifecycleState, err: BackendError) -> ErrorEnvelope {
        let resource = err.resource().map(String::from);
        self.fail(stage, err.to_string(), resource)
    }

    async fn run(self: Arc<Self>) -> Result<(), ErrorEnvelope> {
        let state = self.status().state;
        match state {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Boot => {}
            LifecycleState::Error => self.reset()?,
            other => {
                return Err(self.fail(
                    other,
                    format!("cannot start initialization from {other}"),
                    None,
                ))
            }
        }

        let handles = self.configure_backend()?;
        self.verify_runtime_resources()?;
        let session = self.load_model(&handles).await?;
        let tokenizer = self.load_tokenizer().await?;

        let pipeline = Arc::new(Pipeline::new(session, tokenizer, self.options.dimensions));
        self.warm_up(&pipeline).await?;

        self.mark_ready(pipeline)
    }

    /// `ERROR -> BOOT`, clearing everything the failed run produced.
    fn reset(&self) -> Result<(), ErrorEnvelope> {
        {
            let mut status = self.status_mut();
            status.stages = StageFlags::default();
            status.runtime = None;
            status.missing_resources.clear();
            status.pipeline = None;
        }
        self.transition(LifecycleState::Boot, "retrying initialization")
    }

    fn configure_backend(&self) -> Result<RuntimeHandles, ErrorEnvelope> {
        let stage = LifecycleState::BackendConfigured;

        let handles = self
            .backend
            .configure(&self.options.runtime)
            .map_err(|e| self.fail_backend(stage, e))?;

        if handles.threads == 0 || handles.device.is_empty() {
            return Err(self.fail(stage, "runtime returned empty configuration handles", None));
        }
        if handles.allow_remote {
            return Err(self.fail(stage, "runtime allows remote resource fetches", None));
        }

        {
            let mut status = self.status_mut();
            status.stages.backend_configured = true;
            status.runtime = Some(handles.clone());
        }

        self.transition(
            stage,
            format!(
                "threads={} simd={} device={}",
                handles.threads, handles.simd, handles.device
            ),
        )?;
        Ok(handles)
    }

    /// Probe failures are recorded but do not stop the sequence; the model
    /// load re-reads the same files.
    fn verify_runtime_resources(&self) -> Result<(), ErrorEnvelope> {
        let mut missing = Vec::new();
        for resource in self.backend.runtime_resources() {
            if let Err(e) = self.backend.probe_resource(&resource) {
                log::warn!("runtime resource probe failed: {e}");
                missing.push(resource);
            }
        }

        let details = if missing.is_empty() {
            "runtime resources present".to_string()
        } else {
            format!("missing runtime resources: {}", missing.join(", "))
        };

        {
            let mut status = self.status_mut();
            status.stages.runtime_ready = true;
            status.missing_resources = missing;
        }

        self.transition(LifecycleState::RuntimeReady, details)
    }

    async fn load_model(
        &self,
        handles: &RuntimeHandles,
    ) -> Result<Arc<dyn InferenceSession>, ErrorEnvelope> {
        let stage = LifecycleState::ModelReady;

        let backend = Arc::clone(&self.backend);
        let handles = handles.clone();
        let session = tokio::task::spawn_blocking(move || backend.load_session(&handles))
            .await
            .map_err(|e| self.fail(stage, format!("model load task failed: {e}"), None))?
            .map_err(|e| self.fail_backend(stage, e))?;

        let inputs = session.input_names();
        let outputs = session.output_names();
        if inputs.is_empty() {
            return Err(self.fail(stage, "session reports no input names", None));
        }
        if outputs.is_empty() {
            return Err(self.fail(stage, "session reports no output names", None));
        }

        self.status_mut().stages.model_ready = true;
        self.transition(
            stage,
            format!("inputs=[{}] outputs=[{}]", inputs.join(", "), outputs.join(", ")),
        )?;
        Ok(session)
    }

    async fn load_tokenizer(&self) -> Result<Tokenizer, ErrorEnvelope> {
        let stage = LifecycleState::TokenizerReady;

        let backend = Arc::clone(&self.backend);
        let mut tokenizer = tokio::task::spawn_blocking(move || backend.load_tokenizer())
            .await
            .map_err(|e| self.fail(stage, format!("tokenizer load task failed: {e}"), None))?
            .map_err(|e| self.fail_backend(stage, e))?;

        tokenizer
            .set_max_length(self.options.max_sequence_length)
            .map_err(|e| self.fail_backend(stage, e))?;

        if !tokenizer.is_loaded() || tokenizer.vocab_len() == 0 {
            return Err(self.fail(stage, "tokenizer has no vocabulary", None));
        }

        self.status_mut().stages.tokenizer_ready = true;
        self.transition(stage, format!("vocabulary size {}", tokenizer.vocab_len()))?;
        Ok(tokenizer)
    }

    async fn warm_up(&self, pipeline: &Arc<Pipeline>) -> Result<(), ErrorEnvelope> {
        let stage = LifecycleState::WarmedUp;

        let embedding = pipeline
            .infer_async(WARMUP_PROBE)
            .await
            .map_err(|e| self.fail(stage, format!("warm-up inference failed: {e}"), None))?;

        if embedding.dimensions() != self.options.dimensions {
            return Err(self.fail(
                stage,
                format!(
                    "warm-up embedding has {} dimensions, expected {}",
                    embedding.dimensions(),
                    self.options.dimensions
                ),
                None,
            ));
        }

        self.status_mut().stages.warmed_up = true;
        self.transition(stage, format!("warm-up produced {} dimensions", embedding.dimensions()))
    }

    fn mark_ready(&self, pipeline: Arc<Pipeline>) -> Result<(), ErrorEnvelope> {
        let stage = LifecycleState::Ready;
        let timestamp = Utc::now();

        let stages_ok = {
            let mut status = self.status_mut();
            let ok = status.stages.all();
            if ok {
                status.ready_at = Some(timestamp);
                status.pipeline = Some(pipeline);
                status.last_error = None;
            }
            ok
        };

        if !stages_ok {
            return Err(self.fail(stage, "not every initialization stage validated", None));
        }

        self.transition(stage, "embedding pipeline ready")?;
        self.notify_ready(timestamp);
        Ok(())
    }
}
