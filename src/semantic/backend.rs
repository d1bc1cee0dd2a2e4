//! Inference backend abstraction.
//!
//! A backend owns everything model-specific: runtime configuration, the
//! resource files it needs, session construction and tokenizer loading.
//! The lifecycle drives these steps in order and validates every result.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::semantic::tokenizer::{TokenSequence, Tokenizer};

/// Error type for backend operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Runtime configuration failed: {0}")]
    Configure(String),

    #[error("Resource {resource} unavailable: {message}")]
    Resource { resource: String, message: String },

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Tokenizer load failed: {0}")]
    Tokenizer(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl BackendError {
    /// Resource name attached to the error, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            BackendError::Resource { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

/// Which runtime executes the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Candle,
    #[cfg(test)]
    InMemory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Candle => write!(f, "candle"),
            #[cfg(test)]
            BackendKind::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Requested runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Worker threads for the compute pool; `None` lets the runtime decide.
    pub threads: Option<usize>,
    pub simd: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            threads: None,
            simd: true,
        }
    }
}

/// Runtime settings actually in effect after configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeHandles {
    pub threads: usize,
    pub simd: bool,
    /// Always false: models are only read from local disk.
    pub allow_remote: bool,
    pub device: String,
}

/// Per-token hidden states of a single forward pass (`seq_len` rows).
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenStates {
    pub rows: Vec<Vec<f32>>,
}

impl HiddenStates {
    pub fn seq_len(&self) -> usize {
        self.rows.len()
    }

    /// Width of the hidden layer, or `None` when rows disagree or are absent.
    pub fn hidden_size(&self) -> Option<usize> {
        let width = self.rows.first()?.len();
        self.rows
            .iter()
            .all(|row| row.len() == width)
            .then_some(width)
    }
}

/// A loaded model ready to run forward passes.
pub trait InferenceSession: Send + Sync {
    fn input_names(&self) -> Vec<String>;
    fn output_names(&self) -> Vec<String>;
    fn run(&self, tokens: &TokenSequence) -> Result<HiddenStates, BackendError>;
}

/// A model runtime the lifecycle knows how to boot.
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Apply threading/SIMD settings. Remote fetches stay disabled.
    fn configure(&self, options: &RuntimeOptions) -> Result<RuntimeHandles, BackendError>;

    /// Names of the files the runtime needs before a session can load.
    fn runtime_resources(&self) -> Vec<String>;

    /// Check that a single runtime resource is present.
    fn probe_resource(&self, resource: &str) -> Result<(), BackendError>;

    fn load_session(
        &self,
        handles: &RuntimeHandles,
    ) -> Result<Arc<dyn InferenceSession>, BackendError>;

    fn load_tokenizer(&self) -> Result<Tokenizer, BackendError>;
}
