//! Text to embedding conversion.
//!
//! `Pipeline` is the pure computation: tokenize, forward pass, mean-pool
//! over the sequence axis, L2-normalize. `Embedder` puts the lifecycle gate
//! and the bounded cache around it:
//! - `embed()` fails with `NotReady` until the lifecycle reaches `READY`
//! - a cache hit skips tokenization and inference
//! - inference failures yield `None` instead of an error, and
//!   `embed_batch()` substitutes a zero vector so N texts give N results

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::semantic::backend::{BackendError, HiddenStates, InferenceSession};
use crate::semantic::cache::{CacheStats, EmbeddingCache};
use crate::semantic::lifecycle::Lifecycle;
use crate::semantic::tokenizer::Tokenizer;

/// Fixed-length sentence embedding. Cheap to clone, never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values.into())
    }

    /// The substitute used for texts whose inference failed.
    pub fn zeros(dimensions: usize) -> Self {
        Self::new(vec![0.0; dimensions])
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

impl Deref for Embedding {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Error type for embedding requests
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedError {
    #[error("Embedding pipeline is not ready")]
    NotReady,

    #[error("Embedding generation failed: {0}")]
    Inference(String),
}

impl From<BackendError> for EmbedError {
    fn from(err: BackendError) -> Self {
        EmbedError::Inference(err.to_string())
    }
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Average the per-token hidden states into one vector.
pub fn mean_pool(hidden: &HiddenStates) -> Result<Vec<f32>, EmbedError> {
    let width = hidden.hidden_size().ok_or_else(|| {
        EmbedError::Inference("hidden states are empty or ragged".to_string())
    })?;

    let mut pooled = vec![0.0f32; width];
    for row in &hidden.rows {
        for (acc, value) in pooled.iter_mut().zip(row) {
            *acc += value;
        }
    }

    let count = hidden.seq_len() as f32;
    for value in pooled.iter_mut() {
        *value /= count;
    }

    Ok(pooled)
}

/// Scale `v` to unit length. A zero vector is returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm == 0.0 {
        return v;
    }
    for value in v.iter_mut() {
        *value /= norm;
    }
    v
}

/// A loaded session and tokenizer, usable once the lifecycle hands it out.
pub struct Pipeline {
    session: Arc<dyn InferenceSession>,
    tokenizer: Tokenizer,
    dimensions: usize,
}

impl Pipeline {
    pub fn new(
        session: Arc<dyn InferenceSession>,
        tokenizer: Tokenizer,
        dimensions: usize,
    ) -> Self {
        Self {
            session,
            tokenizer,
            dimensions,
        }
    }

    /// Expected embedding length.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Run the full computation for one text on the current thread.
    pub fn infer(&self, text: &str) -> Result<Embedding, EmbedError> {
        let tokens = self.tokenizer.encode(text)?;
        if tokens.truncated {
            log::debug!("truncated input to {} tokens", tokens.len());
        }

        let hidden = self.session.run(&tokens)?;
        let pooled = mean_pool(&hidden)?;

        Ok(Embedding::new(l2_normalize(pooled)))
    }

    /// Run `infer` on the blocking pool so the caller's executor keeps going.
    pub async fn infer_async(self: &Arc<Self>, text: &str) -> Result<Embedding, EmbedError> {
        let pipeline = Arc::clone(self);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || pipeline.infer(&text))
            .await
            .map_err(|e| EmbedError::Inference(format!("inference task failed: {e}")))?
    }
}

/// Gated, cached access to the embedding pipeline.
pub struct Embedder {
    lifecycle: Lifecycle,
    cache: Mutex<EmbeddingCache>,
}

impl Embedder {
    pub fn new(lifecycle: Lifecycle, cache: EmbeddingCache) -> Self {
        Self {
            lifecycle,
            cache: Mutex::new(cache),
        }
    }

    fn cache(&self) -> MutexGuard<'_, EmbeddingCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    pub fn cache_len(&self) -> usize {
        self.cache().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache().capacity()
    }

    /// Embed a single text.
    ///
    /// Returns `Ok(None)` when inference failed for this text.
    pub async fn embed(&self, text: &str) -> Result<Option<Embedding>, EmbedError> {
        let pipeline = self.lifecycle.ready_pipeline().ok_or(EmbedError::NotReady)?;

        let cached = self.cache().get(text);
        if let Some(hit) = cached {
            return Ok(Some(hit));
        }

        match pipeline.infer_async(text).await {
            Ok(embedding) => {
                self.cache().insert(text.to_string(), embedding.clone());
                Ok(Some(embedding))
            }
            Err(e) => {
                log::warn!("embedding failed for {text:?}: {e}");
                Ok(None)
            }
        }
    }

    /// Embed every text, substituting a zero vector for failed items.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        let dimensions = self
            .lifecycle
            .ready_pipeline()
            .ok_or(EmbedError::NotReady)?
            .dimensions();

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = self
                .embed(text)
                .await?
                .unwrap_or_else(|| Embedding::zeros(dimensions));
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}
