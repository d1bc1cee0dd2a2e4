//! Deterministic stand-in for a real embedding model.
//!
//! Every vocabulary word contributes a one-hot row at `id % hidden_size`;
//! special tokens (`[CLS]`, `[SEP]`, `[UNK]`, ...) contribute zero rows.
//! After mean pooling and normalization this behaves like a bag-of-words
//! embedding: texts that share words are similar, texts that share none are
//! orthogonal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::semantic::backend::{
    BackendError, BackendKind, HiddenStates, InferenceBackend, InferenceSession, RuntimeHandles,
    RuntimeOptions,
};
use crate::semantic::lifecycle::{LifecycleEvent, LifecycleOptions};
use crate::semantic::tokenizer::{TokenSequence, Tokenizer};
use crate::semantic::EMBEDDING_DIMENSIONS;

/// Words in this list make the session fail, to exercise per-item recovery.
pub const POISON_WORD: &str = "kaboom";

/// `[PAD]`, `[UNK]`, `[CLS]`, `[SEP]`, `[MASK]` take ids 0 to 4.
const SPECIAL_TOKENS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

/// Everything the test texts say, so nothing collapses to `[UNK]`.
const TEST_WORDS: &[&str] = &[
    ".", "-", ",", "!", "a", "again", "amazon", "and", "api", "async", "book", "brown", "buy",
    "com", "composition", "dog", "example", "fox", "github", "guide", "hooks", "jumps", "kaboom",
    "keyboard", "lang", "lazy", "mouse", "org", "over", "quick", "react", "rust", "the",
    "tutorial", "vue", "vuejs", "wireless",
];

/// A BERT-uncased `tokenizer.json` whose vocabulary is the special tokens
/// followed by `words`, in order.
pub fn tokenizer_json(words: &[&str]) -> String {
    let vocab: Map<String, Value> = SPECIAL_TOKENS
        .iter()
        .chain(words)
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();

    let added_tokens: Vec<Value> = SPECIAL_TOKENS
        .iter()
        .enumerate()
        .map(|(id, token)| {
            json!({
                "id": id,
                "content": token,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", 3],
            "cls": ["[CLS]", 2]
        },
        "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
        "model": {
            "type": "WordPiece",
            "unk_token": "[UNK]",
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    })
    .to_string()
}

pub struct InMemoryBackend {
    pub hidden_size: usize,
    pub fail_configure: bool,
    /// Returned from `configure` instead of well-formed handles.
    pub handles: Option<RuntimeHandles>,
    pub missing_resources: Vec<String>,
    pub output_names: Vec<String>,
    pub vocabulary: bool,
    pub load_delay: Option<Duration>,
    session_loads: AtomicUsize,
    failing_loads: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            hidden_size: EMBEDDING_DIMENSIONS,
            fail_configure: false,
            handles: None,
            missing_resources: Vec::new(),
            output_names: vec!["last_hidden_state".to_string()],
            vocabulary: true,
            load_delay: None,
            session_loads: AtomicUsize::new(0),
            failing_loads: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` session loads fail.
    pub fn fail_next_loads(&self, count: usize) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    pub fn session_loads(&self) -> usize {
        self.session_loads.load(Ordering::SeqCst)
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            runtime: RuntimeOptions::default(),
            max_sequence_length: 128,
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }

    fn tokenizer(&self) -> Result<Tokenizer, BackendError> {
        Tokenizer::from_bytes(tokenizer_json(TEST_WORDS))
    }
}

impl InferenceBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn configure(&self, options: &RuntimeOptions) -> Result<RuntimeHandles, BackendError> {
        if self.fail_configure {
            return Err(BackendError::Configure("no runtime available".to_string()));
        }
        if let Some(handles) = &self.handles {
            return Ok(handles.clone());
        }
        Ok(RuntimeHandles {
            threads: options.threads.unwrap_or(1),
            simd: options.simd,
            allow_remote: false,
            device: "memory".to_string(),
        })
    }

    fn runtime_resources(&self) -> Vec<String> {
        vec!["config.json".to_string(), "model.safetensors".to_string()]
    }

    fn probe_resource(&self, resource: &str) -> Result<(), BackendError> {
        if self.missing_resources.iter().any(|r| r == resource) {
            return Err(BackendError::Resource {
                resource: resource.to_string(),
                message: "not found".to_string(),
            });
        }
        Ok(())
    }

    fn load_session(
        &self,
        _handles: &RuntimeHandles,
    ) -> Result<Arc<dyn InferenceSession>, BackendError> {
        self.session_loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }

        let should_fail = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BackendError::Resource {
                resource: "model.safetensors".to_string(),
                message: "truncated weights".to_string(),
            });
        }

        let poison_id = self.tokenizer()?.encode(POISON_WORD)?.ids[1];
        Ok(Arc::new(InMemorySession {
            hidden_size: self.hidden_size,
            output_names: self.output_names.clone(),
            poison_id,
        }))
    }

    fn load_tokenizer(&self) -> Result<Tokenizer, BackendError> {
        if self.vocabulary {
            self.tokenizer()
        } else {
            Ok(Tokenizer::fallback())
        }
    }
}

struct InMemorySession {
    hidden_size: usize,
    output_names: Vec<String>,
    poison_id: u32,
}

impl InferenceSession for InMemorySession {
    fn input_names(&self) -> Vec<String> {
        vec!["input_ids".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn run(&self, tokens: &TokenSequence) -> Result<HiddenStates, BackendError> {
        let mut rows = Vec::with_capacity(tokens.len());

        for id in &tokens.ids {
            if *id == self.poison_id {
                return Err(BackendError::Inference("poisoned input".to_string()));
            }
            let mut row = vec![0.0; self.hidden_size];
            if *id as usize >= SPECIAL_TOKENS.len() {
                row[*id as usize % self.hidden_size] = 1.0;
            }
            rows.push(row);
        }

        Ok(HiddenStates { rows })
    }
}

/// Collect every event currently buffered on a receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
