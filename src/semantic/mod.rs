//! Semantic grouping engine for browser tabs.
//!
//! # Architecture
//!
//! - `tokenizer`: WordPiece tokenizer with a hashing fallback
//! - `backend`: Inference backend and session traits
//! - `candle`: Local BERT backend on candle
//! - `lifecycle`: Validated initialization state machine
//! - `cache`: Bounded embedding cache
//! - `embeddings`: Tokenize, infer, pool and normalize, behind the lifecycle gate
//! - `cluster`: Greedy similarity clustering
//! - `labels`: Category labels and cohesion scores
//! - `fallback`: Domain-only grouping
//! - `service`: High-level grouping service

pub mod backend;
pub mod cache;
mod candle;
pub mod cluster;
pub mod embeddings;
pub mod fallback;
pub mod labels;
pub mod lifecycle;
mod service;
pub mod tokenizer;

pub use service::{GroupingError, GroupingResult, GroupingService, GroupingStrategy, ServiceStatus};

/// Output size of all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Default similarity threshold for grouping
pub const DEFAULT_THRESHOLD: f32 = 0.45;

/// Default number of cached embeddings
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Default token budget per text, including [CLS] and [SEP]
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 128;
