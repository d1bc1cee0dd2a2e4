//! Tab grouping service.
//!
//! Ties the lifecycle, the cached embedder, clustering, labelling and the
//! domain fallback together:
//! - initialization is bounded by `init_timeout_secs`
//! - any initialization failure degrades to domain-only grouping
//! - the engine can be disabled entirely through config

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::Config;
use crate::semantic::backend::InferenceBackend;
use crate::semantic::cache::{CacheStats, EmbeddingCache};
use crate::semantic::candle::CandleBackend;
use crate::semantic::cluster::{self, Clustering, Group};
use crate::semantic::embeddings::Embedder;
use crate::semantic::fallback::{self, DomainLabels};
use crate::semantic::labels;
use crate::semantic::lifecycle::{ErrorEnvelope, Lifecycle, LifecycleSnapshot};
use crate::tabs::TabDescriptor;

/// Errors that can occur while serving grouping requests.
#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    #[error("Threshold must be between 0.0 and 1.0 (exclusive), got {0}")]
    InvalidThreshold(f32),

    #[error("Semantic grouping is disabled")]
    Disabled,

    #[error("Initialization did not finish within {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Initialization(#[from] ErrorEnvelope),
}

/// How a grouping result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    Semantic,
    Domain,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupingResult {
    pub groups: Vec<Group>,
    pub ungrouped: Vec<TabDescriptor>,
    pub strategy: GroupingStrategy,
}

impl GroupingResult {
    fn new(clustering: Clustering, strategy: GroupingStrategy) -> Self {
        Self {
            groups: clustering.groups,
            ungrouped: clustering.ungrouped,
            strategy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub entries: usize,
    pub capacity: usize,
    #[serde(flatten)]
    pub stats: CacheStats,
}

/// Engine status as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub enabled: bool,
    #[serde(flatten)]
    pub lifecycle: LifecycleSnapshot,
    pub cache: CacheStatus,
}

/// Groups tabs semantically, or by domain when the engine is unavailable.
pub struct GroupingService {
    config: Config,
    lifecycle: Lifecycle,
    embedder: Embedder,
    domain_labels: DomainLabels,
}

impl GroupingService {
    /// Create a service backed by the local candle model.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let backend = Arc::new(CandleBackend::new(config.model_dir()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: Config,
        backend: Arc<dyn InferenceBackend>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let lifecycle = Lifecycle::new(backend, config.engine.lifecycle_options()?);
        let embedder = Embedder::new(
            lifecycle.clone(),
            EmbeddingCache::new(config.engine.cache_capacity),
        );
        let domain_labels = DomainLabels::with_overrides(&config.domain_labels);

        Ok(Self {
            config,
            lifecycle,
            embedder,
            domain_labels,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.engine.enabled
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            enabled: self.is_enabled(),
            lifecycle: self.lifecycle.snapshot(),
            cache: CacheStatus {
                entries: self.embedder.cache_len(),
                capacity: self.embedder.cache_capacity(),
                stats: self.embedder.cache_stats(),
            },
        }
    }

    /// Run (or join) initialization, waiting at most `init_timeout_secs`.
    ///
    /// A timed out attempt keeps running in the background.
    pub async fn initialize(&self) -> Result<(), GroupingError> {
        if !self.is_enabled() {
            return Err(GroupingError::Disabled);
        }

        let secs = self.config.engine.init_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), self.lifecycle.initialize()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GroupingError::Timeout(secs)),
        }
    }

    /// Group `tabs`.
    ///
    /// Only an invalid threshold is an error; everything else falls back to
    /// domain grouping.
    pub async fn group_tabs(
        &self,
        tabs: Vec<TabDescriptor>,
        threshold: Option<f32>,
        domain_only: bool,
    ) -> Result<GroupingResult, GroupingError> {
        let threshold = threshold.unwrap_or(self.config.engine.default_threshold);
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(GroupingError::InvalidThreshold(threshold));
        }

        let (pinned, tabs): (Vec<TabDescriptor>, Vec<TabDescriptor>) = if self
            .config
            .engine
            .skip_pinned
        {
            tabs.into_iter().partition(|tab| tab.pinned)
        } else {
            (Vec::new(), tabs)
        };

        let mut result = if domain_only || !self.is_enabled() {
            self.group_by_domain(tabs)
        } else {
            match self.initialize().await {
                Ok(()) => self.group_semantically(tabs, threshold).await,
                Err(e) => {
                    log::warn!("falling back to domain grouping: {e}");
                    self.group_by_domain(tabs)
                }
            }
        };

        result.ungrouped.extend(pinned);
        Ok(result)
    }

    fn group_by_domain(&self, tabs: Vec<TabDescriptor>) -> GroupingResult {
        GroupingResult::new(
            fallback::group_by_domain(tabs, &self.domain_labels),
            GroupingStrategy::Domain,
        )
    }

    async fn group_semantically(&self, tabs: Vec<TabDescriptor>, threshold: f32) -> GroupingResult {
        let texts: Vec<String> = tabs.iter().map(TabDescriptor::text_key).collect();

        // NotReady is still possible if a retry reset the lifecycle meanwhile
        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                log::warn!("falling back to domain grouping: {e}");
                return self.group_by_domain(tabs);
            }
        };

        let mut clustering = cluster::cluster(tabs.into_iter().zip(embeddings).collect(), threshold);
        for group in clustering.groups.iter_mut() {
            labels::annotate(group);
        }

        log::debug!(
            "grouped {} tabs into {} groups, {} ungrouped",
            clustering.grouped_count(),
            clustering.groups.len(),
            clustering.ungrouped.len()
        );

        GroupingResult::new(clustering, GroupingStrategy::Semantic)
    }
}
