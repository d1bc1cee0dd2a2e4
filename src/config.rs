use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::backend::RuntimeOptions;
use crate::semantic::lifecycle::LifecycleOptions;
use crate::semantic::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_SEQUENCE_LENGTH, DEFAULT_THRESHOLD, EMBEDDING_DIMENSIONS,
};

const CONFIG_FILE: &str = "config.yaml";

/// Default sentence-embedding model directory name under `<base>/models`
const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";
/// Overall deadline for initialization before falling back to domain grouping
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Base directory for config and models.
///
/// `TABGROUP_BASE_PATH` wins; otherwise `~/.local/share/tabgroup`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("TABGROUP_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/tabgroup"))
}

/// Configuration for the semantic grouping engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Disable to always use domain-only grouping
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Local model directory (config.json, model.safetensors, tokenizer.json)
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// Default similarity threshold, exclusive (0.0, 1.0)
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Inference threads: "auto" or a positive integer
    #[serde(default = "default_threads")]
    pub threads: String,

    #[serde(default = "default_enabled")]
    pub simd: bool,

    /// Seconds to wait for initialization before falling back
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Leave pinned tabs out of groups
    #[serde(default = "default_enabled")]
    pub skip_pinned: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: None,
            default_threshold: DEFAULT_THRESHOLD,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_sequence_length: DEFAULT_MAX_SEQUENCE_LENGTH,
            embedding_dimensions: EMBEDDING_DIMENSIONS,
            threads: "auto".to_string(),
            simd: true,
            init_timeout_secs: DEFAULT_INIT_TIMEOUT_SECS,
            skip_pinned: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_max_sequence_length() -> usize {
    DEFAULT_MAX_SEQUENCE_LENGTH
}

fn default_embedding_dimensions() -> usize {
    EMBEDDING_DIMENSIONS
}

fn default_threads() -> String {
    "auto".to_string()
}

fn default_init_timeout_secs() -> u64 {
    DEFAULT_INIT_TIMEOUT_SECS
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.default_threshold > 0.0 && self.default_threshold < 1.0) {
            bail!(
                "engine.default_threshold must be between 0.0 and 1.0 (exclusive), got {}",
                self.default_threshold
            );
        }

        // [CLS] + at least one token + [SEP]
        if self.max_sequence_length < 3 {
            bail!(
                "engine.max_sequence_length must be at least 3, got {}",
                self.max_sequence_length
            );
        }

        if self.embedding_dimensions == 0 {
            bail!("engine.embedding_dimensions must be greater than 0");
        }

        if self.init_timeout_secs == 0 {
            bail!("engine.init_timeout_secs must be greater than 0");
        }

        self.thread_count()?;

        Ok(())
    }

    /// `None` for "auto".
    pub fn thread_count(&self) -> anyhow::Result<Option<usize>> {
        if self.threads == "auto" {
            return Ok(None);
        }
        match self.threads.parse::<usize>() {
            Ok(0) | Err(_) => bail!(
                "engine.threads must be 'auto' or a positive integer, got '{}'",
                self.threads
            ),
            Ok(n) => Ok(Some(n)),
        }
    }

    pub fn model_dir(&self, base_path: &Path) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| base_path.join("models").join(DEFAULT_MODEL_NAME))
    }

    pub fn lifecycle_options(&self) -> anyhow::Result<LifecycleOptions> {
        Ok(LifecycleOptions {
            runtime: RuntimeOptions {
                threads: self.thread_count()?,
                simd: self.simd,
            },
            max_sequence_length: self.max_sequence_length,
            dimensions: self.embedding_dimensions,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Extra labels for domain-only grouping, e.g. `intranet.local: "🏢 Intranet"`
    #[serde(default)]
    pub domain_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine.validate()?;

        for (domain, label) in &self.domain_labels {
            if domain.trim().is_empty() {
                bail!("domain_labels contains an empty domain");
            }
            if label.trim().is_empty() {
                bail!("domain_labels.{domain} is empty");
            }
        }

        if self.daemon.listen.trim().is_empty() {
            bail!("daemon.listen must not be empty");
        }

        Ok(())
    }

    pub fn model_dir(&self) -> PathBuf {
        self.engine.model_dir(&self.base_path)
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.enabled);
        assert_eq!(config.default_threshold, 0.45);
        assert_eq!(config.cache_capacity, 500);
        assert_eq!(config.max_sequence_length, 128);
        assert_eq!(config.embedding_dimensions, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        for threshold in [0.0, 1.0, -0.1, 1.5, f32::NAN] {
            let config = EngineConfig {
                default_threshold: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{threshold} accepted");
        }
    }

    #[test]
    fn test_threads() {
        let mut config = EngineConfig::default();
        assert_eq!(config.thread_count().unwrap(), None);

        config.threads = "4".to_string();
        assert_eq!(config.thread_count().unwrap(), Some(4));

        config.threads = "0".to_string();
        assert!(config.validate().is_err());

        config.threads = "many".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_sequence_rejected() {
        let config = EngineConfig {
            max_sequence_length: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_gets_defaults() {
        let config: Config = serde_yml::from_str("engine:\n  enabled: false\n").unwrap();
        assert!(!config.engine.enabled);
        assert_eq!(config.engine.default_threshold, 0.45);
        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
        assert!(config.domain_labels.is_empty());
    }

    #[test]
    fn test_load_with_creates_and_upgrades_file() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(dir.path().join(CONFIG_FILE).exists());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "engine:\n  default_threshold: 0.6\ndomain_labels:\n  intranet.local: Intranet\n",
        )
        .unwrap();
        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.engine.default_threshold, 0.6);
        assert_eq!(config.domain_labels["intranet.local"], "Intranet");

        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("cache_capacity"));
        assert!(saved.contains("listen"));
    }

    #[test]
    fn test_load_with_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "engine:\n  default_threshold: 2.0\n",
        )
        .unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }

    #[test]
    fn test_model_dir_default() {
        let config = EngineConfig::default();
        assert_eq!(
            config.model_dir(Path::new("/data")),
            PathBuf::from("/data/models/all-MiniLM-L6-v2")
        );
    }
}
