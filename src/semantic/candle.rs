//! BERT sentence-embedding backend using Candle.
//!
//! Loads a model from a local directory laid out like a Hugging Face
//! checkout of all-MiniLM-L6-v2:
//! - `config.json` (BERT config)
//! - `model.safetensors` (weights)
//! - `tokenizer.json` (Hugging Face tokenizer)
//!
//! Nothing is ever downloaded.

use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};

use crate::semantic::backend::{
    BackendError, BackendKind, HiddenStates, InferenceBackend, InferenceSession, RuntimeHandles,
    RuntimeOptions,
};
use crate::semantic::tokenizer::{TokenSequence, Tokenizer};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

const INPUT_NAMES: [&str; 3] = ["input_ids", "token_type_ids", "attention_mask"];
const OUTPUT_NAMES: [&str; 1] = ["last_hidden_state"];

/// Candle runtime reading model files from `model_dir`.
pub struct CandleBackend {
    model_dir: PathBuf,
    device: Device,
}

impl CandleBackend {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            device: Device::Cpu,
        }
    }

    fn resource_error(&self, file: &str, message: impl ToString) -> BackendError {
        BackendError::Resource {
            resource: self.model_dir.join(file).display().to_string(),
            message: message.to_string(),
        }
    }
}

impl InferenceBackend for CandleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Candle
    }

    fn configure(&self, options: &RuntimeOptions) -> Result<RuntimeHandles, BackendError> {
        let location = self.model_dir.to_string_lossy();
        if location.contains("://") {
            return Err(BackendError::Configure(format!(
                "remote model location {location} is not allowed"
            )));
        }

        if let Some(threads) = options.threads {
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
            {
                log::debug!("compute pool already configured: {e}");
            }
        }

        let simd_supported = candle_core::utils::with_avx()
            || candle_core::utils::with_neon()
            || candle_core::utils::with_simd128();

        Ok(RuntimeHandles {
            threads: rayon::current_num_threads(),
            simd: options.simd && simd_supported,
            allow_remote: false,
            device: format!("{:?}", self.device),
        })
    }

    fn runtime_resources(&self) -> Vec<String> {
        vec![
            CONFIG_FILE.to_string(),
            WEIGHTS_FILE.to_string(),
            TOKENIZER_FILE.to_string(),
        ]
    }

    fn probe_resource(&self, resource: &str) -> Result<(), BackendError> {
        let metadata = std::fs::metadata(self.model_dir.join(resource))
            .map_err(|e| self.resource_error(resource, e))?;

        if !metadata.is_file() || metadata.len() == 0 {
            return Err(self.resource_error(resource, "not a non-empty file"));
        }

        Ok(())
    }

    fn load_session(
        &self,
        _handles: &RuntimeHandles,
    ) -> Result<Arc<dyn InferenceSession>, BackendError> {
        log::debug!("loading BERT config from {}", self.model_dir.display());
        let config_str = std::fs::read_to_string(self.model_dir.join(CONFIG_FILE))
            .map_err(|e| self.resource_error(CONFIG_FILE, e))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| BackendError::ModelLoad(format!("Failed to parse config: {e}")))?;

        let weights_path = self.model_dir.join(WEIGHTS_FILE);
        if !weights_path.is_file() {
            return Err(self.resource_error(WEIGHTS_FILE, "missing"));
        }

        log::debug!("loading model weights");
        // SAFETY: the weights file is only read, and stays in place for the
        // lifetime of the process.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &self.device)
                .map_err(|e| BackendError::ModelLoad(format!("Failed to load weights: {e}")))?
        };

        let model = BertModel::load(vb, &config)
            .map_err(|e| BackendError::ModelLoad(format!("Failed to create BERT model: {e}")))?;

        Ok(Arc::new(CandleSession {
            model,
            device: self.device.clone(),
        }))
    }

    fn load_tokenizer(&self) -> Result<Tokenizer, BackendError> {
        let tokenizer_path = self.model_dir.join(TOKENIZER_FILE);
        if !tokenizer_path.is_file() {
            return Err(self.resource_error(TOKENIZER_FILE, "missing"));
        }

        log::debug!("loading tokenizer");
        Tokenizer::from_file(&tokenizer_path)
    }
}

/// A loaded BERT encoder.
struct CandleSession {
    model: BertModel,
    device: Device,
}

fn inference_error(e: candle_core::Error) -> BackendError {
    BackendError::Inference(e.to_string())
}

impl InferenceSession for CandleSession {
    fn input_names(&self) -> Vec<String> {
        INPUT_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        OUTPUT_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn run(&self, tokens: &TokenSequence) -> Result<HiddenStates, BackendError> {
        if tokens.is_empty() {
            return Err(BackendError::Inference("empty token sequence".to_string()));
        }

        let input_ids = Tensor::new(tokens.ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(inference_error)?;
        let token_type_ids = input_ids.zeros_like().map_err(inference_error)?;
        let attention_mask = input_ids.ones_like().map_err(inference_error)?;

        // (1, seq_len, hidden)
        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(inference_error)?;

        let rows = output
            .squeeze(0)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(inference_error)?;

        Ok(HiddenStates { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::tokenizer_json;

    #[test]
    fn test_probe_missing_resources() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());

        for resource in backend.runtime_resources() {
            let result = backend.probe_resource(&resource);
            assert!(matches!(result, Err(BackendError::Resource { .. })));
        }
    }

    #[test]
    fn test_probe_present_resource() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), tokenizer_json(&[])).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());

        assert!(backend.probe_resource(TOKENIZER_FILE).is_ok());
        // empty files do not count
        assert!(backend.probe_resource(CONFIG_FILE).is_err());
    }

    #[test]
    fn test_configure_never_allows_remote() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());
        let handles = backend.configure(&RuntimeOptions::default()).unwrap();
        assert!(!handles.allow_remote);
        assert!(handles.threads > 0);
    }

    #[test]
    fn test_configure_rejects_remote_location() {
        let backend = CandleBackend::new(PathBuf::from("https://huggingface.co/model"));
        let result = backend.configure(&RuntimeOptions::default());
        assert!(matches!(result, Err(BackendError::Configure(_))));
    }

    #[test]
    fn test_load_session_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());
        let handles = backend.configure(&RuntimeOptions::default()).unwrap();
        let result = backend.load_session(&handles);
        assert!(matches!(result, Err(BackendError::Resource { .. })));
    }

    #[test]
    fn test_load_tokenizer_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), tokenizer_json(&["hello"])).unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());

        let tokenizer = backend.load_tokenizer().unwrap();
        assert!(tokenizer.is_loaded());
        assert!(tokenizer.vocab_len() >= 6);
        assert_eq!(tokenizer.encode("Hello").unwrap().ids, vec![2, 5, 3]);
    }

    #[test]
    fn test_load_tokenizer_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CandleBackend::new(dir.path().to_path_buf());
        let err = backend.load_tokenizer().unwrap_err();
        assert!(err.resource().unwrap().ends_with(TOKENIZER_FILE));
    }

    #[test]
    #[ignore = "requires local model files in TABGROUP_TEST_MODEL_DIR"]
    fn test_forward_pass_dimensions() {
        let dir = std::env::var("TABGROUP_TEST_MODEL_DIR").unwrap();
        let backend = CandleBackend::new(PathBuf::from(dir));
        let handles = backend.configure(&RuntimeOptions::default()).unwrap();
        let session = backend.load_session(&handles).unwrap();
        let tokenizer = backend.load_tokenizer().unwrap();

        let tokens = tokenizer.encode("Hello, world!").unwrap();
        let hidden = session.run(&tokens).unwrap();
        assert_eq!(hidden.seq_len(), tokens.len());
        assert_eq!(hidden.hidden_size(), Some(384));
    }
}
