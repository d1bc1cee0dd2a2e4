//! Text-to-token mapping for BERT-style sentence embedding models.
//!
//! Two flavours exist:
//! - `Tokenizer::Loaded` wraps the model's own `tokenizer.json`, so text is
//!   normalized (lowercasing, accent stripping, CJK splitting) and
//!   WordPiece-segmented the way the model was trained. Unknown words
//!   become `[UNK]`.
//! - `Tokenizer::Fallback` needs no vocabulary and hashes every word into a
//!   fixed BERT-sized id range, so the pipeline still gets a stable sequence.
//!
//! Both bracket the sequence with `[CLS]` / `[SEP]` and truncate to the
//! maximum sequence length instead of rejecting long input.

use std::path::Path;

use tokenizers::TruncationParams;

use crate::semantic::backend::BackendError;
use crate::semantic::DEFAULT_MAX_SEQUENCE_LENGTH;

/// Special token ids of the uncased BERT vocabulary.
const FALLBACK_CLS_ID: u32 = 101;
const FALLBACK_SEP_ID: u32 = 102;

/// Fallback tokens are hashed into `[FALLBACK_FIRST_ID, FALLBACK_VOCAB_SIZE)`.
const FALLBACK_FIRST_ID: u32 = 1000;
const FALLBACK_VOCAB_SIZE: u32 = 30522;

/// Token ids for a single text, including the boundary tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    pub ids: Vec<u32>,
    /// True when content tokens were dropped to fit the length limit.
    pub truncated: bool,
}

impl TokenSequence {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Text-to-token mapping used by the embedding pipeline.
#[derive(Debug, Clone)]
pub enum Tokenizer {
    Loaded(Box<tokenizers::Tokenizer>),
    Fallback { max_length: usize },
}

impl Tokenizer {
    /// Load a Hugging Face `tokenizer.json`.
    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            BackendError::Tokenizer(format!("Failed to load {}: {e}", path.display()))
        })?;
        Self::loaded(inner)
    }

    /// Parse an in-memory `tokenizer.json`.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self, BackendError> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| BackendError::Tokenizer(format!("malformed tokenizer.json: {e}")))?;
        Self::loaded(inner)
    }

    pub fn fallback() -> Self {
        Tokenizer::Fallback {
            max_length: DEFAULT_MAX_SEQUENCE_LENGTH,
        }
    }

    fn loaded(inner: tokenizers::Tokenizer) -> Result<Self, BackendError> {
        let mut tokenizer = Tokenizer::Loaded(Box::new(inner));
        tokenizer.set_max_length(DEFAULT_MAX_SEQUENCE_LENGTH)?;
        Ok(tokenizer)
    }

    /// Cap sequences at `max_length` ids, boundary tokens included.
    pub fn set_max_length(&mut self, max_length: usize) -> Result<(), BackendError> {
        match self {
            Tokenizer::Loaded(inner) => {
                inner
                    .with_truncation(Some(TruncationParams {
                        max_length,
                        ..Default::default()
                    }))
                    .map_err(|e| BackendError::Tokenizer(format!("invalid truncation: {e}")))?;
                // one text per forward pass
                inner.with_padding(None);
            }
            Tokenizer::Fallback { max_length: current } => *current = max_length,
        }
        Ok(())
    }

    /// Number of entries in the loaded vocabulary, added tokens included;
    /// zero for the fallback.
    pub fn vocab_len(&self) -> usize {
        match self {
            Tokenizer::Loaded(inner) => inner.get_vocab_size(true),
            Tokenizer::Fallback { .. } => 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Tokenizer::Loaded(_))
    }

    /// Tokenize `text`, bracketed by `[CLS]` and `[SEP]`.
    pub fn encode(&self, text: &str) -> Result<TokenSequence, BackendError> {
        match self {
            Tokenizer::Loaded(inner) => {
                let encoding = inner
                    .encode(text, true)
                    .map_err(|e| BackendError::Tokenizer(format!("Tokenization failed: {e}")))?;
                Ok(TokenSequence {
                    ids: encoding.get_ids().to_vec(),
                    truncated: !encoding.get_overflowing().is_empty(),
                })
            }
            Tokenizer::Fallback { max_length } => Ok(hash_encode(text, *max_length)),
        }
    }
}

fn hash_encode(text: &str, max_length: usize) -> TokenSequence {
    let budget = max_length.saturating_sub(2);
    let mut ids = Vec::with_capacity(budget.min(64) + 2);
    ids.push(FALLBACK_CLS_ID);

    let words = pre_tokenize(text);
    let truncated = words.len() > budget;
    ids.extend(
        words
            .iter()
            .take(budget)
            .map(|word| hash_into(word, FALLBACK_FIRST_ID, FALLBACK_VOCAB_SIZE)),
    );

    ids.push(FALLBACK_SEP_ID);
    TokenSequence { ids, truncated }
}

/// Split on whitespace, isolate punctuation and lowercase.
fn pre_tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_whitespace() || ch.is_control() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_ascii_punctuation() || !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            words.push(ch.to_string());
        } else {
            current.extend(ch.to_lowercase());
        }
    }

    if !current.is_empty() {
        words.push(current);
    }

    words
}

fn hash_into(word: &str, first: u32, end: u32) -> u32 {
    first + crc32fast::hash(word.as_bytes()) % (end - first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::tokenizer_json;

    const CLS: u32 = 2;
    const SEP: u32 = 3;
    const UNK: u32 = 1;

    fn loaded(words: &[&str]) -> Tokenizer {
        Tokenizer::from_bytes(tokenizer_json(words)).unwrap()
    }

    #[test]
    fn test_loaded_brackets_with_special_tokens() {
        let tokenizer = loaded(&["rust", "book"]);
        let seq = tokenizer.encode("rust book").unwrap();
        assert_eq!(seq.ids, vec![CLS, 5, 6, SEP]);
        assert!(!seq.truncated);
    }

    #[test]
    fn test_wordpiece_continuations() {
        let tokenizer = loaded(&["play", "##ing", "##ground"]);
        assert_eq!(tokenizer.encode("playing").unwrap().ids, vec![CLS, 5, 6, SEP]);
        assert_eq!(tokenizer.encode("playground").unwrap().ids, vec![CLS, 5, 7, SEP]);
    }

    #[test]
    fn test_accents_are_stripped() {
        let tokenizer = loaded(&["cafe", "menu", "resume"]);
        let seq = tokenizer.encode("Café résumé").unwrap();
        assert_eq!(seq.ids, vec![CLS, 5, 7, SEP]);
    }

    #[test]
    fn test_unknown_words_and_symbols_are_unk() {
        let tokenizer = loaded(&["cafe"]);
        assert_eq!(tokenizer.encode("🛒").unwrap().ids, vec![CLS, UNK, SEP]);
        assert_eq!(tokenizer.encode("zebra").unwrap().ids, vec![CLS, UNK, SEP]);
    }

    #[test]
    fn test_cjk_characters_split() {
        let tokenizer = loaded(&["cafe"]);
        let seq = tokenizer.encode("東京cafe").unwrap();
        assert_eq!(seq.ids, vec![CLS, UNK, UNK, 5, SEP]);
    }

    #[test]
    fn test_punctuation_is_split_and_case_folded() {
        let tokenizer = loaded(&["the", "rust", ".", "com"]);
        let seq = tokenizer.encode("The Rust.com").unwrap();
        assert_eq!(seq.ids, vec![CLS, 5, 6, 7, 8, SEP]);
    }

    #[test]
    fn test_truncation_keeps_boundaries() {
        let mut tokenizer = loaded(&["rust"]);
        tokenizer.set_max_length(8).unwrap();

        let seq = tokenizer.encode(&"rust ".repeat(50)).unwrap();
        assert_eq!(seq.len(), 8);
        assert!(seq.truncated);
        assert_eq!(seq.ids[0], CLS);
        assert_eq!(seq.ids[7], SEP);
    }

    #[test]
    fn test_default_truncation_applies_on_load() {
        let tokenizer = loaded(&["rust"]);
        let seq = tokenizer.encode(&"rust ".repeat(500)).unwrap();
        assert_eq!(seq.len(), DEFAULT_MAX_SEQUENCE_LENGTH);
    }

    #[test]
    fn test_malformed_tokenizer_json() {
        let result = Tokenizer::from_bytes("{\"model\": 1}");
        assert!(matches!(result, Err(BackendError::Tokenizer(_))));
    }

    #[test]
    fn test_fallback_is_stable_and_bounded() {
        let tokenizer = Tokenizer::fallback();
        let a = tokenizer.encode("Buy wireless mouse amazon.com").unwrap();
        let b = tokenizer.encode("Buy wireless mouse amazon.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.ids.first(), Some(&FALLBACK_CLS_ID));
        assert_eq!(a.ids.last(), Some(&FALLBACK_SEP_ID));
        for id in &a.ids[1..a.len() - 1] {
            assert!(*id >= FALLBACK_FIRST_ID && *id < FALLBACK_VOCAB_SIZE);
        }
        assert_eq!(tokenizer.vocab_len(), 0);
        assert!(!tokenizer.is_loaded());
    }

    #[test]
    fn test_fallback_truncates() {
        let mut tokenizer = Tokenizer::fallback();
        tokenizer.set_max_length(4).unwrap();
        let seq = tokenizer.encode("one two three four").unwrap();
        assert_eq!(seq.len(), 4);
        assert!(seq.truncated);
    }

    #[test]
    fn test_empty_text_is_just_boundaries() {
        let seq = Tokenizer::fallback().encode("   ").unwrap();
        assert_eq!(seq.ids, vec![FALLBACK_CLS_ID, FALLBACK_SEP_ID]);

        let seq = loaded(&["rust"]).encode("").unwrap();
        assert_eq!(seq.ids, vec![CLS, SEP]);
    }
}
