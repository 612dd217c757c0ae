// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the model directory's tokenizer.json, and can build a
// word-level tokenizer from a corpus for `init-base`.
//
// The built tokenizer is written as HuggingFace tokenizer JSON
// by hand and loaded back with Tokenizer::from_file, which avoids
// the trainer / ModelWrapper type mismatch in tokenizers 0.15.
// Words are counted with the crate's own Whitespace pre-tokenizer
// so the vocabulary matches what encoding produces.
//
// Special tokens of a built tokenizer:
//   <pad> = 0   <unk> = 1   <s> = 2   </s> = 3

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf};
use tokenizers::{
    pre_tokenizers::whitespace::Whitespace, OffsetReferential, OffsetType, PreTokenizedString,
    PreTokenizer, Tokenizer,
};

use crate::domain::traits::TextEncoder;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const PAD_TOKEN: &str = "<pad>";
const SPECIAL_TOKENS: [&str; 4] = [PAD_TOKEN, "<unk>", "<s>", "</s>"];

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))
    }

    /// Build a word-level vocabulary from `texts` (most frequent
    /// words first, at most `vocab_size` entries including the
    /// special tokens), write it and load it back.
    pub fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Count pre-tokenized pieces ────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for piece in pre_tokenize(&text.to_lowercase())? {
                *freq.entry(piece).or_insert(0) += 1;
            }
        }

        // Most frequent first; ties broken alphabetically so the
        // vocabulary is deterministic.
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(SPECIAL_TOKENS.len()));

        // ── Step 2: Build vocab JSON ──────────────────────────────────────────
        let mut vocab = serde_json::Map::new();
        for (id, tok) in SPECIAL_TOKENS.iter().enumerate() {
            vocab.insert(tok.to_string(), serde_json::json!(id));
        }
        for (word, _) in &words {
            if !vocab.contains_key(word) {
                let id = vocab.len();
                vocab.insert(word.clone(), serde_json::json!(id));
            }
        }

        let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
            .iter()
            .enumerate()
            .map(|(id, tok)| serde_json::json!({
                "id": id, "content": tok, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            }))
            .collect();

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "<unk>"
            }
        });

        let tok_path = self.path();
        std::fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", tok_path.display()))?;

        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            vocab.len(),
            tok_path.display()
        );

        self.load()
    }
}

/// Split with the same `Whitespace` pre-tokenizer the written
/// tokenizer declares, so every counted piece is one the model
/// will look up at encode time.
fn pre_tokenize(text: &str) -> Result<Vec<String>> {
    let mut pretokenized = PreTokenizedString::from(text);
    Whitespace::default()
        .pre_tokenize(&mut pretokenized)
        .map_err(anyhow::Error::msg)?;

    Ok(pretokenized
        .get_splits(OffsetReferential::Original, OffsetType::Byte)
        .into_iter()
        .map(|(piece, _, _)| piece.to_string())
        .collect())
}

/// Encodes with the special tokens the tokenizer file declares.
impl TextEncoder for Tokenizer {
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.encode(text, true).map_err(anyhow::Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "Instruction: Translate to French\nInput: Hello\nAnswer:".to_string(),
            "Bonjour".to_string(),
            "Instruction: Summarize\nAnswer:".to_string(),
        ]
    }

    #[test]
    fn test_pre_tokenize_splits_punctuation() {
        assert_eq!(pre_tokenize("answer: hi, there").unwrap(), vec!["answer", ":", "hi", ",", "there"]);
        assert_eq!(pre_tokenize("  ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_pre_tokenize_non_ascii() {
        assert_eq!(pre_tokenize("x² area").unwrap(), vec!["x", "²", "area"]);
        assert_eq!(pre_tokenize("cafe\u{301} noir").unwrap(), vec!["cafe\u{301}", "noir"]);
    }

    #[test]
    fn test_non_ascii_corpus_words_are_known() {
        let texts = vec![
            "Compute x² area".to_string(),
            "cafe\u{301} noir, s'il vous plaît".to_string(),
            "Übersetze: größer".to_string(),
        ];
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).build_and_save(&texts, 100).unwrap();

        for text in &texts {
            let ids = tok.encode_ids(text).unwrap();
            assert!(!ids.is_empty());
            assert!(!ids.contains(&1), "'{}' encoded to <unk>: {:?}", text, ids);
        }
    }

    #[test]
    fn test_built_tokenizer_encodes_corpus_words() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let tok   = store.build_and_save(&corpus(), 100).unwrap();

        assert_eq!(tok.token_to_id(PAD_TOKEN), Some(0));
        let ids = tok.encode_ids("Instruction: Summarize\nAnswer:").unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|&id| id >= SPECIAL_TOKENS.len() as u32));
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).build_and_save(&corpus(), 100).unwrap();
        assert_eq!(tok.encode_ids("zzzz").unwrap(), vec![1]);
    }

    #[test]
    fn test_vocab_size_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).build_and_save(&corpus(), 6).unwrap();
        assert_eq!(tok.get_vocab_size(true), 6);
    }

    #[test]
    fn test_reload_from_disk() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let built = store.build_and_save(&corpus(), 100).unwrap();
        let again = store.load().unwrap();
        assert_eq!(built.encode_ids("hello answer").unwrap(), again.encode_ids("hello answer").unwrap());
    }

    #[test]
    fn test_missing_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TokenizerStore::new(dir.path()).load().is_err());
    }
}
