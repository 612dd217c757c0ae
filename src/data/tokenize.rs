// ============================================================
// Layer 4 — Tokenizer Adapter
// ============================================================
// Encodes a FormattedExample into token ids.
//
// The prompt and the target are encoded as two SEPARATE
// sequences — nothing is concatenated here:
//
//   prompt → input_ids   (at most max_prompt_tokens, default 512)
//   target → labels      (at most max_target_tokens, default 256)
//
// Truncation keeps the leading tokens and drops the rest.
// Tokenizer errors are returned unchanged to the caller.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::record::{FormattedExample, TokenizedExample};
use crate::domain::traits::TextEncoder;

pub const DEFAULT_MAX_PROMPT_TOKENS: usize = 512;
pub const DEFAULT_MAX_TARGET_TOKENS: usize = 256;

/// Per-sequence truncation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizeLimits {
    pub max_prompt_tokens: usize,
    pub max_target_tokens: usize,
}

impl Default for TokenizeLimits {
    fn default() -> Self {
        Self {
            max_prompt_tokens: DEFAULT_MAX_PROMPT_TOKENS,
            max_target_tokens: DEFAULT_MAX_TARGET_TOKENS,
        }
    }
}

pub fn tokenize_example<E: TextEncoder + ?Sized>(
    encoder: &E,
    example: &FormattedExample,
    limits:  TokenizeLimits,
) -> Result<TokenizedExample> {
    let mut input_ids = encoder.encode_ids(&example.prompt)?;
    input_ids.truncate(limits.max_prompt_tokens);

    let mut labels = encoder.encode_ids(&example.target)?;
    labels.truncate(limits.max_target_tokens);

    Ok(TokenizedExample { input_ids, labels })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    /// One id per whitespace-separated word, id = word length
    struct WordLenEncoder;

    impl TextEncoder for WordLenEncoder {
        fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
        }
    }

    struct FailingEncoder;

    impl TextEncoder for FailingEncoder {
        fn encode_ids(&self, _text: &str) -> Result<Vec<u32>> {
            anyhow::bail!("malformed text")
        }
    }

    fn example(prompt_words: usize, target_words: usize) -> FormattedExample {
        FormattedExample {
            prompt: vec!["ab"; prompt_words].join(" "),
            target: vec!["xyz"; target_words].join(" "),
        }
    }

    #[test]
    fn test_short_example_is_not_truncated() {
        let t = tokenize_example(&WordLenEncoder, &example(3, 2), TokenizeLimits::default()).unwrap();
        assert_eq!(t.input_ids, vec![2, 2, 2]);
        assert_eq!(t.labels,    vec![3, 3]);
    }

    #[test]
    fn test_long_sequences_are_bounded() {
        let t = tokenize_example(&WordLenEncoder, &example(2000, 1000), TokenizeLimits::default()).unwrap();
        assert_eq!(t.input_ids.len(), 512);
        assert_eq!(t.labels.len(),    256);
    }

    #[test]
    fn test_limits_apply_independently() {
        let limits = TokenizeLimits { max_prompt_tokens: 4, max_target_tokens: 100 };
        let t = tokenize_example(&WordLenEncoder, &example(10, 10), limits).unwrap();
        assert_eq!(t.input_ids.len(), 4);
        assert_eq!(t.labels.len(),    10);
    }

    #[test]
    fn test_bounds_hold_across_sizes() {
        for n in [0usize, 1, 255, 256, 257, 511, 512, 513, 900] {
            let t = tokenize_example(&WordLenEncoder, &example(n, n), TokenizeLimits::default()).unwrap();
            assert!(t.input_ids.len() <= 512);
            assert!(t.labels.len()    <= 256);
        }
    }

    #[test]
    fn test_encoder_error_propagates() {
        let r = tokenize_example(&FailingEncoder, &example(1, 1), TokenizeLimits::default());
        assert_eq!(r.unwrap_err().to_string(), "malformed text");
    }
}
