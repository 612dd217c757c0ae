// ============================================================
// Layer 3 — Record Domain Types
// ============================================================
// One instruction-tuning example in each of its three forms.
//
// Example JSON-lines input:
//   {"instruction": "Translate to French", "input": "Hello", "output": "Bonjour"}
//
// None of these types are mutated after construction: each stage
// of the pipeline consumes one form and produces the next.

use serde::{Deserialize, Serialize};

/// A raw instruction/input/output triple as read from the dataset.
///
/// All three keys are required; an empty `input` string is how a
/// record says it has no input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

impl Record {
    pub fn new(
        instruction: impl Into<String>,
        input:       impl Into<String>,
        output:      impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            input:       input.into(),
            output:      output.into(),
        }
    }

    /// True when the record carries a non-blank `input` field
    pub fn has_input(&self) -> bool {
        !self.input.trim_matches(is_blank).is_empty()
    }
}

/// Unicode whitespace plus the ASCII information separators
/// (U+001C..=U+001F), which dataset tooling also strips as blank.
fn is_blank(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}

/// Prompt text shown to the model and the answer it should produce.
/// The prompt always ends with the answer cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedExample {
    pub prompt: String,
    pub target: String,
}

/// Token ids for the prompt and, separately, the supervised labels.
///
/// Both sequences are truncated independently, so neither can be
/// decoded back to the exact original text once a limit was hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub labels:    Vec<u32>,
}

impl TokenizedExample {
    /// Length of the teacher-forced training sequence (prompt ++ labels)
    pub fn sequence_len(&self) -> usize {
        self.input_ids.len() + self.labels.len()
    }
}
