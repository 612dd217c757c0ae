// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer programs against these traits so the
// concrete file format and tokenizer can be swapped:
//   - JsonlLoader implements RecordSource
//   - tokenizers::Tokenizer implements TextEncoder
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use crate::domain::record::Record;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Any component that can load instruction records.
pub trait RecordSource {
    /// Load every record from this source, in file order.
    fn load_all(&self) -> Result<Vec<Record>>;
}

// ─── TextEncoder ──────────────────────────────────────────────────────────────
/// Maps text to token ids using a fixed vocabulary.
///
/// Implementations must be deterministic: the same text always
/// encodes to the same ids.
pub trait TextEncoder {
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>>;
}
