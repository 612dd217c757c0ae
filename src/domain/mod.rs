// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts
// of instruction tuning.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// The three record shapes follow the pipeline in order:
//
//   Record            → one line of the JSON-lines dataset
//   FormattedExample  → (prompt, target) text pair
//   TokenizedExample  → (input_ids, labels) token-id pair
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Dataset records and their derived forms
pub mod record;

// Core abstractions (traits) that other layers implement
pub mod traits;
