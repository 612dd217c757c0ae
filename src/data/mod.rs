// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from a raw JSON-lines file
// all the way to GPU-ready tensor batches.
//
// The pipeline flows in this order:
//
//   data.jsonl
//       │
//       ▼
//   JsonlLoader       → reads one Record per line
//       │
//       ▼
//   format_example    → builds the prompt / target pair
//       │
//       ▼
//   tokenize_example  → prompt and target token IDs, truncated
//       │
//       ▼
//   split_train_val   → optional held-out split
//       │
//       ▼
//   SftDataset        → implements Burn's Dataset trait
//       │
//       ▼
//   SftBatcher        → prompt ++ target, padded into tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Each module is responsible for exactly one step.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Loads instruction records from a JSON-lines file
pub mod loader;

/// Turns a record into prompt text and target text
pub mod formatter;

/// Encodes prompt and target into truncated token ID sequences
pub mod tokenize;

/// Implements Burn's Dataset trait for tokenized examples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;
