// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem on behalf of the
// other layers:
//
//   model_dir.rs       — Pretrained base model directory
//                        config.json + weights + tokenizer.
//                        Read by `train`/`prepare`, written
//                        by `init-base`.
//
//   tokenizer_store.rs — Tokenizer persistence
//                        Loads tokenizer.json, or builds a
//                        word-level tokenizer from a corpus.
//
//   checkpoint.rs      — Adapter weights and run artifacts
//                        Uses Burn's recorders to write only
//                        the LoRA tensors, plus the JSON
//                        configs and per-step checkpoints.
//
//   metrics.rs         — Training metrics logging
//                        Appends train/eval losses to a CSV
//                        file for later analysis and plotting.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Base model directory loading and saving
pub mod model_dir;

/// Tokenizer loading and building
pub mod tokenizer_store;

/// Adapter weights, configs and step checkpoints
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
