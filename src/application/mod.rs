// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (training, preparing data, creating a base).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct file format handling (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The LoRA fine-tuning workflow
pub mod train_use_case;

// Format + tokenize only, written to disk for inspection
pub mod prepare_use_case;

// Small base model directory built from a dataset
pub mod init_base_use_case;
