// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The model math and the training loop.
//
// What's in this layer:
//
//   lora.rs      — LoRA-capable linear projection
//                  • Frozen base Linear + optional adapter
//                  • y = Wx + b + (alpha/r)·B(A(dropout(x)))
//                  • AdapterWeights: the trainable tensors only
//
//   model.rs     — Decoder-only causal language model
//                  • Token + position embeddings
//                  • Causal multi-head self-attention
//                  • GELU MLP, pre-norm residual blocks
//                  • lm_head over the vocabulary
//                  • LoRA injection by projection name
//
//   trainer.rs   — The training loop
//                  Masked next-token loss, gradient
//                  accumulation, AdamW with linear decay,
//                  step checkpoints and per-epoch validation
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need
//            Hu et al. (2021) LoRA

/// LoRA adapter layer and configuration
pub mod lora;

/// Causal language model architecture
pub mod model;

/// Full training loop with validation and checkpointing
pub mod trainer;
