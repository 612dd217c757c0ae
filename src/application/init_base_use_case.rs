// ============================================================
// Layer 2 — InitBaseUseCase
// ============================================================
// Creates a small base model directory from a dataset so the
// train pipeline can run end to end without an external
// pretrained checkpoint:
//
//   Step 1: Load + format records        (Layer 4 - data)
//   Step 2: Build word-level tokenizer   (Layer 6 - infra)
//   Step 3: Random-init CausalLm         (Layer 5 - ml)
//   Step 4: Save config + weights        (Layer 6 - infra)
//
// Initialisation runs on the NdArray backend; the saved record
// loads on any backend.

use anyhow::Result;
use burn::{backend::NdArray, prelude::*};
use std::path::PathBuf;

use crate::data::{formatter::format_example, loader::JsonlLoader};
use crate::domain::traits::RecordSource;
use crate::infra::{model_dir::ModelDirectory, tokenizer_store::{TokenizerStore, PAD_TOKEN}};
use crate::ml::model::CausalLmConfig;

type InitBackend = NdArray;

#[derive(Debug, Clone)]
pub struct InitBaseConfig {
    pub data_path:               PathBuf,
    pub model_dir:               PathBuf,
    /// Upper bound; the tokenizer may end up smaller
    pub vocab_size:              usize,
    pub max_position_embeddings: usize,
    pub d_model:                 usize,
    pub num_heads:               usize,
    pub num_layers:              usize,
    pub d_ff:                    usize,
    pub seed:                    u64,
}

pub struct InitBaseUseCase {
    config: InitBaseConfig,
}

impl InitBaseUseCase {
    pub fn new(config: InitBaseConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<CausalLmConfig> {
        let cfg = &self.config;

        // ── Step 1: corpus = every prompt and target ──────────────────────────
        let records = JsonlLoader::new(&cfg.data_path).load_all()?;
        anyhow::ensure!(!records.is_empty(), "No records in '{}'", cfg.data_path.display());

        let corpus: Vec<String> = records
            .iter()
            .map(format_example)
            .flat_map(|f| [f.prompt, f.target])
            .collect();

        // ── Step 2: tokenizer ─────────────────────────────────────────────────
        let tokenizer = TokenizerStore::new(&cfg.model_dir).build_and_save(&corpus, cfg.vocab_size)?;
        let pad_token_id = tokenizer
            .token_to_id(PAD_TOKEN)
            .ok_or_else(|| anyhow::anyhow!("Built tokenizer has no {PAD_TOKEN} token"))?;

        // ── Step 3: model ─────────────────────────────────────────────────────
        let model_cfg = CausalLmConfig::new(tokenizer.get_vocab_size(true))
            .with_max_position_embeddings(cfg.max_position_embeddings)
            .with_d_model(cfg.d_model)
            .with_num_heads(cfg.num_heads)
            .with_num_layers(cfg.num_layers)
            .with_d_ff(cfg.d_ff)
            .with_pad_token_id(pad_token_id);
        model_cfg.validate()?;

        InitBackend::seed(cfg.seed);
        let device = Default::default();
        let model  = model_cfg.init::<InitBackend>(&device);
        tracing::info!(
            "Initialised base model: vocab={}, {} layers, d_model={}, {} params",
            model_cfg.vocab_size, model_cfg.num_layers, model_cfg.d_model, model.num_params()
        );

        // ── Step 4: save ──────────────────────────────────────────────────────
        ModelDirectory::new(&cfg.model_dir).save_pretrained(&model_cfg, &model)?;
        Ok(model_cfg)
    }
}
