// ============================================================
// Layer 6 — Pretrained Model Directory
// ============================================================
// A base model lives in one directory:
//
//   {model_dir}/
//     config.json      ← CausalLmConfig (architecture)
//     model.mpk.gz     ← full-precision weights (FullRecorder)
//     tokenizer.json   ← HuggingFace tokenizer
//
// The config is needed to rebuild the module tree before the
// weights can be loaded into it.

use anyhow::{Context, Result};
use burn::{prelude::*, record::Recorder};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::infra::{checkpoint::FullRecorder, tokenizer_store::TokenizerStore};
use crate::ml::model::{CausalLm, CausalLmConfig};

pub const CONFIG_FILE: &str = "config.json";
/// Recorder adds the `.mpk.gz` extension
pub const WEIGHTS_FILE: &str = "model";

pub struct ModelDirectory {
    dir: PathBuf,
}

impl ModelDirectory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn load_config(&self) -> Result<CausalLmConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let cfg  = CausalLmConfig::load(&path).map_err(|e| {
            anyhow::anyhow!("Cannot read model config '{}': {:?}", path.display(), e)
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_model<B: Backend>(
        &self,
        cfg:    &CausalLmConfig,
        device: &B::Device,
    ) -> Result<CausalLm<B>> {
        let path   = self.dir.join(WEIGHTS_FILE);
        let record = FullRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load base model weights '{}'", path.display())
            })?;

        tracing::info!(
            "Loaded base model from '{}' ({} layers, d_model={})",
            self.dir.display(), cfg.num_layers, cfg.d_model
        );
        Ok(cfg.init::<B>(device).load_record(record))
    }

    pub fn load_tokenizer(&self) -> Result<Tokenizer> {
        TokenizerStore::new(&self.dir).load()
    }

    /// Write config and weights. The tokenizer is written separately
    /// by `TokenizerStore` into the same directory.
    pub fn save_pretrained<B: Backend>(
        &self,
        cfg:   &CausalLmConfig,
        model: &CausalLm<B>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let cfg_path = self.dir.join(CONFIG_FILE);
        cfg.save(&cfg_path)
            .with_context(|| format!("Cannot write '{}'", cfg_path.display()))?;

        let path = self.dir.join(WEIGHTS_FILE);
        FullRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save model to '{}'", path.display()))?;

        tracing::info!("Saved base model to '{}'", self.dir.display());
        Ok(())
    }
}
