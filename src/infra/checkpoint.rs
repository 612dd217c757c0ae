// ============================================================
// Layer 6 — Adapter Store
// ============================================================
// Saves and restores LoRA adapter weights with Burn's recorders.
// Only the trainable tensors are written, never the frozen base.
//
// File layout:
//   {output_dir}/
//     adapter_model.mpk.gz      ← final adapter weights
//     adapter_config.json       ← LoraConfig, needed to re-inject
//     training_args.json        ← TrainingArguments of the run
//     log_history.csv           ← written by MetricsLogger
//     checkpoint-100/
//       adapter_model.mpk.gz
//       adapter_config.json
//       trainer_state.json      ← step, epoch, log history so far
//     checkpoint-200/
//       ...
//
// Precision of the weight files follows TrainingArguments:
//   fp16 → HalfRecorder  (half precision, gzip'd named MessagePack)
//   fp32 → FullRecorder  (full precision, gzip'd named MessagePack)
// Loading must use the same precision the files were written with.
// Only the stored tensors change precision; training math is f32.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{
        FullPrecisionSettings, HalfPrecisionSettings, NamedMpkGzFileRecorder, Record, Recorder,
    },
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::{Precision, TrainingArguments};
use crate::infra::metrics::LogEntry;
use crate::ml::{
    lora::{AdapterWeights, LoraConfig},
    model::CausalLm,
};

/// Recorder adds the `.mpk.gz` extension
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model";
pub const ADAPTER_CONFIG_FILE:  &str = "adapter_config.json";
pub const TRAINING_ARGS_FILE:   &str = "training_args.json";
pub const TRAINER_STATE_FILE:   &str = "trainer_state.json";

pub type FullRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;
pub type HalfRecorder = NamedMpkGzFileRecorder<HalfPrecisionSettings>;

/// Progress snapshot written into every step checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    pub max_steps:   usize,
    pub epoch:       f64,
    pub log_history: Vec<LogEntry>,
}

pub struct AdapterStore {
    dir:       PathBuf,
    precision: Precision,
}

impl AdapterStore {
    /// Prepare `dir` for a new run.
    ///
    /// With `overwrite` an existing directory is cleared first;
    /// without it a non-empty directory is an error.
    pub fn create(dir: impl AsRef<Path>, overwrite: bool, precision: Precision) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if dir.exists() {
            let non_empty = fs::read_dir(&dir)
                .with_context(|| format!("Cannot read output directory '{}'", dir.display()))?
                .next()
                .is_some();
            if non_empty {
                if !overwrite {
                    bail!(
                        "Output directory '{}' already exists and is not empty. \
                         Pass --overwrite-output-dir true to replace it.",
                        dir.display()
                    );
                }
                tracing::warn!("Clearing existing output directory '{}'", dir.display());
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Cannot clear '{}'", dir.display()))?;
            }
        }

        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir, precision })
    }

    /// Open the artifacts of a finished run for loading
    pub fn open(dir: impl AsRef<Path>, precision: Precision) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), precision }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_dir(&self, step: usize) -> PathBuf {
        self.dir.join(format!("checkpoint-{step}"))
    }

    pub fn save_training_args(&self, args: &TrainingArguments) -> Result<()> {
        write_json(&self.dir.join(TRAINING_ARGS_FILE), args)
    }

    /// Write the final adapter weights and config into the output directory.
    pub fn save_final<B: Backend>(&self, model: &CausalLm<B>, lora: &LoraConfig) -> Result<()> {
        self.save_adapters(&self.dir, model, lora)?;
        tracing::info!("Saved adapters to '{}'", self.dir.display());
        Ok(())
    }

    /// Write `checkpoint-{step}/` with adapters, config and trainer state.
    pub fn save_checkpoint<B: Backend>(
        &self,
        model: &CausalLm<B>,
        lora:  &LoraConfig,
        state: &TrainerState,
    ) -> Result<PathBuf> {
        let dir = self.checkpoint_dir(state.global_step);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;

        self.save_adapters(&dir, model, lora)?;
        write_json(&dir.join(TRAINER_STATE_FILE), state)?;

        tracing::debug!("Saved checkpoint at step {}", state.global_step);
        Ok(dir)
    }

    /// Inject adapters described by `adapter_config.json` into `base`
    /// and load the saved weights into them.
    pub fn load_adapters<B: Backend>(
        &self,
        base:   CausalLm<B>,
        device: &B::Device,
    ) -> Result<(CausalLm<B>, LoraConfig)> {
        let cfg_path = self.dir.join(ADAPTER_CONFIG_FILE);
        let json     = fs::read_to_string(&cfg_path)
            .with_context(|| format!("Cannot read adapter config '{}'", cfg_path.display()))?;
        let lora: LoraConfig = serde_json::from_str(&json)
            .with_context(|| format!("Malformed adapter config '{}'", cfg_path.display()))?;

        let model    = base.inject_lora(&lora, device)?;
        let template = model.adapter_weights(&lora);

        let path    = self.dir.join(ADAPTER_WEIGHTS_FILE);
        let record  = load_record::<B, _>(self.precision, path, device)?;
        let weights = template.load_record(record);

        tracing::info!(
            "Loaded {} adapted projections from '{}'",
            weights.num_adapted(),
            self.dir.display()
        );
        let model = model.apply_adapter_weights(weights);
        Ok((model, lora))
    }

    fn save_adapters<B: Backend>(
        &self,
        dir:   &Path,
        model: &CausalLm<B>,
        lora:  &LoraConfig,
    ) -> Result<()> {
        let weights: AdapterWeights<B> = model.adapter_weights(lora);
        write_record::<B, _>(self.precision, weights.into_record(), dir.join(ADAPTER_WEIGHTS_FILE))?;
        write_json(&dir.join(ADAPTER_CONFIG_FILE), lora)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

fn write_record<B: Backend, R: Record<B>>(precision: Precision, record: R, path: PathBuf) -> Result<()> {
    let result = match precision {
        Precision::Fp16 => <HalfRecorder as Recorder<B>>::record(&HalfRecorder::new(), record, path.clone()),
        Precision::Fp32 => <FullRecorder as Recorder<B>>::record(&FullRecorder::new(), record, path.clone()),
    };
    result.with_context(|| format!("Failed to save adapter weights to '{}'", path.display()))
}

fn load_record<B: Backend, R: Record<B>>(precision: Precision, path: PathBuf, device: &B::Device) -> Result<R> {
    let result = match precision {
        Precision::Fp16 => <HalfRecorder as Recorder<B>>::load(&HalfRecorder::new(), path.clone(), device),
        Precision::Fp32 => <FullRecorder as Recorder<B>>::load(&FullRecorder::new(), path.clone(), device),
    };
    result.with_context(|| {
        format!("Cannot load adapter weights '{}'. Was the run saved with this precision?", path.display())
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Split;
    use crate::ml::model::CausalLmConfig;
    use burn::{backend::NdArray, module::Param, tensor::Distribution};

    type TB = NdArray;

    fn small_model(device: &<TB as Backend>::Device) -> CausalLm<TB> {
        CausalLmConfig::new(24)
            .with_max_position_embeddings(8)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16)
            .init(device)
    }

    /// Inject adapters and give B random values so they matter.
    fn trained(base: CausalLm<TB>, lora: &LoraConfig, device: &<TB as Backend>::Device) -> CausalLm<TB> {
        base.inject_lora(lora, device).unwrap().map_projections(|_, mut p| {
            if let Some(a) = p.adapter.as_mut() {
                let shape = a.lora_b.shape();
                a.lora_b = Param::from_tensor(Tensor::random(shape, Distribution::Default, device));
            }
            p
        })
    }

    fn ids(device: &<TB as Backend>::Device) -> Tensor<TB, 2, Int> {
        Tensor::<TB, 1, Int>::from_ints([3, 7, 1, 9].as_slice(), device).reshape([1, 4])
    }

    #[test]
    fn test_create_refuses_non_empty_dir_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stale.txt"), "x").unwrap();

        assert!(AdapterStore::create(dir.path(), false, Precision::Fp32).is_err());
        assert!(dir.path().join("stale.txt").exists());
    }

    #[test]
    fn test_create_clears_dir_with_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.txt"), "x").unwrap();

        AdapterStore::create(&out, true, Precision::Fp32).unwrap();
        assert!(out.exists());
        assert!(!out.join("stale.txt").exists());
    }

    #[test]
    fn test_create_accepts_empty_dir_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AdapterStore::create(dir.path(), false, Precision::Fp16).is_ok());
    }

    #[test]
    fn test_save_and_load_adapters_roundtrip() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let lora   = LoraConfig { lora_dropout: 0.0, ..Default::default() };
        let base   = small_model(&device);
        let model  = trained(base.clone(), &lora, &device);

        let store = AdapterStore::create(dir.path(), true, Precision::Fp32).unwrap();
        store.save_final(&model, &lora).unwrap();
        assert!(dir.path().join("adapter_model.mpk.gz").exists());
        assert!(dir.path().join(ADAPTER_CONFIG_FILE).exists());

        let (restored, loaded_cfg) = store.load_adapters(base, &device).unwrap();
        assert_eq!(loaded_cfg, lora);
        model.forward(ids(&device)).into_data()
            .assert_approx_eq(&restored.forward(ids(&device)).into_data(), 4);
    }

    #[test]
    fn test_half_precision_roundtrip_is_close() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let lora   = LoraConfig { lora_dropout: 0.0, ..Default::default() };
        let base   = small_model(&device);
        let model  = trained(base.clone(), &lora, &device);

        let store = AdapterStore::create(dir.path(), true, Precision::Fp16).unwrap();
        store.save_final(&model, &lora).unwrap();

        let (restored, _) = store.load_adapters(base, &device).unwrap();
        model.forward(ids(&device)).into_data()
            .assert_approx_eq(&restored.forward(ids(&device)).into_data(), 1);
    }

    #[test]
    fn test_both_precisions_write_gzip_records() {
        let device = Default::default();
        let lora   = LoraConfig::default();
        let model  = small_model(&device).inject_lora(&lora, &device).unwrap();

        for precision in [Precision::Fp16, Precision::Fp32] {
            let dir   = tempfile::tempdir().unwrap();
            let store = AdapterStore::create(dir.path(), true, precision).unwrap();
            store.save_final(&model, &lora).unwrap();
            assert!(dir.path().join("adapter_model.mpk.gz").exists());
            assert!(!dir.path().join("adapter_model.mpk").exists());
        }
    }

    #[test]
    fn test_checkpoint_layout() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let lora   = LoraConfig::default();
        let model  = small_model(&device).inject_lora(&lora, &device).unwrap();

        let store = AdapterStore::create(dir.path(), true, Precision::Fp16).unwrap();
        let state = TrainerState {
            global_step: 4,
            max_steps:   10,
            epoch:       0.4,
            log_history: vec![LogEntry {
                step: 2, epoch: 0.2, split: Split::Train, loss: 3.1, learning_rate: Some(4e-5),
            }],
        };
        let ckpt = store.save_checkpoint(&model, &lora, &state).unwrap();

        assert_eq!(ckpt, dir.path().join("checkpoint-4"));
        assert!(ckpt.join("adapter_model.mpk.gz").exists());
        assert!(ckpt.join(ADAPTER_CONFIG_FILE).exists());

        let json   = fs::read_to_string(ckpt.join(TRAINER_STATE_FILE)).unwrap();
        let loaded: TrainerState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_training_args_are_written() {
        let dir   = tempfile::tempdir().unwrap();
        let store = AdapterStore::create(dir.path(), true, Precision::Fp16).unwrap();
        store.save_training_args(&TrainingArguments::default()).unwrap();

        let json = fs::read_to_string(dir.path().join(TRAINING_ARGS_FILE)).unwrap();
        let args: TrainingArguments = serde_json::from_str(&json).unwrap();
        assert_eq!(args, TrainingArguments::default());
    }

    #[test]
    fn test_missing_adapters_are_an_error() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let store  = AdapterStore::open(dir.path(), Precision::Fp32);
        assert!(store.load_adapters(small_model(&device), &device).is_err());
    }
}
