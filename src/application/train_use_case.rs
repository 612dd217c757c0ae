// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full fine-tuning pipeline in order:
//
//   Step 1: Load JSON-lines records     (Layer 4 - data)
//   Step 2: Format prompts              (Layer 4 - data)
//   Step 3: Load tokenizer              (Layer 6 - infra)
//   Step 4: Tokenize examples           (Layer 4 - data)
//   Step 5: Train / validation split    (Layer 4 - data)
//   Step 6: Prepare output directory    (Layer 6 - infra)
//   Step 7: Load + freeze base model    (Layer 6 - infra)
//   Step 8: Inject LoRA adapters        (Layer 5 - ml)
//   Step 9: Run training loop           (Layer 5 - ml)

use anyhow::Result;
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    module::Module,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    dataset::SftDataset,
    formatter::format_example,
    loader::JsonlLoader,
    splitter::split_train_val,
    tokenize::{tokenize_example, TokenizeLimits},
};
use crate::domain::{record::TokenizedExample, traits::RecordSource};
use crate::infra::{checkpoint::AdapterStore, model_dir::ModelDirectory};
use crate::ml::{lora::LoraConfig, trainer::run_training};

type TrainBackend = Autodiff<Wgpu>;

// ─── Enumerated options ──────────────────────────────────────────────────────

/// Floating-point precision of the saved adapter weights.
/// Forward and backward passes always run in f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
}

/// Where tensors live during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use an accelerator if one is available
    Auto,
    Cpu,
}

impl DevicePreference {
    pub fn wgpu_device(self) -> WgpuDevice {
        match self {
            DevicePreference::Auto => WgpuDevice::default(),
            DevicePreference::Cpu  => WgpuDevice::Cpu,
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Static hyperparameters handed to the training loop as-is.
// Saved to `training_args.json` in the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArguments {
    pub output_dir:                  PathBuf,
    pub overwrite_output_dir:        bool,
    pub num_train_epochs:            usize,
    pub per_device_train_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub precision:                   Precision,
    /// Optimizer steps between checkpoints (0 disables)
    pub save_steps:                  usize,
    /// Optimizer steps between loss reports (0 disables)
    pub logging_steps:               usize,
    pub learning_rate:               f64,
    pub weight_decay:                f64,
    /// Gradient norm clip (0 disables)
    pub max_grad_norm:               f64,
    pub seed:                        u64,
    pub device:                      DevicePreference,
    /// Fraction of records held out for evaluation (0 disables)
    pub validation_split:            f64,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir:                  PathBuf::from("./finetuned-model"),
            overwrite_output_dir:        true,
            num_train_epochs:            3,
            per_device_train_batch_size: 1,
            gradient_accumulation_steps: 8,
            precision:                   Precision::Fp16,
            save_steps:                  100,
            logging_steps:               50,
            learning_rate:               5e-5,
            weight_decay:                0.0,
            max_grad_norm:               1.0,
            seed:                        42,
            device:                      DevicePreference::Auto,
            validation_split:            0.0,
        }
    }
}

impl TrainingArguments {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.num_train_epochs > 0, "num_train_epochs must be at least 1");
        anyhow::ensure!(self.per_device_train_batch_size > 0, "batch size must be at least 1");
        anyhow::ensure!(self.gradient_accumulation_steps > 0, "gradient_accumulation_steps must be at least 1");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.validation_split),
            "validation_split must be in [0, 1), got {}", self.validation_split
        );
        Ok(())
    }
}

/// Everything the `train` command needs
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub data_path: PathBuf,
    pub model_dir: PathBuf,
    pub limits:    TokenizeLimits,
    pub args:      TrainingArguments,
    pub lora:      LoraConfig,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg    = &self.config;
        let device = cfg.args.device.wgpu_device();
        tracing::info!("Using WGPU device: {:?}", device);
        self.execute_on::<TrainBackend>(&device)
    }

    /// Backend-generic body of `execute`, so the pipeline can run on
    /// any autodiff backend.
    pub fn execute_on<B: burn::tensor::backend::AutodiffBackend>(
        &self,
        device: &B::Device,
    ) -> Result<()> {
        let cfg = &self.config;
        cfg.args.validate()?;
        cfg.lora.validate()?;

        // ── Step 1-4: records → tokenized examples ────────────────────────────
        let model_dir = ModelDirectory::new(&cfg.model_dir);
        let tokenizer = model_dir.load_tokenizer()?;
        let examples  = prepare_examples(&JsonlLoader::new(&cfg.data_path), &tokenizer, cfg.limits)?;
        anyhow::ensure!(
            !examples.is_empty(),
            "No training records in '{}'",
            cfg.data_path.display()
        );

        // ── Step 5: optional held-out split ───────────────────────────────────
        let (train_examples, val_examples) =
            split_train_val(examples, cfg.args.validation_split, cfg.args.seed);
        tracing::info!(
            "Split: {} train, {} validation",
            train_examples.len(),
            val_examples.len()
        );
        let train_dataset = SftDataset::new(train_examples);
        let val_dataset   = (!val_examples.is_empty()).then(|| SftDataset::new(val_examples));

        // ── Step 6: output directory ──────────────────────────────────────────
        let store = AdapterStore::create(
            &cfg.args.output_dir,
            cfg.args.overwrite_output_dir,
            cfg.args.precision,
        )?;
        store.save_training_args(&cfg.args)?;

        // ── Step 7-8: frozen base + adapters ──────────────────────────────────
        let model_cfg = model_dir.load_config()?;
        let base      = model_dir.load_model::<B>(&model_cfg, device)?;

        let mut lora = cfg.lora.clone();
        if lora.base_model_name_or_path.is_none() {
            lora.base_model_name_or_path = Some(cfg.model_dir.display().to_string());
        }
        let model = base.inject_lora(&lora, device)?;

        let total     = model.num_params();
        let trainable = model.trainable_params(&lora);
        tracing::info!(
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            trainable,
            total,
            100.0 * trainable as f64 / total.max(1) as f64
        );

        // ── Step 9: training loop (Layer 5) ───────────────────────────────────
        let summary = run_training(
            &cfg.args,
            &lora,
            &model_cfg,
            model,
            train_dataset,
            val_dataset,
            &store,
            device,
        )?;
        tracing::info!(
            "Finished after {} steps, mean train loss {:.4}",
            summary.global_step,
            summary.mean_train_loss
        );

        Ok(())
    }
}

/// Load → format → tokenize, shared with the `prepare` command.
pub fn prepare_examples<S, E>(
    source:  &S,
    encoder: &E,
    limits:  TokenizeLimits,
) -> Result<Vec<TokenizedExample>>
where
    S: RecordSource + ?Sized,
    E: crate::domain::traits::TextEncoder + ?Sized,
{
    let records = source.load_all()?;

    let examples = records
        .iter()
        .map(format_example)
        .map(|formatted| tokenize_example(encoder, &formatted, limits))
        .collect::<Result<Vec<_>>>()?;

    let truncated = examples
        .iter()
        .filter(|e| e.input_ids.len() == limits.max_prompt_tokens
                 || e.labels.len()    == limits.max_target_tokens)
        .count();
    tracing::info!(
        "Tokenized {} examples ({} at a truncation limit)",
        examples.len(),
        truncated
    );

    Ok(examples)
}
