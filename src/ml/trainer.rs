// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Supervised fine-tuning loop for a LoRA-injected CausalLm,
// using Burn's DataLoader, GradientsAccumulator and AdamW.
//
// One optimizer step = `gradient_accumulation_steps` micro-batches:
//
//   for each micro-batch:
//       loss  = masked next-token CE / accum
//       grads = loss.backward()              (only LoRA params)
//       accumulator.accumulate(grads)
//   every accum micro-batches (and at epoch end):
//       lr    = lr₀ · (1 − step / total_steps)
//       model = adamw.step(lr, model, accumulator.grads())
//
// Key Burn insight:
//   - Training runs on B (Autodiff<...>) for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - The validation batcher must use B::InnerBackend too
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainingArguments;
use crate::data::{batcher::SftBatcher, dataset::SftDataset};
use crate::infra::{
    checkpoint::{AdapterStore, TrainerState},
    metrics::{LogEntry, MetricsLogger, Split},
};
use crate::ml::{
    lora::LoraConfig,
    model::{CausalLm, CausalLmConfig},
};

/// What a finished run reports back
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub global_step:     usize,
    pub mean_train_loss: f64,
    pub final_eval_loss: Option<f64>,
}

/// Linearly decayed learning rate for the optimizer step about to
/// run (`step` counts completed steps).
pub fn linear_lr(base_lr: f64, step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return base_lr;
    }
    base_lr * (1.0 - step as f64 / total_steps as f64).max(0.0)
}

/// Optimizer steps in one epoch of `num_examples` examples
pub fn steps_per_epoch(num_examples: usize, batch_size: usize, accum: usize) -> usize {
    num_examples.div_ceil(batch_size).div_ceil(accum)
}

#[allow(clippy::too_many_arguments)]
pub fn run_training<B: AutodiffBackend>(
    args:          &TrainingArguments,
    lora:          &LoraConfig,
    model_cfg:     &CausalLmConfig,
    mut model:     CausalLm<B>,
    train_dataset: SftDataset,
    val_dataset:   Option<SftDataset>,
    store:         &AdapterStore,
    device:        &B::Device,
) -> Result<TrainingSummary> {
    anyhow::ensure!(!train_dataset.is_empty(), "Training split is empty");
    B::seed(args.seed);

    let accum          = args.gradient_accumulation_steps;
    let epoch_steps    = steps_per_epoch(train_dataset.len(), args.per_device_train_batch_size, accum);
    let total_steps    = epoch_steps * args.num_train_epochs;
    let pad_token_id   = model_cfg.pad_token_id;

    let unsupervised = train_dataset.unsupervised_count();
    if unsupervised > 0 {
        tracing::warn!("{} training examples have no label tokens and add no loss", unsupervised);
    }
    tracing::info!(
        "Training: {} examples, {} epochs, {} optimizer steps ({} per epoch)",
        train_dataset.len(), args.num_train_epochs, total_steps, epoch_steps
    );

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    // Frozen base parameters never receive gradients, so only the
    // adapter tensors (and trained biases) are updated.
    let grad_clipping = (args.max_grad_norm > 0.0)
        .then(|| GradientClippingConfig::Norm(args.max_grad_norm as f32));
    let mut optim = AdamWConfig::new()
        .with_weight_decay(args.weight_decay as f32)
        .with_grad_clipping(grad_clipping)
        .init();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_batcher = SftBatcher::<B>::new(
        device.clone(), pad_token_id, model_cfg.max_position_embeddings,
    );
    let train_loader = DataLoaderBuilder::new(train_batcher)
        .batch_size(args.per_device_train_batch_size)
        .shuffle(args.seed)
        .num_workers(1)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend — no autodiff overhead) ──────────
    let val_loader = val_dataset.map(|ds| {
        let batcher = SftBatcher::<B::InnerBackend>::new(
            device.clone(), pad_token_id, model_cfg.max_position_embeddings,
        );
        DataLoaderBuilder::new(batcher)
            .batch_size(args.per_device_train_batch_size)
            .num_workers(1)
            .build(ds)
    });

    let metrics = MetricsLogger::new(store.dir())?;
    let mut log_history: Vec<LogEntry> = Vec::new();

    let mut accumulator = GradientsAccumulator::<CausalLm<B>>::new();
    let mut pending     = 0usize;
    let mut global_step = 0usize;

    let mut window_loss_sum  = 0.0f64;
    let mut window_batches   = 0usize;
    let mut total_loss_sum   = 0.0f64;
    let mut total_batches    = 0usize;
    let mut final_eval_loss  = None;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=args.num_train_epochs {
        let mut epoch_loss_sum = 0.0f64;
        let mut epoch_batches  = 0usize;

        let mut batches = train_loader.iter().peekable();
        while let Some(batch) = batches.next() {
            let loss = model.forward_loss(batch.inputs, batch.targets, pad_token_id);

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            window_loss_sum += loss_val;
            window_batches  += 1;
            epoch_loss_sum  += loss_val;
            epoch_batches   += 1;

            let grads = loss.div_scalar(accum as f64).backward();
            let grads = GradientsParams::from_grads(grads, &model);
            accumulator.accumulate(&model, grads);
            pending += 1;

            let epoch_end = batches.peek().is_none();
            if pending < accum && !epoch_end {
                continue;
            }

            // ── Optimizer step ────────────────────────────────────────────────
            let lr = linear_lr(args.learning_rate, global_step, total_steps);
            model = optim.step(lr, model, accumulator.grads());
            pending      = 0;
            global_step += 1;

            let epoch_progress = global_step as f64 / epoch_steps as f64;

            if args.logging_steps > 0 && global_step % args.logging_steps == 0 {
                let entry = LogEntry {
                    step:          global_step,
                    epoch:         epoch_progress,
                    split:         Split::Train,
                    loss:          window_loss_sum / window_batches.max(1) as f64,
                    learning_rate: Some(lr),
                };
                tracing::info!(
                    "step {:>6}/{} | epoch {:.2} | loss={:.4} | lr={:.3e}",
                    entry.step, total_steps, entry.epoch, entry.loss, lr
                );
                metrics.log(&entry)?;
                log_history.push(entry);

                total_loss_sum += window_loss_sum;
                total_batches  += window_batches;
                window_loss_sum = 0.0;
                window_batches  = 0;
            }

            if args.save_steps > 0 && global_step % args.save_steps == 0 {
                let state = TrainerState {
                    global_step,
                    max_steps: total_steps,
                    epoch:     epoch_progress,
                    log_history: log_history.clone(),
                };
                let dir = store.save_checkpoint(&model, lora, &state)?;
                tracing::info!("Checkpoint saved to '{}'", dir.display());
            }
        }

        let avg_train_loss = if epoch_batches > 0 {
            epoch_loss_sum / epoch_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        // model.valid() → CausalLm<B::InnerBackend>, dropout disabled
        let avg_val_loss = match &val_loader {
            Some(loader) => {
                let model_valid = model.valid();
                let mut val_loss_sum = 0.0f64;
                let mut val_batches  = 0usize;

                for batch in loader.iter() {
                    let loss = model_valid.forward_loss(batch.inputs, batch.targets, pad_token_id);
                    val_loss_sum += loss.into_scalar().elem::<f64>();
                    val_batches  += 1;
                }

                let avg = if val_batches > 0 { val_loss_sum / val_batches as f64 } else { f64::NAN };
                let entry = LogEntry {
                    step:          global_step,
                    epoch:         epoch as f64,
                    split:         Split::Eval,
                    loss:          avg,
                    learning_rate: None,
                };
                metrics.log(&entry)?;
                log_history.push(entry);
                final_eval_loss = Some(avg);
                Some(avg)
            }
            None => None,
        };

        match avg_val_loss {
            Some(val) => println!(
                "Epoch {:>3}/{} | step={} | train_loss={:.4} | val_loss={:.4}",
                epoch, args.num_train_epochs, global_step, avg_train_loss, val,
            ),
            None => println!(
                "Epoch {:>3}/{} | step={} | train_loss={:.4}",
                epoch, args.num_train_epochs, global_step, avg_train_loss,
            ),
        }
    }

    total_loss_sum += window_loss_sum;
    total_batches  += window_batches;

    store.save_final(&model, lora)?;
    tracing::info!("Training complete! {} optimizer steps", global_step);

    Ok(TrainingSummary {
        global_step,
        mean_train_loss: total_loss_sum / total_batches.max(1) as f64,
        final_eval_loss,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::Precision;
    use crate::domain::record::TokenizedExample;
    use crate::infra::metrics::LOG_HISTORY_FILE;
    use burn::backend::{Autodiff, NdArray};

    type AB = Autodiff<NdArray>;

    fn small_config() -> CausalLmConfig {
        CausalLmConfig::new(16)
            .with_max_position_embeddings(12)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16)
    }

    fn examples(n: usize) -> Vec<TokenizedExample> {
        (0..n)
            .map(|i| TokenizedExample {
                input_ids: vec![4, 5, 6 + (i % 3) as u32],
                labels:    vec![10 + (i % 4) as u32, 3],
            })
            .collect()
    }

    #[test]
    fn test_linear_lr_decays_to_zero() {
        assert_eq!(linear_lr(1.0, 0, 4), 1.0);
        assert_eq!(linear_lr(1.0, 2, 4), 0.5);
        assert_eq!(linear_lr(1.0, 4, 4), 0.0);
        assert_eq!(linear_lr(1.0, 9, 4), 0.0);
        assert_eq!(linear_lr(0.3, 0, 0), 0.3);
    }

    #[test]
    fn test_steps_per_epoch_rounds_up() {
        assert_eq!(steps_per_epoch(10, 1, 8), 2);
        assert_eq!(steps_per_epoch(16, 2, 8), 1);
        assert_eq!(steps_per_epoch(17, 2, 4), 3);
        assert_eq!(steps_per_epoch(1, 4, 1), 1);
    }

    #[test]
    fn test_short_run_writes_artifacts_and_checkpoints() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg    = small_config();
        let lora   = LoraConfig { r: 2, ..Default::default() };
        let model  = cfg.init::<AB>(&device).inject_lora(&lora, &device).unwrap();

        let args = TrainingArguments {
            output_dir:                  dir.path().to_path_buf(),
            num_train_epochs:            2,
            per_device_train_batch_size: 2,
            gradient_accumulation_steps: 2,
            precision:                   Precision::Fp32,
            save_steps:                  2,
            logging_steps:               1,
            learning_rate:               1e-2,
            ..Default::default()
        };
        let store = AdapterStore::create(dir.path(), true, args.precision).unwrap();

        // 6 examples → 3 micro-batches → 2 optimizer steps per epoch
        let summary = run_training(
            &args, &lora, &cfg, model,
            SftDataset::new(examples(6)),
            Some(SftDataset::new(examples(2))),
            &store, &device,
        ).unwrap();

        assert_eq!(summary.global_step, 4);
        assert!(summary.mean_train_loss.is_finite());
        assert!(summary.final_eval_loss.is_some_and(f64::is_finite));

        assert!(dir.path().join("adapter_model.mpk.gz").exists());
        assert!(dir.path().join("adapter_config.json").exists());
        assert!(dir.path().join("checkpoint-2").join("trainer_state.json").exists());
        assert!(dir.path().join("checkpoint-4").join("adapter_model.mpk.gz").exists());
        assert!(!dir.path().join("checkpoint-3").exists());

        let csv = std::fs::read_to_string(dir.path().join(LOG_HISTORY_FILE)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        // header + 4 train rows + 2 eval rows
        assert_eq!(lines.len(), 7);
        assert_eq!(lines.iter().filter(|l| l.contains(",eval,")).count(), 2);
    }

    #[test]
    fn test_training_updates_adapter_weights() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg    = small_config();
        let lora   = LoraConfig { r: 2, lora_dropout: 0.0, ..Default::default() };
        let model  = cfg.init::<AB>(&device).inject_lora(&lora, &device).unwrap();

        let args = TrainingArguments {
            output_dir:                  dir.path().to_path_buf(),
            num_train_epochs:            1,
            gradient_accumulation_steps: 1,
            save_steps:                  0,
            logging_steps:               0,
            learning_rate:               1e-2,
            precision:                   Precision::Fp32,
            ..Default::default()
        };
        let store = AdapterStore::create(dir.path(), true, args.precision).unwrap();

        let template = cfg.init::<AB>(&device);
        run_training(&args, &lora, &cfg, model, SftDataset::new(examples(3)), None, &store, &device)
            .unwrap();

        // B starts at zero; after one epoch the saved B must not be.
        let (restored, _) = store.load_adapters(template, &device).unwrap();
        let b = restored.layers[0].self_attn.q_proj.adapter.as_ref().unwrap().lora_b.val();
        let b_abs_sum: f32 = b.abs().sum().into_scalar().elem();
        assert!(b_abs_sum > 0.0);
    }

    #[test]
    fn test_empty_training_split_is_an_error() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg    = small_config();
        let lora   = LoraConfig::default();
        let model  = cfg.init::<AB>(&device).inject_lora(&lora, &device).unwrap();
        let args   = TrainingArguments { output_dir: dir.path().to_path_buf(), ..Default::default() };
        let store  = AdapterStore::create(dir.path(), true, args.precision).unwrap();

        let result = run_training(&args, &lora, &cfg, model, SftDataset::new(vec![]), None, &store, &device);
        assert!(result.is_err());
    }
}
