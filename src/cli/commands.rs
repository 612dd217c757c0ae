// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `prepare` and
// `init-base`, and all their configurable flags.
//
// Defaults of `train` reproduce a standard LoRA instruction
// tuning run (r=8, alpha=32, q_proj/v_proj, 3 epochs, batch 1
// with 8 accumulation steps, fp16 adapters).
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};
use std::path::PathBuf;

use crate::application::{
    init_base_use_case::InitBaseConfig,
    prepare_use_case::PrepareConfig,
    train_use_case::{DevicePreference, Precision, TrainConfig, TrainingArguments},
};
use crate::data::tokenize::{TokenizeLimits, DEFAULT_MAX_PROMPT_TOKENS, DEFAULT_MAX_TARGET_TOKENS};
use crate::ml::lora::{LoraBias, LoraConfig, PeftType, TaskType};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune LoRA adapters on an instruction dataset
    Train(TrainArgs),

    /// Format and tokenize a dataset, writing the token IDs as JSON lines
    Prepare(PrepareArgs),

    /// Create a small randomly initialised base model from a dataset
    InitBase(InitBaseArgs),
}

/// Dataset and tokenizer flags shared by `train` and `prepare`
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// JSON-lines file with instruction / input / output records
    #[arg(long, default_value = "data.jsonl")]
    pub data: PathBuf,

    /// Base model directory (config.json, model.mpk.gz, tokenizer.json)
    #[arg(long, default_value = "base-model")]
    pub model_dir: PathBuf,

    /// Prompt tokens kept per example
    #[arg(long, default_value_t = DEFAULT_MAX_PROMPT_TOKENS)]
    pub max_prompt_tokens: usize,

    /// Target tokens kept per example
    #[arg(long, default_value_t = DEFAULT_MAX_TARGET_TOKENS)]
    pub max_target_tokens: usize,
}

impl DataArgs {
    fn limits(&self) -> TokenizeLimits {
        TokenizeLimits {
            max_prompt_tokens: self.max_prompt_tokens,
            max_target_tokens: self.max_target_tokens,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Where adapters, configs and checkpoints are written
    #[arg(long, default_value = "./finetuned-model")]
    pub output_dir: PathBuf,

    /// Clear the output directory first (otherwise a non-empty one is an error)
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub overwrite_output_dir: bool,

    #[arg(long, default_value_t = 3)]
    pub num_train_epochs: usize,

    #[arg(long, default_value_t = 1)]
    pub per_device_train_batch_size: usize,

    /// Micro-batches per optimizer step
    #[arg(long, default_value_t = 8)]
    pub gradient_accumulation_steps: usize,

    /// Precision of the saved adapter weights only; training compute stays f32
    #[arg(long, value_enum, default_value_t = Precision::Fp16)]
    pub precision: Precision,

    /// Optimizer steps between checkpoints (0 disables)
    #[arg(long, default_value_t = 100)]
    pub save_steps: usize,

    /// Optimizer steps between loss reports (0 disables)
    #[arg(long, default_value_t = 50)]
    pub logging_steps: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    /// Gradient norm clip (0 disables)
    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = DevicePreference::Auto)]
    pub device: DevicePreference,

    /// Fraction of records held out for evaluation
    #[arg(long, default_value_t = 0.0)]
    pub validation_split: f64,

    /// Rank of the low-rank update
    #[arg(long, default_value_t = 8)]
    pub lora_r: usize,

    /// Scaling numerator; updates are scaled by alpha / r
    #[arg(long, default_value_t = 32.0)]
    pub lora_alpha: f64,

    /// Projection names to adapt, comma separated
    #[arg(long, value_delimiter = ',', default_value = "q_proj,v_proj")]
    pub lora_target_modules: Vec<String>,

    #[arg(long, default_value_t = 0.05)]
    pub lora_dropout: f64,

    #[arg(long, value_enum, default_value_t = LoraBias::None)]
    pub lora_bias: LoraBias,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            limits:    a.data.limits(),
            data_path: a.data.data,
            model_dir: a.data.model_dir,
            args: TrainingArguments {
                output_dir:                  a.output_dir,
                overwrite_output_dir:        a.overwrite_output_dir,
                num_train_epochs:            a.num_train_epochs,
                per_device_train_batch_size: a.per_device_train_batch_size,
                gradient_accumulation_steps: a.gradient_accumulation_steps,
                precision:                   a.precision,
                save_steps:                  a.save_steps,
                logging_steps:               a.logging_steps,
                learning_rate:               a.learning_rate,
                weight_decay:                a.weight_decay,
                max_grad_norm:               a.max_grad_norm,
                seed:                        a.seed,
                device:                      a.device,
                validation_split:            a.validation_split,
            },
            lora: LoraConfig {
                peft_type:      PeftType::Lora,
                task_type:      TaskType::CausalLm,
                r:              a.lora_r,
                lora_alpha:     a.lora_alpha,
                target_modules: a.lora_target_modules,
                lora_dropout:   a.lora_dropout,
                bias:           a.lora_bias,
                base_model_name_or_path: None,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Output JSON-lines file of {input_ids, labels}
    #[arg(long, default_value = "tokenized.jsonl")]
    pub output: PathBuf,
}

impl From<PrepareArgs> for PrepareConfig {
    fn from(a: PrepareArgs) -> Self {
        PrepareConfig {
            limits:      a.data.limits(),
            data_path:   a.data.data,
            model_dir:   a.data.model_dir,
            output_path: a.output,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitBaseArgs {
    /// JSON-lines dataset the vocabulary is built from
    #[arg(long, default_value = "data.jsonl")]
    pub data: PathBuf,

    /// Directory to create
    #[arg(long, default_value = "base-model")]
    pub model_dir: PathBuf,

    /// Maximum vocabulary size, special tokens included
    #[arg(long, default_value_t = 8000)]
    pub vocab_size: usize,

    /// Longest sequence the model accepts
    #[arg(long, default_value_t = 1024)]
    pub max_position_embeddings: usize,

    #[arg(long, default_value_t = 128)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 512)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<InitBaseArgs> for InitBaseConfig {
    fn from(a: InitBaseArgs) -> Self {
        InitBaseConfig {
            data_path:               a.data,
            model_dir:               a.model_dir,
            vocab_size:              a.vocab_size,
            max_position_embeddings: a.max_position_embeddings,
            d_model:                 a.d_model,
            num_heads:               a.num_heads,
            num_layers:              a.num_layers,
            d_ff:                    a.d_ff,
            seed:                    a.seed,
        }
    }
}
