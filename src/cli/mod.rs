// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`     — fine-tunes LoRA adapters on a JSON-lines dataset
//   2. `prepare`   — writes the tokenized dataset for inspection
//   3. `init-base` — creates a small base model directory
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InitBaseArgs, PrepareArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "lora-instruct",
    version,
    about = "Instruction-tune a causal language model with LoRA adapters."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Prepare(args)  => run_prepare(args),
            Commands::InitBase(args) => run_init_base(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on records in: {}", args.data.data.display());

    let output_dir = args.output_dir.clone();
    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Adapters saved to '{}'.", output_dir.display());
    Ok(())
}

fn run_prepare(args: PrepareArgs) -> Result<()> {
    use crate::application::prepare_use_case::PrepareUseCase;

    let output = args.output.clone();
    let count  = PrepareUseCase::new(args.into()).execute()?;

    println!("Wrote {} examples to '{}'.", count, output.display());
    Ok(())
}

fn run_init_base(args: InitBaseArgs) -> Result<()> {
    use crate::application::init_base_use_case::InitBaseUseCase;

    let model_dir = args.model_dir.clone();
    let cfg       = InitBaseUseCase::new(args.into()).execute()?;

    println!(
        "Base model (vocab {}, {} layers) written to '{}'.",
        cfg.vocab_size, cfg.num_layers, model_dir.display()
    );
    Ok(())
}
