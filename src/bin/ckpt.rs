use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ocr_checkpoint::checkpoint::{CheckpointManager, CheckpointPrefix, TrainingStates};
use ocr_checkpoint::config::TrainConfig;
use ocr_checkpoint::state::{io as state_io, StateValue};

/// Inspect OCR training checkpoints and resume plans.
#[derive(Parser)]
#[command(name = "ckpt", about = "Inspect OCR training checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List what a checkpoint prefix holds
    Inspect {
        /// Checkpoint prefix, or the path of its .pdparams file
        prefix: PathBuf,
    },
    /// Show which source training would resume from
    Plan {
        /// Path to TOML configuration file
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { prefix } => inspect(CheckpointPrefix::new(prefix)),
        Commands::Plan { config } => {
            let train_config = TrainConfig::load_or_default(&config)
                .with_context(|| format!("loading config from {}", config.display()))?;
            let manager = CheckpointManager::new(train_config).context("invalid config")?;
            println!("{}", manager.plan());
            Ok(())
        }
        Commands::DefaultConfig => {
            print!("{}", TrainConfig::default_toml());
            Ok(())
        }
    }
}

fn inspect(prefix: CheckpointPrefix) -> Result<()> {
    let params_path = prefix.params();
    let params = state_io::load_params(&params_path)
        .with_context(|| format!("reading {}", params_path.display()))?;
    println!("{} ({} params)", params_path.display(), params.len());
    for (name, value) in params.iter() {
        println!("  {name:<48} {:?} {:?}", value.dtype, value.shape);
    }

    let optimizer_path = prefix.optimizer();
    if optimizer_path.exists() {
        let optimizer = state_io::load_optimizer(&optimizer_path)
            .with_context(|| format!("reading {}", optimizer_path.display()))?;
        let tensors = optimizer
            .iter()
            .filter(|(_, v)| matches!(v, StateValue::Tensor(_)))
            .count();
        println!(
            "{} ({} entries, {} tensors)",
            optimizer_path.display(),
            optimizer.len(),
            tensors
        );
    } else {
        println!("{} missing", optimizer_path.display());
    }

    let states_path = prefix.states();
    if states_path.exists() {
        let states = TrainingStates::load(&states_path)
            .with_context(|| format!("reading {}", states_path.display()))?;
        println!("{}", states_path.display());
        println!("{}", serde_json::to_string_pretty(&states)?);
    } else {
        println!("{} missing", states_path.display());
    }
    Ok(())
}
