//! CLI binary for colloquy.

use clap::{Parser, Subcommand};
use colloquy::audio::capture::CpalCapture;
use colloquy::audio::playback::CpalPlayback;
use colloquy::{DialogCoordinator, SessionEnd, SpeechConfig};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Colloquy: a wake-word driven spoken conversation with an LLM.
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation.
    Chat,

    /// List available audio devices.
    Devices,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("colloquy=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SpeechConfig::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let config = load_config(cli.config.as_ref(), &config_path)?;
            run_chat(config).await
        }
        Command::Devices => list_devices(),
        Command::InitConfig { force } => init_config(&config_path, force),
    }
}

/// An explicit `--config` must exist; the default path is optional.
fn load_config(explicit: Option<&PathBuf>, path: &Path) -> anyhow::Result<SpeechConfig> {
    if explicit.is_some() || path.exists() {
        info!(path = %path.display(), "loading configuration");
        Ok(SpeechConfig::from_file(path)?)
    } else {
        Ok(SpeechConfig::default())
    }
}

async fn run_chat(config: SpeechConfig) -> anyhow::Result<()> {
    println!("Colloquy v{}", env!("CARGO_PKG_VERSION"));

    let providers = colloquy::startup::initialize_providers(&config)?;
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    println!(
        "\nSay \"{}\" to start talking. Press Ctrl+C to quit.\n",
        config.wakeword.wake_word
    );

    let summary = DialogCoordinator::new(config, providers, cancel).run().await?;

    if summary.end == SessionEnd::Farewell {
        println!("\nConversation ended after {} exchange(s).", summary.exchanges);
    }
    if !summary.transcript.is_empty() {
        println!("\n--- Transcript ---\n{}", summary.transcript);
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }
    SpeechConfig::default().save_to_file(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
