//! Main entrypoint for the voice assistant.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Initializing logging.
//! 3. Building the tool registry and the shared session context.
//! 4. Running the reconnect supervisor until Ctrl+C or a fatal error.

use anyhow::Context;
use assistant::audio::list_devices;
use assistant::config::Config;
use assistant::context::{SessionContext, SessionSettings};
use assistant::observer::EnergyMeter;
use assistant::runtime_log::RuntimeLog;
use assistant::supervisor::{ReconnectPolicy, ReconnectSupervisor, SystemAudio};
use assistant_core::ToolRegistry;
use assistant_core::tools::{ScratchPad, register_builtin_tools};
use clap::Parser;
use openai_realtime::types::Voice;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Talk to an OpenAI realtime model from the terminal.")]
struct Cli {
    /// Voice of the assistant (overrides REALTIME_VOICE).
    #[arg(long)]
    voice: Option<Voice>,
    /// Realtime model (overrides REALTIME_MODEL).
    #[arg(long)]
    model: Option<String>,
    /// System instructions (overrides SESSION_INSTRUCTIONS).
    #[arg(long)]
    instructions: Option<String>,
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

/// Listens for the `Ctrl+C` signal to shut the assistant down.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn print_devices() -> anyhow::Result<()> {
    for device in list_devices().context("Failed to list audio devices")? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{:<6} {}{}", device.kind, device.name, marker);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_devices {
        return print_devices();
    }

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(model) = cli.model {
        config.realtime_model = model;
    }
    if let Some(instructions) = cli.instructions {
        config.instructions = instructions;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_str()))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing assistant...");

    // --- 3. Tools and Shared Context ---
    tokio::fs::create_dir_all(&config.scratch_pad_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch pad directory {}",
                config.scratch_pad_dir.display()
            )
        })?;
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, ScratchPad::new(&config.scratch_pad_dir));
    info!(tools = ?registry.names().collect::<Vec<_>>(), "Tools registered.");

    let context = Arc::new(SessionContext::new(
        SessionSettings::from_config(&config),
        Arc::new(registry),
        Arc::new(EnergyMeter::new()),
        RuntimeLog::new(config.runtime_log_path.clone()),
    ));

    // --- 4. Run ---
    info!(
        model = %config.realtime_model,
        voice = %config.voice,
        url = %config.realtime_url,
        "Starting voice session..."
    );
    let supervisor = ReconnectSupervisor::new(
        Arc::new(config.client_config()),
        Arc::new(SystemAudio::new(config.capture_queue_secs)),
        context,
        ReconnectPolicy {
            delay: config.reconnect_delay,
            max_attempts: None,
        },
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    supervisor
        .run(shutdown)
        .await
        .context("Voice session ended with an error")?;
    info!("Assistant has shut down.");
    Ok(())
}
