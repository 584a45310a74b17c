//! CLI Entry Point for wildlife-console
//!
//! Provides command-line access to the console core:
//! - `run` keeps the full reconciliation loop going headless, logging state changes
//! - `status` prints the backend mode and latest sensor reading once
//! - `toggle` switches between STREAM and MOTION and waits for settlement
//! - `capture` fires a still capture
//!
//! # Usage
//!
//! ```bash
//! wildlife-console --config config/console.toml run
//! WILDLIFE_CONSOLE_ENDPOINTS__API_BASE=pi5.local:5001 wildlife-console status
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use wildlife_console::capture::CaptureOutcome;
use wildlife_console::config::DEFAULT_CONFIG_PATH;
use wildlife_console::headless::{log_state, HeadlessSink};
use wildlife_console::lifecycle::{PollOutcome, Shutdown};
use wildlife_console::transition::ToggleOutcome;
use wildlife_console::{logging, Console, ConsoleConfig};

#[derive(Parser)]
#[command(name = "wildlife-console")]
#[command(about = "Wildlife camera console: mode toggling, stream acquisition, telemetry", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the console until Ctrl+C
    Run,

    /// Fetch mode and sensors once
    Status,

    /// Toggle between stream and motion mode
    Toggle,

    /// Trigger a still capture
    Capture,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConsoleConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let console = Console::with_http_backend(config, Arc::new(HeadlessSink::new()), None)?;

    let result = match cli.command {
        Commands::Run => run(&console).await,
        Commands::Status => status(&console).await,
        Commands::Toggle => toggle(&console).await,
        Commands::Capture => capture(&console).await,
    };

    console.shutdown().await;
    result
}

async fn run(console: &Console) -> Result<()> {
    println!("📡 Console running against {}", console.endpoints().api_base());
    println!("   Press Ctrl+C to stop");

    let logger_stop = Shutdown::new();
    let logger = tokio::spawn(log_state(console.subscribe(), logger_stop.teardown()));
    console.start();

    tokio::signal::ctrl_c().await?;
    println!("\n👋 Shutting down...");

    logger_stop.trigger();
    logger.await?;
    Ok(())
}

async fn status(console: &Console) -> Result<()> {
    let mode = console.sync_mode().await;
    let sensors = console.sync_sensors().await;
    let state = console.state();

    if mode == PollOutcome::Applied {
        println!("Mode:     {} ({})", state.mode, state.mode.label());
    } else {
        println!("Mode:     backend unreachable");
    }

    match (&state.sensor, sensors) {
        (Some(reading), PollOutcome::Applied) => {
            let kpa = state.history.latest().map_or(0.0, |p| p.pressure_kpa);
            println!("Temp:     {:.2} °C", reading.temperature);
            println!("Humidity: {:.2} %", reading.humidity);
            println!("Pressure: {kpa:.2} kPa");
            println!("Updated:  {}", reading.updated_at);
        }
        _ => println!("Sensors:  {}", state.error.map_or("unavailable", |e| e.message())),
    }
    Ok(())
}

async fn toggle(console: &Console) -> Result<()> {
    console.sync_mode().await;
    let from = console.state().mode;

    match console.toggle_mode().await {
        ToggleOutcome::Settled {
            mode,
            polls,
            acquisition,
        } => {
            println!("✅ {from} → {mode} (settled after {polls} polls)");
            if let Some(acquisition) = acquisition {
                match acquisition.await? {
                    Ok(outcome) if outcome.is_attached() => println!("   Stream available"),
                    Ok(_) => println!("   Stream acquisition superseded"),
                    Err(e) => println!("   {e}"),
                }
            }
            Ok(())
        }
        ToggleOutcome::Busy => bail!("another toggle is in flight"),
        ToggleOutcome::Cancelled => bail!("toggle cancelled"),
        ToggleOutcome::RequestFailed | ToggleOutcome::DidNotSettle { .. } => {
            let notice = console.state().error.map_or("toggle failed", |e| e.message());
            bail!("{notice}")
        }
    }
}

async fn capture(console: &Console) -> Result<()> {
    match console.trigger_capture().await {
        CaptureOutcome::Scheduled(refresh) => {
            println!("📸 Capture triggered, waiting for image...");
            refresh.await?;
            if let Some(image) = console.state().image {
                println!("   {}", image.url);
            }
            Ok(())
        }
        CaptureOutcome::Failed => bail!("Failed to capture image"),
    }
}
