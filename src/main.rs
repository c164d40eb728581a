//! Headless entry point for the ramanscope control core.
//!
//! Wires the configured drivers into both hubs and exercises the query
//! surface for a bounded duration. The GUI talks to the same facades;
//! this binary is the development and smoke-test path.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ramanscope::config::HubConfig;
use ramanscope::core::now_us;
use ramanscope::hardware;
use ramanscope::hub::{CorrectionKind, RamanHub, StageCameraHub};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "ramanscope", about = "Raman microscope control core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/ramanscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start both hubs against the configured drivers and poll them
    /// until the duration elapses.
    Run {
        /// How long to run, in seconds.
        #[arg(long, default_value_t = 5)]
        duration: u64,
    },
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.application.log_level)),
        )
        .init();

    match cli.command {
        Command::Run { duration } => run(&config, Duration::from_secs(duration)).await,
        Command::CheckConfig => {
            info!("configuration is valid");
            Ok(())
        }
    }
}

async fn run(config: &HubConfig, duration: Duration) -> Result<()> {
    info!(app = %config.application.name, "starting hubs");

    let stage = hardware::stage_from_config(&config.hardware);
    let camera = hardware::camera_from_config(&config.hardware);
    let spectrometer = hardware::spectrometer_from_config(&config.hardware);

    let stage_hub = StageCameraHub::spawn(config, stage, camera.clone(), camera);
    let raman_hub = RamanHub::spawn(config, spectrometer.clone(), spectrometer);

    let started = tokio::time::Instant::now();
    let mut last_query_us = now_us();
    while started.elapsed() < duration {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let coords = stage_hub.get_coordinates_closest(last_query_us).await?;
        let spectra = raman_hub.get_measurement(last_query_us, None, true).await?;
        let frame = stage_hub.get_image(CorrectionKind::Raw).await?;
        last_query_us = now_us();

        info!(
            x = coords.payload.x,
            y = coords.payload.y,
            z = coords.payload.z,
            spectra = spectra.len(),
            frame_px = frame.data.len(),
            "hub poll"
        );
    }

    info!("shutting down");
    stage_hub.shutdown().await;
    raman_hub.shutdown().await;
    Ok(())
}
