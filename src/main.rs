//! fbg-ingest: x55 interrogator command-line client
//!
//! # Usage
//!
//! ```bash
//! # Show instrument status
//! fbg-ingest status
//!
//! # Record the steel frame for ten minutes
//! fbg-ingest record --setup frame --duration 600
//!
//! # Apply a calibration document to the basement tables
//! fbg-ingest upload calibration.xml --setup basement
//! ```
//!
//! # Environment Variables
//!
//! - `FBG_CONFIG`: Path to the TOML config file (default: ./fbg_config.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use fbg_ingest::acquisition::{ClientSettings, InstrumentClient};
use fbg_ingest::config::AppConfig;
use fbg_ingest::storage::{InMemoryStore, ProcessLock, SensorStore, SledStore, StatusPublisher};
use fbg_ingest::types::{InstrumentStatus, SetupOption};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fbg-ingest")]
#[command(about = "x55 FBG interrogator client: peak streaming and time-series ingestion")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides FBG_CONFIG and ./fbg_config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Instrument address (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Query and print the instrument status
    Status,

    /// Stream peaks and persist one row per structural group and frame
    Record {
        /// Sensor setup: 0-3 or basement_and_frame, strong_floor, basement, frame
        #[arg(long)]
        setup: Option<SetupOption>,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(long, value_name = "SECONDS")]
        duration: Option<u64>,
    },

    /// Apply a calibration XML document to the metadata tables
    Upload {
        file: PathBuf,

        #[arg(long)]
        setup: Option<SetupOption>,
    },

    /// Set the laser scan speed (Hz)
    SetScanSpeed { speed: u32 },

    /// Set the peak data streaming divider
    SetDivider { divider: u32 },

    /// Point the instrument clock at a new NTP server
    SetNtpServer { server: Ipv4Addr },

    /// Load a setup and list its sensors
    Setup { setup: Option<SetupOption> },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };
    if let Some(host) = args.host {
        config.instrument.host = host;
    }

    match args.command {
        SubCommand::Status => {
            let mut client = instrument_only_client(&config);
            connect(&client).await?;
            let result = client.update_status().await.map(print_status);
            client.disconnect().await;
            result.context("Status refresh failed")?;
        }

        SubCommand::Record { setup, duration } => {
            let setup = setup.unwrap_or(config.recording.setup);
            let duration = duration.or(config.recording.duration_secs);
            run_record(&config, setup, duration).await?;
        }

        SubCommand::Upload { file, setup } => {
            let setup = setup.unwrap_or(config.recording.setup);
            let (_lock, store) = open_store(&config)?;
            let client = storage_client(&config, Arc::new(store.clone()), setup);
            client.update_setup(setup).context("Failed to load sensor metadata")?;

            let summary = client
                .upload_configuration_file(&file)
                .with_context(|| format!("Upload of {} failed", file.display()))?;
            store.flush().context("Failed to flush database")?;

            println!(
                "{}: {} sensor entries, {} transducers, {} rows updated",
                summary.setup, summary.sensor_entries, summary.transducer_entries, summary.patches_applied
            );
            if !summary.ignored.is_empty() {
                println!("Ignored (no matching sensor): {:?}", summary.ignored);
            }
        }

        SubCommand::SetScanSpeed { speed } => {
            let mut client = instrument_only_client(&config);
            connect(&client).await?;
            let confirmed = client.update_laser_scan_speed(speed).await;
            client.disconnect().await;
            println!("Laser scan speed: {}", display_option(confirmed.context("Failed to set scan speed")?));
        }

        SubCommand::SetDivider { divider } => {
            let mut client = instrument_only_client(&config);
            connect(&client).await?;
            let confirmed = client.update_peak_data_streaming_divider(divider).await;
            client.disconnect().await;
            println!("Streaming divider: {}", display_option(confirmed.context("Failed to set divider")?));
        }

        SubCommand::SetNtpServer { server } => {
            let mut client = instrument_only_client(&config);
            connect(&client).await?;
            let confirmed = client.update_ntp_server(server).await;
            client.disconnect().await;
            let (server, enabled) = confirmed.context("Failed to update NTP server")?;
            println!("NTP server: {} (enabled: {})", display_option(server), display_option(enabled));
        }

        SubCommand::Setup { setup } => {
            let setup = setup.unwrap_or(config.recording.setup);
            let (_lock, store) = open_store(&config)?;
            let client = storage_client(&config, Arc::new(store), setup);
            client.update_setup(setup).context("Failed to load sensor metadata")?;

            let snapshot = client.mapper().snapshot();
            println!("Setup {} (code {})", setup, setup.code());
            for group in snapshot.groups() {
                let mut sensors: Vec<_> = group.sensors.values().collect();
                sensors.sort_by(|a, b| (a.channel, a.index).cmp(&(b.channel, b.index)));
                println!("  {} ({} sensors)", group.group, sensors.len());
                for s in sensors {
                    println!(
                        "    {:<8} {:<16} ch {} idx {} {}",
                        s.uid,
                        s.name,
                        s.channel,
                        s.index,
                        if s.recording { "" } else { "(not recording)" }
                    );
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Recording
// ============================================================================

async fn run_record(config: &AppConfig, setup: SetupOption, duration: Option<u64>) -> Result<()> {
    let (_lock, store) = open_store(config)?;
    let mut client = storage_client(config, Arc::new(store.clone()), setup);
    client.update_setup(setup).context("Failed to load sensor metadata")?;

    connect(&client).await?;
    client.update_status().await.context("Status refresh failed")?;
    if client.status().effective_sampling_rate().is_none() {
        warn!("Sampling rate unknown; every row will be written individually");
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping recording...");
        shutdown_token.cancel();
    });
    if let Some(secs) = duration {
        let timer_token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(seconds = secs, "Recording duration reached");
            timer_token.cancel();
        });
    }

    let result = client.record(&cancel_token).await;
    client.disconnect().await;
    store.flush().context("Failed to flush database")?;
    let summary = result.context("Recording failed")?;

    println!(
        "{}: {} frames, {} rows written, {} rows lost, {} bytes drained ({:?})",
        summary.setup,
        summary.frames,
        summary.rows_written(),
        summary.rows_lost(),
        summary.drained_bytes,
        summary.stop
    );
    for writer in &summary.writers {
        if let Some(error) = &writer.error {
            warn!(group = %writer.group, error = %error, "Writer failed during recording");
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn open_store(config: &AppConfig) -> Result<(ProcessLock, SledStore)> {
    let lock = ProcessLock::acquire(&config.storage.data_dir)?;
    let path = config.storage.database_path();
    let store = SledStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok((lock, store))
}

fn storage_client(
    config: &AppConfig,
    store: Arc<dyn SensorStore>,
    setup: SetupOption,
) -> InstrumentClient {
    InstrumentClient::new(
        ClientSettings::from_config(config),
        store,
        StatusPublisher::new(config.storage.status_path()),
        setup,
    )
}

/// Client for instrument-only commands; leaves the database free for a
/// concurrent recording.
fn instrument_only_client(config: &AppConfig) -> InstrumentClient {
    storage_client(config, Arc::new(InMemoryStore::new()), config.recording.setup)
}

async fn connect(client: &InstrumentClient) -> Result<()> {
    client.connect().await.with_context(|| {
        format!(
            "Failed to connect to {}:{}",
            client.settings().host,
            client.settings().command_port
        )
    })
}

fn display_option<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

fn print_status(status: &InstrumentStatus) {
    println!("Firmware:           {}", display_option(status.firmware_version.as_deref()));
    println!("Instrument name:    {}", display_option(status.instrument_name.as_deref()));
    println!("Ready:              {}", display_option(status.is_ready));
    println!("DUT channels:       {}", display_option(status.dut_channel_count));
    println!("Scan speeds:        {:?}", status.available_laser_scan_speeds);
    println!("Streaming:          {}", display_option(status.peak_data_streaming_status));
    println!("Laser scan speed:   {}", display_option(status.laser_scan_speed));
    println!("Streaming divider:  {}", display_option(status.peak_data_streaming_divider));
    println!("Sampling rate:      {}", display_option(status.effective_sampling_rate()));
    println!("Streaming buffer:   {}", display_option(status.peak_data_streaming_available_buffer));
    println!("Instrument time:    {}", display_option(status.instrument_time));
    println!("NTP enabled:        {}", display_option(status.ntp_enabled));
    println!("NTP server:         {}", display_option(status.ntp_server));
}
