//! Connector Application
//!
//! Keeps the audio tunnel to the controller up: streams the microphone out,
//! plays clips that come back in.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fay_connector::{
    audio::{list_devices, CpalAudioRoute},
    config::{AddressSource, AppConfig, SettingsFile, StaticAddress},
    storage::DirectoryClipStore,
    tunnel::{TunnelBuilder, TunnelService},
};

#[derive(Debug, Parser)]
#[command(name = "connector", about = "Bidirectional audio tunnel client")]
struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, env = "FAY_CONNECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Controller address as host:port, overriding the settings file
    #[arg(long, env = "FAY_CONTROLLER_ADDRESS")]
    address: Option<String>,

    /// Turn the microphone on at startup
    #[arg(long)]
    mic: bool,

    /// Capture device name
    #[arg(long)]
    input_device: Option<String>,

    /// Playback device name
    #[arg(long)]
    output_device: Option<String>,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let settings_path = match args.config.clone() {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_or_default(&settings_path)
        .with_context(|| format!("reading {}", settings_path.display()))?;

    tracing::info!("Starting connector (settings: {})", settings_path.display());

    let source: Arc<dyn AddressSource> = match &args.address {
        Some(address) => Arc::new(StaticAddress::new(address.clone())),
        None => Arc::new(SettingsFile::new(settings_path.clone())),
    };

    let route = Arc::new(CpalAudioRoute::new(
        args.input_device.clone(),
        args.output_device.clone(),
        config.timings.read_chunk_timeout(),
    ));

    let clip_dir = config.clip_dir_or_default()?;
    tracing::info!("Clips are saved to {}", clip_dir.display());

    let service = TunnelBuilder::new(source, route)
        .timings(config.timings.clone())
        .mic_enabled(config.mic_enabled || args.mic)
        .clip_store(Arc::new(DirectoryClipStore::new(clip_dir)))
        .build();
    service.start()?;

    tracing::info!("Commands: mic on | mic off | status | quit");
    run_console(&service, &settings_path);

    service.shutdown();
    Ok(())
}

/// Read commands from stdin until `quit` or end of input
fn run_console(service: &TunnelService, settings_path: &Path) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Console read failed: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            "mic on" => set_mic(service, settings_path, true),
            "mic off" => set_mic(service, settings_path, false),
            "status" => {
                let stats = service.stats();
                println!("{}", service.status_line());
                println!(
                    "  clips: {} received, {} dropped | heartbeats: {} | reconnects: {} | audio: {}",
                    stats.clips_received,
                    stats.clips_dropped,
                    stats.heartbeats,
                    stats.reconnects,
                    service.exclusion_state()
                );
            }
            "quit" | "exit" => break,
            other => println!("Unknown command: {other}"),
        }
    }
}

fn set_mic(service: &TunnelService, settings_path: &Path, enabled: bool) {
    service.toggle().set(enabled);

    let result = AppConfig::load_or_default(settings_path).and_then(|mut config| {
        config.mic_enabled = enabled;
        config.save(settings_path)
    });
    if let Err(e) = result {
        tracing::warn!("Failed to save microphone setting: {}", e);
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();
}
