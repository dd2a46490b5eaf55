//! CLI Entry Point for scan_daq
//!
//! Provides command-line interface for:
//! - Running a continuous acquisition (output waveform + input scan) until
//!   interrupted or for a fixed number of polls
//! - Printing a generated output waveform as JSON
//! - Printing the effective configuration (file + environment) as TOML
//!
//! # Usage
//!
//! ```bash
//! scan_daq run --config config/scan_daq.toml --waveform triangle --polls 10
//! scan_daq waveform --shape sine --length 16
//! SCAN_DAQ_INPUT__SAMPLE_RATE=2000 scan_daq config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan_daq::config::DaqConfig;
use scan_daq::hardware::simulated::SimulatedScanService;
use scan_daq::waveform::{generate_named, WaveformShape};
use scan_daq::{logging, AcquisitionController};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scan_daq")]
#[command(about = "Continuous analog input/output scanning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the output with a waveform and stream the input
    Run {
        /// Configuration file
        #[arg(long, default_value = scan_daq::config::DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Output waveform shape (overrides the configuration)
        #[arg(long)]
        waveform: Option<WaveformShape>,

        /// Output amplitude in volts (overrides the configuration)
        #[arg(long)]
        amplitude: Option<f64>,

        /// Output offset in volts (overrides the configuration)
        #[arg(long)]
        offset: Option<f64>,

        /// Stop after this many polls instead of waiting for Ctrl+C
        #[arg(long)]
        polls: Option<u64>,
    },

    /// Print one cycle of a waveform as JSON
    Waveform {
        /// Waveform shape
        #[arg(long, default_value = "triangle")]
        shape: String,

        /// Amplitude in volts
        #[arg(long, default_value_t = 1.0)]
        amplitude: f64,

        /// Offset in volts
        #[arg(long, default_value_t = 0.0)]
        offset: f64,

        /// Number of samples
        #[arg(long, default_value_t = 100)]
        length: usize,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file
        #[arg(long, default_value = scan_daq::config::DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            waveform,
            amplitude,
            offset,
            polls,
        } => {
            let mut config = DaqConfig::load_from(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(shape) = waveform {
                config.waveform.shape = shape;
            }
            if let Some(amplitude) = amplitude {
                config.waveform.amplitude = amplitude;
            }
            if let Some(offset) = offset {
                config.waveform.offset = offset;
            }
            run(config, polls).await
        }
        Commands::Waveform {
            shape,
            amplitude,
            offset,
            length,
        } => {
            let samples = generate_named(&shape, amplitude, offset, length)?;
            let json = serde_json::json!({
                "shape": shape,
                "amplitude": amplitude,
                "offset": offset,
                "samples": samples,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Commands::Config { config } => {
            let config = DaqConfig::load_from(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: DaqConfig, polls: Option<u64>) -> Result<()> {
    logging::init_from_config(&config)?;
    config.validate()?;

    println!("🚀 scan_daq - continuous analog I/O");
    let service = Arc::new(SimulatedScanService::new());
    let mut daq = AcquisitionController::from_config(service, &config)?;

    let outcome = acquire(&mut daq, &config, polls).await;

    daq.shutdown();
    println!("👋 Device released");

    if let Err(e) = &outcome {
        eprintln!("❌ Acquisition failed: {:#}", e);
    }
    outcome
}

async fn acquire(daq: &mut AcquisitionController, config: &DaqConfig, polls: Option<u64>) -> Result<()> {
    daq.initialize()?;

    let waveform = &config.waveform;
    let output_rate =
        daq.start_output_waveform(waveform.shape, waveform.amplitude, waveform.offset)?;
    let input_rate = daq.start_input()?;
    println!(
        "📡 Output {} at {:.3} Hz, input at {:.3} Hz - Press Ctrl+C to stop",
        waveform.shape, output_rate, input_rate
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut iteration = 0u64;
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("waiting for Ctrl+C")?;
                info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(config.poll_interval()) => {}
        }

        let (input_running, output_running) = daq.poll_both()?;
        if input_running && output_running {
            let snapshot = daq.read_input_snapshot()?;
            let average = daq.input_average().unwrap_or_default();
            info!(samples = snapshot.len(), average, "Input snapshot");

            if let Some(filter) = &config.filter {
                let filtered = daq.filter_input_snapshot(filter.family, filter.order)?;
                let peak = filtered.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
                info!(filter = filter.family.name(), peak, "Filtered input snapshot");
            }
        } else if !input_running && !output_running {
            warn!("Both scans have stopped");
            break;
        }

        iteration += 1;
        if polls.is_some_and(|limit| iteration >= limit) {
            break;
        }
    }

    Ok(())
}
