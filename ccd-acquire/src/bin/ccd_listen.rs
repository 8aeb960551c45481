//! Run a CCD receiver and report what arrives.
//!
//! Subcommands:
//! - `serial`: decode the framed byte stream from the USB serial link
//! - `udp`: decode datagrams arriving on a UDP port
//! - `ports`: list serial ports and the one auto-detection would pick

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ccd_acquire::serial;
use ccd_acquire::{AcquisitionConfig, Peak, Spectrometer, TransportKind};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Port name that triggers auto-detection
const AUTO_PORT: &str = "auto";

#[derive(Parser, Debug)]
#[command(name = "ccd_listen")]
#[command(about = "Receive linear CCD frames over serial or UDP")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (0 = run until killed)
    #[arg(short, long, global = true, default_value = "0")]
    duration: f64,

    /// Freeze the frame after this many seconds and print its peaks
    #[arg(long, global = true)]
    freeze_after: Option<f64>,

    /// Peak threshold override
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Peak minimum separation override, in pixels
    #[arg(long, global = true)]
    min_distance: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive from a serial port
    Serial {
        /// Port name, or "auto" to pick an STM32/USB serial device
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Receive UDP datagrams
    Udp {
        /// Address to bind
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List serial ports
    Ports,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AcquisitionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.peaks.threshold = threshold;
    }
    if let Some(min_distance) = args.min_distance {
        config.peaks.min_distance = min_distance;
    }

    let kind = match args.command {
        Command::Ports => return cmd_ports(),
        Command::Serial { port, baud } => {
            if let Some(port) = port {
                config.serial.port = port;
            }
            if config.serial.port == AUTO_PORT {
                config.serial.port = match serial::find_ccd_port() {
                    Some(port) => port,
                    None => bail!("no serial ports found"),
                };
                info!("Auto-selected {}", config.serial.port);
            }
            if let Some(baud) = baud {
                config.serial.baud_rate = baud;
            }
            TransportKind::Serial
        }
        Command::Udp { bind, port } => {
            if let Some(bind) = bind {
                config.udp.bind_addr = bind;
            }
            if let Some(port) = port {
                config.udp.port = port;
            }
            TransportKind::Udp
        }
    };

    run(config, kind, args.duration, args.freeze_after)
}

fn cmd_ports() -> Result<()> {
    let ports = serial::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for info in &ports {
        println!("{}", serial::describe_port(info));
    }
    if let Some(pick) = serial::pick_port(&ports) {
        println!("\nAuto-detect would use: {pick}");
    }
    Ok(())
}

fn run(
    config: AcquisitionConfig,
    kind: TransportKind,
    duration: f64,
    freeze_after: Option<f64>,
) -> Result<()> {
    let mut spectrometer = Spectrometer::new(config)?;
    spectrometer.start(kind)?;

    let started = Instant::now();
    let run_for = (duration > 0.0).then(|| Duration::from_secs_f64(duration));
    let mut freeze_at = freeze_after.map(Duration::from_secs_f64);
    let mut next_report = Duration::from_secs(1);

    loop {
        thread::sleep(Duration::from_millis(50));
        let elapsed = started.elapsed();

        if spectrometer.receiver().task_finished() {
            warn!("{kind} receiver ended on its own");
            break;
        }

        if freeze_at.is_some_and(|at| elapsed >= at) {
            freeze_at = None;
            let (frame, peaks) = spectrometer.freeze_and_detect();
            if let Some((pixel, value)) = frame.max() {
                info!("Frozen frame max {value:.0} at pixel {pixel}");
            }
            print_peaks(&peaks, spectrometer.current_calibration().is_set());
        }

        if elapsed >= next_report {
            next_report += Duration::from_secs(1);
            let stats = spectrometer.stats();
            info!(
                frames = stats.frames_received,
                rate = f64::from(stats.packets_per_second),
                last_sequence = stats.last_sequence,
                gaps = stats.sequence_gaps,
                "{kind} stats"
            );
        }

        if run_for.is_some_and(|limit| elapsed >= limit) {
            break;
        }
    }

    if let Some(exit) = spectrometer.stop() {
        info!("Receiver exit: {exit:?}");
    }
    let stats = spectrometer.stats();
    println!(
        "Received {} frames ({} sequence gaps)",
        stats.frames_received, stats.sequence_gaps
    );
    Ok(())
}

fn print_peaks(peaks: &[Peak], calibrated: bool) {
    if peaks.is_empty() {
        println!("No peaks above threshold");
        return;
    }
    println!("{:>8} {:>12} {:>10}", "pixel", "nm", "intensity");
    for peak in peaks {
        let wavelength = if calibrated {
            format!("{:.2}", peak.wavelength_nm)
        } else {
            "-".to_string()
        };
        println!(
            "{:>8} {:>12} {:>10.0}",
            peak.pixel_index, wavelength, peak.intensity
        );
    }
}
