//! Emit synthetic CCD frames over UDP or a serial port.
//!
//! The spectrum is a flat baseline with three Gaussian emission lines whose
//! centres drift slowly, which is enough to exercise the receivers and the
//! peak detector without hardware.

use std::io::Write;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ccd_acquire::config::{SerialConfig, CCD_PIXEL_COUNT, SERIAL_BAUD_RATE, UDP_PORT};
use ccd_acquire::serial::{self, encode_frame, FrameMarkers};
use ccd_acquire::udp::encode_packet;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

/// Dark level added to every pixel
const BASELINE: f64 = 200.0;

/// Emission lines as (position as fraction of the sensor, height, sigma in pixels)
const LINES: [(f64, f64, f64); 3] = [(0.25, 3000.0, 6.0), (0.5, 8000.0, 4.0), (0.72, 5000.0, 8.0)];

/// Peak-to-peak drift of the line centres, in pixels
const DRIFT_PIXELS: f64 = 6.0;

#[derive(Parser, Debug)]
#[command(name = "ccd_mock")]
#[command(about = "Send synthetic linear CCD frames")]
#[command(version)]
struct Args {
    /// Frames per second
    #[arg(short, long, global = true, default_value = "30")]
    fps: f64,

    /// Pixels per frame
    #[arg(long, global = true, default_value_t = CCD_PIXEL_COUNT)]
    pixels: usize,

    /// Number of frames to send (0 = infinite)
    #[arg(short = 'n', long, global = true, default_value = "0")]
    frames: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send datagrams to a UDP receiver
    Udp {
        /// Receiver address
        #[arg(short, long, default_value_t = format!("127.0.0.1:{UDP_PORT}"))]
        target: String,

        /// Magic byte to put in the header
        #[arg(long, default_value = "170")]
        magic: u8,
    },

    /// Write the framed byte stream to a serial port
    Serial {
        /// Port name
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value_t = SERIAL_BAUD_RATE)]
        baud: u32,
    },
}

/// Intensities of frame `index`.
fn render(pixels: usize, index: u64, fps: f64) -> Vec<u16> {
    let t = index as f64 / fps;
    let shift = 0.5 * DRIFT_PIXELS * (t * 0.5).sin();
    (0..pixels)
        .map(|px| {
            let x = px as f64;
            let signal: f64 = LINES
                .iter()
                .map(|&(fraction, height, sigma)| {
                    let centre = fraction * pixels as f64 + shift;
                    height * (-(x - centre).powi(2) / (2.0 * sigma * sigma)).exp()
                })
                .sum();
            (BASELINE + signal).round().clamp(0.0, u16::MAX as f64) as u16
        })
        .collect()
}

/// Call `send` once per frame at `fps` until `frames` have gone out.
fn pace(fps: f64, frames: u64, mut send: impl FnMut(u64) -> Result<()>) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / fps.max(0.1));
    let started = Instant::now();
    let mut next = started;
    let mut index = 0;

    while frames == 0 || index < frames {
        send(index)?;
        index += 1;
        if index % 100 == 0 {
            debug!("{index} frames sent");
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // Fell behind; don't try to catch up in a burst
            next = now;
        }
    }
    info!("Sent {index} frames in {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let (fps, pixels) = (args.fps, args.pixels);

    match args.command {
        Command::Udp { target, magic } => {
            let socket = UdpSocket::bind("0.0.0.0:0").context("binding sender socket")?;
            info!("Sending {pixels}-pixel frames to {target} at {fps} fps");
            let started = Instant::now();
            pace(fps, args.frames, |index| {
                let timestamp_us = started.elapsed().as_micros() as u32;
                let samples = render(pixels, index, fps);
                let datagram = encode_packet(magic, index as u32, timestamp_us, &samples);
                socket
                    .send_to(&datagram, &target)
                    .with_context(|| format!("sending to {target}"))?;
                Ok(())
            })
        }
        Command::Serial { port, baud } => {
            let config = SerialConfig {
                port,
                baud_rate: baud,
                ..SerialConfig::default()
            };
            let mut device = serial::open_port(&config)
                .with_context(|| format!("opening {}", config.port))?;
            let markers = FrameMarkers::from(&config);
            info!("Writing {pixels}-pixel frames to {} at {fps} fps", config.port);
            pace(fps, args.frames, |index| {
                device.write_all(&encode_frame(&markers, &render(pixels, index, fps)))?;
                Ok(())
            })?;
            // Trailing frame start so the receiver commits the last frame
            device.write_all(&[markers.frame_start])?;
            Ok(())
        }
    }
}
