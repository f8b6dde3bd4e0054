//! Sluice loopback - plays a test tone and records it back
//!
//! Wires the core engines to the software platform running in real time.
//! The playback stream renders a sine wave; the capture stream reads what
//! the platform played and reports its level.
//!
//! ## Command line
//!
//! - `[PATH]`: settings file (default `~/.config/sluice/loopback.yaml`)
//! - `--write-settings`: save the effective settings to the file and exit

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use sluice_core::audio::sim::{CaptureSource, Clocking, SimConfig, SimPlatform};
use sluice_core::audio::{Backend, BackendFactory, BackendKind, QueueBackendFactory, StreamSettings};
use sluice_core::config::{default_config_path, load_config, save_config};
use sluice_core::device::{DeviceContext, Renderer};
use sluice_core::types::DeviceFormat;

const SETTINGS_FILE: &str = "loopback.yaml";
const TONE_HZ: f64 = 440.0;
const TONE_LEVEL: f32 = 0.5;
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Sine tone written to every channel
struct ToneRenderer {
    phase: f64,
}

impl Renderer for ToneRenderer {
    fn render(&mut self, dest: &mut [u8], frames: usize, channel_stride: usize, format: &DeviceFormat) {
        let sample_bytes = format.sample_bytes();
        let step = std::f64::consts::TAU * TONE_HZ / format.frequency.max(1) as f64;
        for frame in dest.chunks_exact_mut(sample_bytes * channel_stride).take(frames) {
            let value = self.phase.sin() as f32 * TONE_LEVEL;
            for sample in frame.chunks_exact_mut(sample_bytes) {
                format.sample_type.encode(value, sample);
            }
            self.phase = (self.phase + step) % std::f64::consts::TAU;
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let write_settings = args.iter().any(|arg| arg == "--write-settings");
    let config_path = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .map(Into::into)
        .unwrap_or_else(|| default_config_path(SETTINGS_FILE));

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("sluice-loopback starting up");

    let settings: StreamSettings = load_config(&config_path);
    if write_settings {
        save_config(&settings, &config_path)
            .with_context(|| format!("Failed to write settings to {:?}", config_path))?;
        println!("Settings written to {}", config_path.display());
        return Ok(());
    }

    let platform = Arc::new(SimPlatform::new(SimConfig {
        clocking: Clocking::Realtime,
        source: CaptureSource::Loopback,
        ..SimConfig::default()
    }));
    let mut factory = QueueBackendFactory::with_settings(platform, settings.engine_settings());
    if !factory.init() {
        bail!("Software platform is unavailable");
    }

    println!(
        "Endpoints: playback {:?}, capture {:?}",
        factory.enumerate(BackendKind::Playback),
        factory.enumerate(BackendKind::Capture)
    );
    println!(
        "Requested {} Hz, {} channel(s), {}, {} frame chunks, {:.1} ms buffer",
        settings.frequency,
        settings.channels.count(),
        settings.sample_type,
        settings.update_size,
        settings.latency_ms()
    );

    let format = settings.device_format();
    let playback_device = Arc::new(DeviceContext::with_renderer(
        format,
        Box::new(ToneRenderer { phase: 0.0 }),
    ));
    let capture_device = Arc::new(DeviceContext::new(format));

    let mut playback = factory
        .create_backend(Arc::clone(&playback_device), BackendKind::Playback)
        .context("Failed to create playback backend")?;
    let mut capture = factory
        .create_backend(Arc::clone(&capture_device), BackendKind::Capture)
        .context("Failed to create capture backend")?;

    playback
        .open(&settings.device_name)
        .context("Failed to open playback device")?;
    if !playback.reset() {
        bail!("Failed to configure playback on {:?}", playback.device_name());
    }
    capture
        .open(&settings.device_name)
        .context("Failed to open capture device")?;

    let negotiated = playback_device.format();
    println!(
        "Playback on {:?}: {}, {} frame chunks x {}",
        playback.device_name(),
        negotiated.sample_type,
        negotiated.update_size,
        negotiated.chunk_count()
    );
    println!(
        "Capture on {:?}: buffer {} frames",
        capture.device_name(),
        capture_device.buffer_size()
    );

    playback.start().context("Failed to start playback")?;
    capture.start().context("Failed to start capture")?;

    let result = run_loopback(
        playback.as_mut(),
        capture.as_mut(),
        &capture_device,
        settings.run_time(),
    );

    capture.stop();
    playback.stop();

    if let Some(reason) = playback_device.disconnect_reason() {
        log::warn!("Playback device lost: {}", reason);
    }
    if let Some(reason) = capture_device.disconnect_reason() {
        log::warn!("Capture device lost: {}", reason);
    }

    let captured = result?;
    println!();
    println!(
        "Captured {} frames in {:.2} s",
        captured,
        settings.run_time().as_secs_f32()
    );
    Ok(())
}

/// Pull captured audio until `run_time` elapses, printing periodic reports
///
/// Returns the number of frames captured.
fn run_loopback(
    playback: &mut dyn Backend,
    capture: &mut dyn Backend,
    capture_device: &DeviceContext,
    run_time: Duration,
) -> Result<usize> {
    let format = capture_device.format();
    let frame_size = format.frame_size();
    let sample_bytes = format.sample_bytes();
    let mut buf = Vec::new();
    let mut total = 0usize;
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;

    let start = Instant::now();
    let mut next_report = start + REPORT_INTERVAL;
    while start.elapsed() < run_time {
        let frames = capture.available_samples();
        if frames > 0 {
            buf.resize(frames * frame_size, 0);
            capture
                .capture_samples(&mut buf, frames)
                .context("Failed to read captured audio")?;
            for sample in buf.chunks_exact(sample_bytes) {
                let value = format.sample_type.decode(sample) as f64;
                sum_sq += value * value;
            }
            count += buf.len() / sample_bytes;
            total += frames;
        }

        if Instant::now() >= next_report {
            let timing = playback.clock_latency();
            let rms = if count > 0 { (sum_sq / count as f64).sqrt() } else { 0.0 };
            println!(
                "clock {:>8.3} s  latency {:>6.2} ms  capture level {:>6.1} dBFS",
                timing.clock_time.as_secs_f64(),
                timing.latency.as_secs_f64() * 1000.0,
                20.0 * rms.max(1e-9).log10()
            );
            sum_sq = 0.0;
            count = 0;
            next_report += REPORT_INTERVAL;
        }

        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(total)
}
