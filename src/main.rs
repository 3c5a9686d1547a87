mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use bandstream::audio::analysis::Window;
use bandstream::audio::bands::Preset;
use bandstream::audio::decode::FileSource;
use bandstream::audio::features::SpectrumFrame;
use bandstream::audio::mic::{self, MicrophoneSource};
use bandstream::audio::source::PcmSource;
use bandstream::config::{self, Config};
use bandstream::{CapturePipeline, PipelineConfig, PipelineEvent, PipelineState};
use cli::{Cli, OutputFormat};

const BAR_WIDTH: usize = 32;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = mic::list_devices().context("Failed to enumerate input devices")?;
        println!("Input devices:");
        for device in &devices {
            println!(
                "  {}{:<40} {:>6} Hz, up to {} channel(s)",
                if device.is_default { "* " } else { "  " },
                device.name,
                device
                    .default_sample_rate
                    .map_or_else(|| "?".to_string(), |r| r.to_string()),
                device.max_channels
            );
        }
        return Ok(());
    }

    let config = resolve_config(&cli);
    let pipeline_config = config
        .pipeline_config()
        .context("Invalid capture configuration")?;

    log::info!(
        "Bands: {} ({}Hz, {} samples/frame, {:?} window)",
        pipeline_config.bands.labels().join(", "),
        pipeline_config.sample_rate,
        pipeline_config.frame_size(),
        pipeline_config.window
    );

    match cli.input {
        Some(ref input) => {
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
            log::info!("Input: {}", input.display());
            stream_bands(FileSource::new(input, true), pipeline_config, &cli)
        }
        None => {
            let source = MicrophoneSource::new(config.capture.device.clone());
            stream_bands(source, pipeline_config, &cli)
        }
    }
}

/// Load the config file (explicit path, then `./bandstream.toml`, then the
/// user config dir) and apply CLI values that differ from their defaults.
fn resolve_config(cli: &Cli) -> Config {
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("bandstream.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("bandstream").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("bandstream").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let mut cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    if cli.sample_rate != config::default_sample_rate() { cfg.capture.sample_rate = cli.sample_rate; }
    if cli.frame_size != config::default_frame_size() { cfg.capture.frame_size = cli.frame_size; }
    if cli.preset != Preset::FiveBand { cfg.analysis.preset = cli.preset; }
    if cli.window != Window::Rectangular { cfg.analysis.window = cli.window; }
    if cli.device.is_some() { cfg.capture.device = cli.device.clone(); }
    cfg
}

fn stream_bands(
    source: impl PcmSource + 'static,
    pipeline_config: PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let run_for = run_duration(cli.duration)?;

    let (tx, rx) = mpsc::channel();
    let pipeline = CapturePipeline::new(pipeline_config, source, tx);
    let labels = pipeline.config().bands.labels();
    pipeline.start().context("Failed to start capture")?;

    let deadline = run_for.map(|d| Instant::now() + d);
    let mut frames = 0u64;

    loop {
        let timeout = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(250));

        match rx.recv_timeout(timeout) {
            Ok(PipelineEvent::Frame(frame)) => {
                print_frame(&frame, &labels, cli.format)?;
                frames += 1;
            }
            Ok(PipelineEvent::Error(err)) => {
                pipeline.stop();
                let kind = err.kind();
                return Err(err).context(format!("Capture ended ({:?})", kind));
            }
            Err(RecvTimeoutError::Timeout) => {
                let expired = deadline.map_or(false, |d| Instant::now() >= d);
                if expired || pipeline.state() == PipelineState::Idle {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.stop();
    log::info!("Done: {} frames", frames);
    Ok(())
}

fn run_duration(secs: Option<f32>) -> Result<Option<Duration>> {
    secs.map(|s| {
        Duration::try_from_secs_f32(s).with_context(|| format!("Invalid --duration {}", s))
    })
    .transpose()
}

fn print_frame(frame: &SpectrumFrame, labels: &[&str], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(frame).context("Failed to encode frame")?);
        }
        OutputFormat::Bars => {
            let line: Vec<String> = frame
                .named(labels)
                .into_iter()
                .map(|(label, value)| {
                    let filled = ((value * 4.0).round().max(0.0) as usize).min(BAR_WIDTH);
                    format!("{:>9} {:<width$}", label, "#".repeat(filled), width = BAR_WIDTH)
                })
                .collect();
            println!("{:>6} {}", frame.sequence, line.join(" "));
        }
    }
    Ok(())
}
