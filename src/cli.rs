use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use bandstream::audio::analysis::Window;
use bandstream::audio::bands::Preset;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line of text bars per frame
    Bars,
    /// One JSON object per frame
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "bandstream", about = "Stream live microphone spectrum bands to the terminal")]
pub struct Cli {
    /// Replay an audio file (WAV, MP3, FLAC, OGG) instead of the microphone
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Config file (defaults to ./bandstream.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Band table preset
    #[arg(short, long, value_enum, default_value_t = Preset::FiveBand)]
    pub preset: Preset,

    /// Window applied before the FFT
    #[arg(short, long, value_enum, default_value_t = Window::Rectangular)]
    pub window: Window,

    /// Capture sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    pub sample_rate: u32,

    /// Samples per analysis frame (power of two)
    #[arg(long, default_value_t = 1024)]
    pub frame_size: usize,

    /// Stop after this many seconds (runs until the input ends if omitted)
    #[arg(short, long)]
    pub duration: Option<f32>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Bars)]
    pub format: OutputFormat,

    /// Input device name (defaults to the system default input)
    #[arg(long)]
    pub device: Option<String>,

    /// List available input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}
