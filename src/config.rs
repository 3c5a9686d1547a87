use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::audio::analysis::Window;
use crate::audio::bands::{BandDefinition, BandTable, Preset};
use crate::error::{CaptureError, Result};
use crate::pipeline::PipelineConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Explicit band table; overrides `analysis.preset` when non-empty.
    #[serde(default)]
    pub bands: Vec<BandDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_read_failure_limit")]
    pub read_failure_limit: u32,
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub window: Window,
    #[serde(default = "default_preset")]
    pub preset: Preset,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
            read_failure_limit: default_read_failure_limit(),
            read_retry_ms: default_read_retry_ms(),
            device: None,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window: Window::default(),
            preset: default_preset(),
        }
    }
}

pub fn default_sample_rate() -> u32 { 44100 }
pub fn default_frame_size() -> usize { 1024 }
fn default_read_failure_limit() -> u32 { 64 }
fn default_read_retry_ms() -> u64 { 5 }
fn default_preset() -> Preset { Preset::FiveBand }

impl Config {
    pub fn band_table(&self) -> Result<BandTable> {
        if self.bands.is_empty() {
            BandTable::preset(self.analysis.preset, self.capture.sample_rate, self.capture.frame_size)
        } else {
            BandTable::new(self.bands.clone(), self.capture.frame_size)
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if self.capture.sample_rate == 0 {
            return Err(CaptureError::Configuration("sample rate must be positive".into()));
        }
        let mut config = PipelineConfig::new(self.capture.sample_rate, self.band_table()?);
        config.window = self.analysis.window;
        config.read_failure_limit = self.capture.read_failure_limit;
        config.read_retry = Duration::from_millis(self.capture.read_retry_ms);
        Ok(config)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| CaptureError::Configuration(e.to_string()))
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match parse_config(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("{}: {}", path.display(), err);
            None
        }
    }
}
