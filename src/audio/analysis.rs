use serde::{Deserialize, Serialize};

use super::bands::BandTable;
use super::features::RawBands;
use super::fft::{self, Direction};
use crate::error::{CaptureError, Result};

const PCM_SCALE: f32 = 32768.0;

/// Window applied to the normalized frame before the transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Window {
    /// No weighting. Leaks energy across bins for off-bin tones.
    #[default]
    Rectangular,
    Hann,
}

/// Turns fixed-size PCM frames into per-band magnitude sums.
///
/// The real/imaginary buffers are allocated once and reused for every
/// frame, so one analyzer must not be shared between threads.
pub struct SpectrumAnalyzer {
    table: BandTable,
    window: Option<Vec<f32>>,
    real: Vec<f32>,
    imag: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(table: BandTable, window: Window) -> Self {
        let n = table.frame_size();
        let window = match window {
            Window::Rectangular => None,
            Window::Hann => Some(hann_window(n)),
        };
        Self {
            table,
            window,
            real: vec![0.0; n],
            imag: vec![0.0; n],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.real.len()
    }

    /// Analyze one frame. A frame of the wrong length is a caller bug and is
    /// rejected without touching the buffers.
    pub fn calculate(&mut self, frame: &[i16]) -> Result<RawBands> {
        if frame.len() != self.frame_size() {
            return Err(CaptureError::Configuration(format!(
                "frame has {} samples, analyzer expects {}",
                frame.len(),
                self.frame_size()
            )));
        }

        for (i, &sample) in frame.iter().enumerate() {
            let normalized = sample as f32 / PCM_SCALE;
            self.real[i] = match self.window {
                Some(ref w) => normalized * w[i],
                None => normalized,
            };
            self.imag[i] = 0.0;
        }

        fft::transform(&mut self.real, &mut self.imag, Direction::Forward);

        let magnitude = |k: usize| (self.real[k] * self.real[k] + self.imag[k] * self.imag[k]).sqrt();

        Ok(self
            .table
            .bands()
            .iter()
            .map(|band| band.bins().map(&magnitude).sum::<f32>())
            .collect())
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bands::{bin_width_hz, BandDefinition, Preset};
    use crate::audio::scaler::BandScaler;

    fn sine_frame(freq: f32, amplitude: f32, sample_rate: u32, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (amplitude * 32767.0 * (2.0 * std::f32::consts::PI * freq * t).sin()).round() as i16
            })
            .collect()
    }

    fn five_band() -> BandTable {
        BandTable::preset(Preset::FiveBand, 44100, 1024).unwrap()
    }

    #[test]
    fn silence_yields_zero_bands() {
        let table = five_band();
        let scaler = BandScaler::new(&table);
        let mut analyzer = SpectrumAnalyzer::new(table, Window::Rectangular);

        let raw = analyzer.calculate(&[0i16; 1024]).unwrap();
        assert!(raw.iter().all(|&v| v == 0.0));
        assert!(scaler.scale(&raw).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn dominant_band_contains_tone_bin() {
        let table = five_band();
        let mut analyzer = SpectrumAnalyzer::new(table.clone(), Window::Rectangular);
        let width = bin_width_hz(44100, 1024);

        // Bin-centred tones so the rectangular window does not leak.
        for &bin in &[1usize, 4, 15, 50, 200] {
            let freq = bin as f32 * width;
            let raw = analyzer.calculate(&sine_frame(freq, 0.8, 44100, 1024)).unwrap();
            let expected = table.band_for_bin(bin).unwrap();
            let total: f32 = raw.iter().sum();
            let (dominant, _) = raw
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
            assert_eq!(dominant, expected, "tone at bin {} -> {:?}", bin, raw);
            assert!(raw[expected] / total > 0.9, "share too low: {:?}", raw);
        }
    }

    #[test]
    fn hann_window_suppresses_leakage_for_off_bin_tone() {
        let table = five_band();
        let frame = sine_frame(100.0, 0.8, 44100, 1024);

        let mut rect = SpectrumAnalyzer::new(table.clone(), Window::Rectangular);
        let mut hann = SpectrumAnalyzer::new(table, Window::Hann);
        let rect_treble = rect.calculate(&frame).unwrap()[4];
        let hann_treble = hann.calculate(&frame).unwrap()[4];
        assert!(hann_treble < rect_treble / 100.0);
    }

    #[test]
    fn off_bin_tone_still_peaks_in_its_band_without_window() {
        let table = five_band();
        let mut analyzer = SpectrumAnalyzer::new(table, Window::Rectangular);
        let raw = analyzer.calculate(&sine_frame(100.0, 0.8, 44100, 1024)).unwrap();
        let bass = raw[1];
        assert!(raw.iter().enumerate().all(|(i, &v)| i == 1 || v < bass), "{:?}", raw);
    }

    #[test]
    fn hundred_hz_end_to_end_with_hann() {
        let table = five_band();
        let scaler = BandScaler::new(&table);
        let mut analyzer = SpectrumAnalyzer::new(table, Window::Hann);

        let raw = analyzer.calculate(&sine_frame(100.0, 0.8, 44100, 1024)).unwrap();
        let scaled = scaler.scale(&raw);

        let low = scaled[0].max(scaled[1]);
        assert!(low > scaled[2] && low > scaled[3] && low > scaled[4], "{:?}", scaled);
        assert!(scaled[4] < 0.25, "treble not near zero: {:?}", scaled);
        assert!(scaled[4] < low / 10.0);
    }

    #[test]
    fn buffers_are_reset_between_frames() {
        let table = five_band();
        let mut analyzer = SpectrumAnalyzer::new(table, Window::Rectangular);
        let tone = sine_frame(1000.0, 0.5, 44100, 1024);

        let first = analyzer.calculate(&tone).unwrap();
        analyzer.calculate(&[0i16; 1024]).unwrap();
        let again = analyzer.calculate(&tone).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn dc_offset_only_reaches_bin_zero() {
        let table = BandTable::new(
            vec![
                BandDefinition::new("dc", 0, 0, 1.0),
                BandDefinition::new("rest", 1, 511, 1.0),
            ],
            1024,
        )
        .unwrap();
        let mut analyzer = SpectrumAnalyzer::new(table, Window::Rectangular);
        let raw = analyzer.calculate(&[16384i16; 1024]).unwrap();
        assert!((raw[0] - 512.0).abs() < 1e-2);
        assert!(raw[1] < 1e-2);
    }

    #[test]
    fn rejects_wrong_frame_length() {
        let mut analyzer = SpectrumAnalyzer::new(five_band(), Window::Rectangular);
        let err = analyzer.calculate(&[0i16; 512]).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
    }

    #[test]
    fn hann_window_shape() {
        let w = hann_window(1024);
        assert!(w[0].abs() < 0.01);
        assert!(w[1023].abs() < 0.01);
        assert!((w[512] - 1.0).abs() < 0.01);
    }
}
