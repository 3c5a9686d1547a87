use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// A contiguous, inclusive range of FFT bins aggregated into one value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandDefinition {
    pub label: String,
    pub bin_start: usize,
    pub bin_end: usize,
    /// Multiplier applied after log compression.
    pub gain: f32,
}

impl BandDefinition {
    pub fn new(label: &str, bin_start: usize, bin_end: usize, gain: f32) -> Self {
        Self {
            label: label.to_string(),
            bin_start,
            bin_end,
            gain,
        }
    }

    pub fn bins(&self) -> std::ops::RangeInclusive<usize> {
        self.bin_start..=self.bin_end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// sub-bass, bass, low-mids, high-mids, treble
    FiveBand,
    /// bass, treble
    BassTreble,
}

/// Immutable, validated band table for a fixed frame size.
#[derive(Clone, Debug, PartialEq)]
pub struct BandTable {
    bands: Vec<BandDefinition>,
    frame_size: usize,
}

impl BandTable {
    pub fn new(bands: Vec<BandDefinition>, frame_size: usize) -> Result<Self> {
        if frame_size < 2 || !frame_size.is_power_of_two() {
            return Err(CaptureError::Configuration(format!(
                "frame size {} is not a power of two",
                frame_size
            )));
        }
        if bands.is_empty() {
            return Err(CaptureError::Configuration("band table is empty".into()));
        }

        let half = frame_size / 2;
        for band in &bands {
            if band.bin_start > band.bin_end {
                return Err(CaptureError::Configuration(format!(
                    "band '{}' starts at bin {} after its end bin {}",
                    band.label, band.bin_start, band.bin_end
                )));
            }
            if band.bin_end >= half {
                return Err(CaptureError::Configuration(format!(
                    "band '{}' ends at bin {}, beyond the usable range [0, {})",
                    band.label, band.bin_end, half
                )));
            }
            if !band.gain.is_finite() {
                return Err(CaptureError::Configuration(format!(
                    "band '{}' has a non-finite gain",
                    band.label
                )));
            }
        }

        Ok(Self { bands, frame_size })
    }

    /// Build a preset table. Bin ranges are derived from the band's corner
    /// frequencies so the table stays perceptually equivalent for any
    /// sample rate and frame size.
    pub fn preset(preset: Preset, sample_rate: u32, frame_size: usize) -> Result<Self> {
        let bands = match preset {
            Preset::FiveBand => vec![
                hz_band("sub-bass", 20.0, 90.0, 0.8, sample_rate, frame_size),
                hz_band("bass", 90.0, 280.0, 1.0, sample_rate, frame_size),
                hz_band("low-mids", 280.0, 1000.0, 1.2, sample_rate, frame_size),
                hz_band("high-mids", 1000.0, 4000.0, 1.8, sample_rate, frame_size),
                hz_band("treble", 4000.0, 16000.0, 3.0, sample_rate, frame_size),
            ],
            Preset::BassTreble => vec![
                hz_band("bass", 20.0, 280.0, 1.0, sample_rate, frame_size),
                hz_band("treble", 4000.0, 16000.0, 3.0, sample_rate, frame_size),
            ],
        };
        Self::new(bands, frame_size)
    }

    pub fn bands(&self) -> &[BandDefinition] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn labels(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.label.as_str()).collect()
    }

    /// Index of the first band whose bin range contains `bin`.
    pub fn band_for_bin(&self, bin: usize) -> Option<usize> {
        self.bands.iter().position(|b| b.bins().contains(&bin))
    }
}

pub fn bin_width_hz(sample_rate: u32, frame_size: usize) -> f32 {
    sample_rate as f32 / frame_size as f32
}

fn hz_to_bin(hz: f32, sample_rate: u32, frame_size: usize) -> usize {
    (hz / bin_width_hz(sample_rate, frame_size)).round() as usize
}

fn hz_band(
    label: &str,
    low_hz: f32,
    high_hz: f32,
    gain: f32,
    sample_rate: u32,
    frame_size: usize,
) -> BandDefinition {
    let last = (frame_size / 2).saturating_sub(1).max(1);
    // Never start on the DC bin.
    let start = hz_to_bin(low_hz, sample_rate, frame_size).clamp(1, last);
    let end = hz_to_bin(high_hz, sample_rate, frame_size)
        .saturating_sub(1)
        .clamp(start, last);
    BandDefinition::new(label, start, end, gain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_band_preset_at_44k() {
        let table = BandTable::preset(Preset::FiveBand, 44100, 1024).unwrap();
        assert_eq!(
            table.labels(),
            vec!["sub-bass", "bass", "low-mids", "high-mids", "treble"]
        );
        let gains: Vec<f32> = table.bands().iter().map(|b| b.gain).collect();
        assert_eq!(gains, vec![0.8, 1.0, 1.2, 1.8, 3.0]);

        // 43 Hz bins: 20-90 Hz -> 1..=1, 90-280 Hz -> 2..=6
        assert_eq!(table.bands()[0].bins(), 1..=1);
        assert_eq!(table.bands()[1].bins(), 2..=6);
        assert_eq!(table.bands()[2].bins(), 7..=22);
        assert!(table.bands()[4].bin_end < 512);
    }

    #[test]
    fn preset_bands_are_ordered_and_disjoint() {
        let table = BandTable::preset(Preset::FiveBand, 44100, 1024).unwrap();
        for pair in table.bands().windows(2) {
            assert!(pair[0].bin_end < pair[1].bin_start);
        }
    }

    #[test]
    fn bass_treble_preset() {
        let table = BandTable::preset(Preset::BassTreble, 44100, 1024).unwrap();
        assert_eq!(table.labels(), vec!["bass", "treble"]);
    }

    #[test]
    fn hundred_hz_lands_in_bass_region() {
        let table = BandTable::preset(Preset::FiveBand, 44100, 1024).unwrap();
        let bin = (100.0 / bin_width_hz(44100, 1024)).round() as usize;
        assert_eq!(table.band_for_bin(bin), Some(1));
    }

    #[test]
    fn rejects_bins_in_upper_half() {
        let err = BandTable::new(vec![BandDefinition::new("air", 500, 512, 1.0)], 1024)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(BandTable::new(vec![BandDefinition::new("x", 10, 9, 1.0)], 1024).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_frames() {
        assert!(BandTable::new(vec![BandDefinition::new("x", 1, 2, 1.0)], 1000).is_err());
    }

    #[test]
    fn overlapping_bands_are_allowed() {
        let table = BandTable::new(
            vec![
                BandDefinition::new("wide", 1, 100, 1.0),
                BandDefinition::new("narrow", 10, 20, 1.0),
            ],
            1024,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn small_frames_still_produce_valid_presets() {
        let table = BandTable::preset(Preset::FiveBand, 44100, 64).unwrap();
        for band in table.bands() {
            assert!(band.bin_start <= band.bin_end);
            assert!(band.bin_end < 32);
        }
    }
}
