use super::bands::BandTable;

/// Log-compresses raw band sums and applies each band's fixed gain.
#[derive(Clone, Debug)]
pub struct BandScaler {
    gains: Vec<f32>,
}

impl BandScaler {
    pub fn new(table: &BandTable) -> Self {
        Self {
            gains: table.bands().iter().map(|b| b.gain).collect(),
        }
    }

    /// `log10(v + 1) * gain`; silence maps to exactly 0.
    pub fn scale_value(raw: f32, gain: f32) -> f32 {
        (raw.max(0.0) + 1.0).log10() * gain
    }

    pub fn scale(&self, raw: &[f32]) -> Vec<f32> {
        debug_assert_eq!(raw.len(), self.gains.len());
        raw.iter()
            .zip(&self.gains)
            .map(|(&v, &gain)| Self::scale_value(v, gain))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bands::{BandTable, Preset};

    #[test]
    fn silence_scales_to_zero() {
        let table = BandTable::preset(Preset::FiveBand, 44100, 1024).unwrap();
        let scaler = BandScaler::new(&table);
        assert_eq!(scaler.scale(&[0.0; 5]), vec![0.0; 5]);
    }

    #[test]
    fn applies_gain_after_log() {
        assert!((BandScaler::scale_value(9.0, 2.0) - 2.0).abs() < 1e-6);
        assert!((BandScaler::scale_value(99.0, 0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn monotonic_for_fixed_gain() {
        let mut prev = BandScaler::scale_value(0.0, 1.8);
        let mut v = 0.0f32;
        while v < 10_000.0 {
            v = v * 1.5 + 0.01;
            let next = BandScaler::scale_value(v, 1.8);
            assert!(next >= prev, "{} < {} at {}", next, prev, v);
            prev = next;
        }
    }

    #[test]
    fn keeps_table_order() {
        let table = BandTable::preset(Preset::BassTreble, 44100, 1024).unwrap();
        let scaler = BandScaler::new(&table);
        let scaled = scaler.scale(&[9.0, 9.0]);
        assert!((scaled[0] - 1.0).abs() < 1e-6);
        assert!((scaled[1] - 3.0).abs() < 1e-6);
    }
}
