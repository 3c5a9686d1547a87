use serde::Serialize;

/// Per-band magnitude sums for one PCM frame, in band-table order, before
/// scaling.
pub type RawBands = Vec<f32>;

/// Scaled band values produced from one PCM frame, ready for the consumer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectrumFrame {
    /// Activation that produced this frame (starts at 1).
    pub generation: u64,
    /// Position of this frame within its activation (starts at 0).
    pub sequence: u64,
    pub bands: Vec<f32>,
}

impl SpectrumFrame {
    /// Pair each value with its band label, e.g. for the `bass`/`treble`
    /// named-pair output.
    pub fn named<'a>(&'a self, labels: &[&'a str]) -> Vec<(&'a str, f32)> {
        labels
            .iter()
            .copied()
            .zip(self.bands.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_pairs_follow_table_order() {
        let frame = SpectrumFrame {
            generation: 1,
            sequence: 0,
            bands: vec![2.5, 0.25],
        };
        assert_eq!(
            frame.named(&["bass", "treble"]),
            vec![("bass", 2.5), ("treble", 0.25)]
        );
    }

    #[test]
    fn serializes_as_json_object() {
        let frame = SpectrumFrame {
            generation: 2,
            sequence: 7,
            bands: vec![1.0],
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"generation":2,"sequence":7,"bands":[1.0]}"#);
    }
}
