//! Small Laplacian spatial filter.
//!
//! The reference is the mean of the four electrodes around the motor hand
//! knob; subtracting it from the two central electrodes suppresses signal
//! common to the whole patch:
//!
//! ```text
//! laplacian[i] = (s2[i] + s3[i] + s4[i] + s5[i]) / 4
//! filtered_a[i] = s0[i] - laplacian[i]
//! filtered_b[i] = s1[i] - laplacian[i]
//! ```
//!
//! Positions follow the channel selection: 0 and 1 are the central
//! electrodes, 2..6 the reference ring.

use crate::error::ConfigError;

/// Number of selected channels the filter reads.
pub const REQUIRED_CHANNELS: usize = 6;

/// The two re-referenced central channels.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredPair {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpatialFilter;

impl SpatialFilter {
    /// Checks the selected channel layout once, before streaming.
    pub fn validate(
        selected_names: &[String],
        reference_channels: &[String; 4],
    ) -> Result<Self, ConfigError> {
        if selected_names.len() < REQUIRED_CHANNELS {
            return Err(ConfigError::TooFewChannels {
                required: REQUIRED_CHANNELS,
                actual: selected_names.len(),
            });
        }
        for (offset, expected) in reference_channels.iter().enumerate() {
            let position = offset + 2;
            if &selected_names[position] != expected {
                return Err(ConfigError::ReferenceChannelMismatch {
                    position,
                    expected: expected.clone(),
                    actual: selected_names[position].clone(),
                });
            }
        }
        Ok(SpatialFilter)
    }

    /// `channels` must hold at least [`REQUIRED_CHANNELS`] equally long series;
    /// [`SpatialFilter::validate`] guarantees that for selected windows.
    pub fn apply(&self, channels: &[Vec<f64>]) -> FilteredPair {
        let reference = laplacian_reference(&channels[2], &channels[3], &channels[4], &channels[5]);
        FilteredPair {
            a: subtract(&channels[0], &reference),
            b: subtract(&channels[1], &reference),
        }
    }
}

pub fn laplacian_reference(s2: &[f64], s3: &[f64], s4: &[f64], s5: &[f64]) -> Vec<f64> {
    s2.iter()
        .zip(s3)
        .zip(s4)
        .zip(s5)
        .map(|(((a, b), c), d)| (a + b + c + d) / 4.0)
        .collect()
}

fn subtract(signal: &[f64], reference: &[f64]) -> Vec<f64> {
    signal.iter().zip(reference).map(|(s, r)| s - r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn refs() -> [String; 4] {
        ["FC1".into(), "FC2".into(), "CP1".into(), "CP2".into()]
    }

    #[test]
    fn identical_channels_cancel_out() {
        let ramp: Vec<f64> = (1..=9).map(f64::from).collect();
        let channels = vec![ramp.clone(); 6];
        let pair = SpatialFilter.apply(&channels);
        assert_eq!(laplacian_reference(&ramp, &ramp, &ramp, &ramp), ramp);
        assert!(pair.a.iter().chain(&pair.b).all(|v| *v == 0.0));
    }

    #[test]
    fn filtered_plus_reference_restores_centre_channels() {
        let mut rng = StdRng::seed_from_u64(42);
        let channels: Vec<Vec<f64>> = (0..8)
            .map(|_| (0..25).map(|_| rng.gen_range(-100.0..100.0)).collect())
            .collect();
        let pair = SpatialFilter.apply(&channels);
        let reference =
            laplacian_reference(&channels[2], &channels[3], &channels[4], &channels[5]);
        for i in 0..25 {
            assert!((pair.a[i] + reference[i] - channels[0][i]).abs() < 1e-9);
            assert!((pair.b[i] + reference[i] - channels[1][i]).abs() < 1e-9);
        }
    }

    #[test]
    fn validate_requires_six_channels_and_reference_order() {
        let short: Vec<String> = ["C3", "C4", "FC1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            SpatialFilter::validate(&short, &refs()).err(),
            Some(ConfigError::TooFewChannels {
                required: 6,
                actual: 3
            })
        );
        let swapped: Vec<String> = ["C3", "C4", "FC2", "FC1", "CP1", "CP2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            SpatialFilter::validate(&swapped, &refs()),
            Err(ConfigError::ReferenceChannelMismatch { position: 2, .. })
        ));
        let good: Vec<String> = ["C3", "C4", "FC1", "FC2", "CP1", "CP2", "Cz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(SpatialFilter::validate(&good, &refs()).is_ok());
    }
}
