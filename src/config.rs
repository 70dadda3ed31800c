use serde::{Deserialize, Serialize};

use crate::dsp::FrequencyBand;
use crate::error::ConfigError;
use crate::queue::OverflowPolicy;

/// Values consumed by one acquisition session. How they are loaded is up to
/// the caller; the binary reads JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling_rate_hz: f64,
    pub window_duration_ms: u64,
    pub offset_duration_ms: u64,
    /// Board channel names, in acquisition order.
    pub channel_names: Vec<String>,
    /// One weight per entry of `channel_names`; zero drops the channel.
    pub channel_weight_mask: Vec<f64>,
    /// Central electrodes moved to positions 0 and 1 after selection.
    pub designated_channels: [String; 2],
    /// Laplacian neighbours expected at positions 2..6 after selection.
    pub reference_channels: [String; 4],
    pub alpha_band_low_hz: f64,
    pub alpha_band_high_hz: f64,
    pub normalization_history_capacity: usize,
    pub classification_border: f64,
    /// Windows fed into the normalization history before anything is published.
    pub warmup_windows: usize,
    pub handoff_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    /// Applies to the outbound queue, and to the window handoff unless
    /// `handoff_overflow_policy` overrides it.
    pub overflow_policy: OverflowPolicy,
    pub handoff_overflow_policy: Option<OverflowPolicy>,
    pub max_consecutive_failures: u32,
    pub idle_poll_ms: u64,
    /// Mains frequency to band-stop before windowing, if any.
    pub notch_hz: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let channel_names = ["C3", "C4", "FC5", "FC1", "FC2", "FC6", "CP5", "CP1", "CP2", "CP6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            sampling_rate_hz: 125.0,
            window_duration_ms: 200,
            offset_duration_ms: 100,
            channel_names,
            channel_weight_mask: vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0],
            designated_channels: ["C3".into(), "C4".into()],
            reference_channels: ["FC1".into(), "FC2".into(), "CP1".into(), "CP2".into()],
            alpha_band_low_hz: FrequencyBand::ALPHA.low_hz,
            alpha_band_high_hz: FrequencyBand::ALPHA.high_hz,
            normalization_history_capacity: 144,
            classification_border: 0.3,
            warmup_windows: 0,
            handoff_queue_capacity: 16,
            outbound_queue_capacity: 64,
            overflow_policy: OverflowPolicy::DropOldest,
            handoff_overflow_policy: None,
            max_consecutive_failures: 50,
            idle_poll_ms: 1,
            notch_hz: None,
        }
    }
}

impl PipelineConfig {
    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    pub fn handoff_policy(&self) -> OverflowPolicy {
        self.handoff_overflow_policy.unwrap_or(self.overflow_policy)
    }

    pub fn band(&self) -> FrequencyBand {
        FrequencyBand::new(self.alpha_band_low_hz, self.alpha_band_high_hz)
    }

    /// Checks everything that does not depend on channel selection.
    /// Selection-dependent checks happen when the signal chain is built.
    pub fn validate(&self) -> Result<WindowGeometry, ConfigError> {
        let geometry = WindowGeometry::derive(self)?;
        if self.channel_weight_mask.len() != self.channel_names.len() {
            return Err(ConfigError::MaskLengthMismatch {
                expected: self.channel_names.len(),
                actual: self.channel_weight_mask.len(),
            });
        }
        let band = self.band();
        if !band.is_valid() {
            return Err(ConfigError::InvalidBand {
                low_hz: band.low_hz,
                high_hz: band.high_hz,
            });
        }
        if self.normalization_history_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("normalization history"));
        }
        if self.handoff_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("window handoff queue"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("outbound queue"));
        }
        if !self.classification_border.is_finite() || self.classification_border < 0.0 {
            return Err(ConfigError::InvalidBorder(self.classification_border));
        }
        if let Some(notch_hz) = self.notch_hz {
            let nyquist_hz = self.sampling_rate_hz / 2.0;
            if !(notch_hz > 0.0 && notch_hz < nyquist_hz) {
                return Err(ConfigError::InvalidNotch {
                    notch_hz,
                    nyquist_hz,
                });
            }
        }
        Ok(geometry)
    }
}

/// Sample counts derived once per session from the configured durations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window_samples: usize,
    pub offset_samples: usize,
}

impl WindowGeometry {
    /// Truncates `duration / sample_period`, so 100 ms at 125 Hz becomes 12
    /// samples (96 ms).
    pub fn derive(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let rate = config.sampling_rate_hz;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(rate));
        }
        let window_samples = duration_to_samples(config.window_duration_ms, rate);
        if window_samples == 0 {
            return Err(ConfigError::EmptyWindow {
                duration_ms: config.window_duration_ms,
                sample_rate_hz: rate,
            });
        }
        let offset_samples = duration_to_samples(config.offset_duration_ms, rate);
        if offset_samples == 0 || offset_samples > window_samples {
            return Err(ConfigError::InvalidOffset {
                offset_samples,
                window_samples,
            });
        }
        Ok(Self {
            window_samples,
            offset_samples,
        })
    }

    pub fn overlap_samples(&self) -> usize {
        self.window_samples - self.offset_samples
    }
}

// ms * Hz / 1000 keeps exact products exact; 0.2 / (1 / 125) does not.
fn duration_to_samples(duration_ms: u64, sample_rate_hz: f64) -> usize {
    (duration_ms as f64 * sample_rate_hz / 1000.0).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_truncates_offset() {
        let geometry = WindowGeometry::derive(&PipelineConfig::default()).unwrap();
        assert_eq!(geometry.window_samples, 25);
        assert_eq!(geometry.offset_samples, 12);
        assert_eq!(geometry.overlap_samples(), 13);
    }

    #[test]
    fn offset_longer_than_window_is_rejected() {
        let config = PipelineConfig {
            offset_duration_ms: 400,
            ..PipelineConfig::default()
        };
        assert_eq!(
            WindowGeometry::derive(&config),
            Err(ConfigError::InvalidOffset {
                offset_samples: 50,
                window_samples: 25
            })
        );
    }

    #[test]
    fn offset_shorter_than_one_sample_is_rejected() {
        let config = PipelineConfig {
            offset_duration_ms: 4,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            WindowGeometry::derive(&config),
            Err(ConfigError::InvalidOffset { offset_samples: 0, .. })
        ));
    }

    #[test]
    fn validate_catches_mask_mismatch_and_bad_rate() {
        let config = PipelineConfig {
            channel_weight_mask: vec![1.0; 3],
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaskLengthMismatch { expected: 10, actual: 3 })
        ));
        let config = PipelineConfig {
            sampling_rate_hz: 0.0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSampleRate(0.0)));
    }

    #[test]
    fn validate_rejects_notch_above_nyquist() {
        let config = PipelineConfig {
            notch_hz: Some(70.0),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNotch { .. })
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "sampling_rate_hz": 250.0, "classification_border": 0.5 }"#)
                .unwrap();
        assert_eq!(config.sampling_rate_hz, 250.0);
        assert_eq!(config.classification_border, 0.5);
        assert_eq!(config.normalization_history_capacity, 144);
        assert_eq!(
            (config.alpha_band_low_hz, config.alpha_band_high_hz),
            (9.0, 15.0)
        );
        let geometry = config.validate().unwrap();
        assert_eq!(geometry.window_samples, 50);
        assert_eq!(geometry.offset_samples, 25);
    }

    #[test]
    fn handoff_policy_falls_back_to_shared_policy() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "overflow_policy": { "kind": "block", "timeout_ms": 20 } }"#,
        )
        .unwrap();
        assert_eq!(config.handoff_policy(), OverflowPolicy::Block { timeout_ms: 20 });
        let config = PipelineConfig {
            handoff_overflow_policy: Some(OverflowPolicy::DropOldest),
            ..config
        };
        assert_eq!(config.handoff_policy(), OverflowPolicy::DropOldest);
        assert_eq!(config.overflow_policy, OverflowPolicy::Block { timeout_ms: 20 });
    }
}
