use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::{PipelineConfig, WindowGeometry};
use crate::dsp::bandpower::{band_power, FrequencyBand};
use crate::dsp::buffer::{Window, WindowAssembler};
use crate::dsp::dispatch::Dispatcher;
use crate::dsp::fft::SpectralEstimator;
use crate::dsp::lifecycle::{idle_wait, FaultTracker, StopToken};
use crate::dsp::normalizer::ControlSignalNormalizer;
use crate::dsp::prefilter::Prefilter;
use crate::dsp::selector::ChannelSelection;
use crate::dsp::source::{SampleSource, SourcePoll};
use crate::dsp::spatial::SpatialFilter;
use crate::error::{AcquisitionError, ConfigError};
use crate::queue::BoundedQueue;
use crate::types::ControlOutput;

/// Acquisition-side half: optional prefilter followed by window assembly.
/// Lives on whichever thread polls the source.
pub struct SampleFrontend {
    prefilter: Prefilter,
    assembler: WindowAssembler,
}

impl SampleFrontend {
    pub fn new(config: &PipelineConfig, geometry: WindowGeometry) -> Self {
        Self {
            prefilter: Prefilter::new(
                config.channel_count(),
                config.sampling_rate_hz,
                config.notch_hz,
            ),
            assembler: WindowAssembler::new(
                config.channel_names.clone(),
                config.sampling_rate_hz,
                geometry,
            ),
        }
    }

    /// A sample of the wrong width is rejected before it can touch the
    /// prefilter state.
    pub fn ingest(&mut self, mut sample: Vec<f64>) -> Result<Option<Window>, AcquisitionError> {
        self.assembler.check_width(&sample)?;
        self.prefilter.apply(&mut sample);
        self.assembler.ingest(&sample)
    }

    pub fn assembler(&self) -> &WindowAssembler {
        &self.assembler
    }
}

/// Intermediate values of one window, for inspection and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowFeatures {
    pub band_power_a: f64,
    pub band_power_b: f64,
}

impl WindowFeatures {
    /// Second series minus first.
    pub fn control_value(&self) -> f64 {
        self.band_power_b - self.band_power_a
    }
}

/// Per-window numeric chain: selection, Laplacian, spectrum, band power,
/// normalization, dispatch. All channel-layout checks run in [`SignalChain::new`].
pub struct SignalChain {
    selection: ChannelSelection,
    spatial: SpatialFilter,
    estimator: SpectralEstimator,
    band: FrequencyBand,
    normalizer: ControlSignalNormalizer,
    dispatcher: Dispatcher,
    warmup_remaining: usize,
    windows_processed: u64,
    warmup_windows: u64,
}

impl SignalChain {
    pub fn new(
        config: &PipelineConfig,
        geometry: WindowGeometry,
        outbound: Arc<BoundedQueue<ControlOutput>>,
    ) -> Result<Self, ConfigError> {
        let selection = ChannelSelection::plan(
            &config.channel_names,
            &config.channel_weight_mask,
            &config.designated_channels,
        )?;
        selection.require_designated(&config.designated_channels)?;
        let spatial = SpatialFilter::validate(selection.names(), &config.reference_channels)?;
        let band = config.band();
        if !band.is_valid() {
            return Err(ConfigError::InvalidBand {
                low_hz: band.low_hz,
                high_hz: band.high_hz,
            });
        }
        debug!("selected channels: {:?}", selection.names());
        Ok(Self {
            selection,
            spatial,
            estimator: SpectralEstimator::new(geometry.window_samples, config.sampling_rate_hz),
            band,
            normalizer: ControlSignalNormalizer::with_capacity(config.normalization_history_capacity),
            dispatcher: Dispatcher::new(outbound, config.classification_border),
            warmup_remaining: config.warmup_windows,
            windows_processed: 0,
            warmup_windows: 0,
        })
    }

    /// Band powers of the two spatially filtered channels.
    pub fn features(&self, window: &Window) -> WindowFeatures {
        let selected = self.selection.apply(window);
        let pair = self.spatial.apply(&selected.samples);
        WindowFeatures {
            band_power_a: band_power(&self.estimator.compute(&pair.a), self.band),
            band_power_b: band_power(&self.estimator.compute(&pair.b), self.band),
        }
    }

    /// Runs one full-width window through the chain. Returns `None` while the
    /// normalization history is still warming up.
    pub fn process(&mut self, window: &Window) -> Option<ControlOutput> {
        let raw = self.features(window).control_value();
        self.windows_processed += 1;
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.warmup_windows += 1;
            self.normalizer.prime(raw);
            if self.warmup_remaining == 0 {
                info!("normalization warm-up complete after {} windows", self.warmup_windows);
            }
            return None;
        }
        let normalized = self.normalizer.update(raw);
        Some(self.dispatcher.publish(window.index, raw, normalized.value))
    }

    pub fn selection(&self) -> &ChannelSelection {
        &self.selection
    }

    pub fn normalizer(&self) -> &ControlSignalNormalizer {
        &self.normalizer
    }

    pub fn windows_processed(&self) -> u64 {
        self.windows_processed
    }

    pub fn warmup_windows(&self) -> u64 {
        self.warmup_windows
    }

    pub fn outbound(&self) -> &Arc<BoundedQueue<ControlOutput>> {
        self.dispatcher.outbound()
    }
}

/// What a single [`Pipeline::pump_once`] call did.
#[derive(Clone, Debug, PartialEq)]
pub enum Pumped {
    NoDataYet,
    /// A sample was buffered without completing a window.
    Buffered,
    /// A window completed but only fed the warm-up history.
    WarmingUp,
    Published(ControlOutput),
    Exhausted,
}

/// Source, window assembly and signal chain driven inline on one thread.
pub struct Pipeline<S: SampleSource> {
    source: S,
    frontend: SampleFrontend,
    chain: SignalChain,
    channel_count: usize,
    faults: FaultTracker,
    idle: Duration,
    released: bool,
}

impl<S: SampleSource> Pipeline<S> {
    pub fn new(config: &PipelineConfig, source: S) -> Result<Self, ConfigError> {
        let geometry = config.validate()?;
        let outbound = Arc::new(BoundedQueue::new(
            config.outbound_queue_capacity,
            config.overflow_policy,
        ));
        Ok(Self {
            source,
            frontend: SampleFrontend::new(config, geometry),
            chain: SignalChain::new(config, geometry, outbound)?,
            channel_count: config.channel_count(),
            faults: FaultTracker::new(config.max_consecutive_failures),
            idle: Duration::from_millis(config.idle_poll_ms),
            released: false,
        })
    }

    pub fn pump_once(&mut self) -> Result<Pumped, AcquisitionError> {
        let sample = match self.source.next_sample(self.channel_count)? {
            SourcePoll::Sample(sample) => sample,
            SourcePoll::NoDataYet => return Ok(Pumped::NoDataYet),
            SourcePoll::Exhausted => return Ok(Pumped::Exhausted),
        };
        let Some(window) = self.frontend.ingest(sample)? else {
            return Ok(Pumped::Buffered);
        };
        Ok(match self.chain.process(&window) {
            Some(output) => Pumped::Published(output),
            None => Pumped::WarmingUp,
        })
    }

    /// Pumps until the source is exhausted or `stop` is raised and returns
    /// every published output. Transient faults are logged and skipped until
    /// `max_consecutive_failures` of them arrive in a row, which is fatal.
    /// The source is released on every exit path.
    pub fn run_to_end(&mut self, stop: &StopToken) -> Result<Vec<ControlOutput>, AcquisitionError> {
        let mut outputs = Vec::new();
        let result = loop {
            if stop.is_stopped() {
                break Ok(());
            }
            let fatal = match self.pump_once() {
                Ok(Pumped::Exhausted) => break Ok(()),
                Ok(Pumped::NoDataYet) => {
                    idle_wait(self.idle);
                    None
                }
                Ok(pumped) => {
                    self.faults.success();
                    if let Pumped::Published(output) = pumped {
                        outputs.push(output);
                    }
                    None
                }
                Err(AcquisitionError::Transient(reason)) => self.faults.transient(&reason),
                Err(AcquisitionError::Fatal(reason)) => Some(reason),
            };
            if let Some(reason) = fatal {
                error!("acquisition failed, stopping pipeline: {reason}");
                break Err(AcquisitionError::Fatal(reason));
            }
        };
        self.release();
        result.map(|()| outputs)
    }

    /// Transient faults seen by [`Pipeline::run_to_end`] so far.
    pub fn transient_faults(&self) -> u64 {
        self.faults.total()
    }

    /// Releases the source once; later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.source.release() {
            warn!("source release failed: {err}");
        }
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn frontend(&self) -> &SampleFrontend {
        &self.frontend
    }

    pub fn outputs(&self) -> &Arc<BoundedQueue<ControlOutput>> {
        self.chain.outbound()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::source::ManualSource;
    use crate::queue::OverflowPolicy;
    use crate::types::ControlDecision;
    use std::f64::consts::PI;

    fn six_channel_config() -> PipelineConfig {
        PipelineConfig {
            channel_names: ["C3", "C4", "FC1", "FC2", "CP1", "CP2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            channel_weight_mask: vec![1.0; 6],
            ..PipelineConfig::default()
        }
    }

    /// 10 Hz rhythm on one centre channel, quiet elsewhere.
    fn lateralized(n: usize, loud: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let mu = (2.0 * PI * 10.0 * i as f64 / 125.0).sin();
                (0..6).map(|ch| if ch == loud { 10.0 * mu } else { 0.0 }).collect()
            })
            .collect()
    }

    #[test]
    fn chain_rejects_layout_without_reference_ring() {
        let config = PipelineConfig {
            channel_weight_mask: vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            ..PipelineConfig::default()
        };
        let geometry = config.validate().unwrap();
        let outbound = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        assert!(matches!(
            SignalChain::new(&config, geometry, outbound),
            Err(ConfigError::TooFewChannels { required: 6, actual: 5 })
        ));
    }

    #[test]
    fn control_value_sign_follows_lateralized_power() {
        let config = six_channel_config();
        let geometry = config.validate().unwrap();
        let outbound = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        let chain = SignalChain::new(&config, geometry, outbound).unwrap();
        let window_from = |rows: Vec<Vec<f64>>| Window {
            index: 0,
            end_sample: 25,
            sample_rate_hz: 125.0,
            channel_labels: config.channel_names.clone().into(),
            samples: (0..6).map(|ch| rows.iter().map(|r| r[ch]).collect()).collect(),
        };
        let left = chain.features(&window_from(lateralized(25, 0)));
        let right = chain.features(&window_from(lateralized(25, 1)));
        assert!(left.control_value() < 0.0);
        assert!(right.control_value() > 0.0);
    }

    #[test]
    fn warmup_windows_are_not_published() {
        let config = PipelineConfig {
            warmup_windows: 2,
            ..six_channel_config()
        };
        let samples = lateralized(25 + 12 * 3, 1);
        let mut pipeline = Pipeline::new(&config, ManualSource::new(samples)).unwrap();
        let outputs = pipeline.run_to_end(&StopToken::new()).unwrap();
        assert_eq!(pipeline.chain().windows_processed(), 4);
        assert_eq!(pipeline.chain().warmup_windows(), 2);
        let indices: Vec<u64> = outputs.iter().map(|o| o.window_index).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(pipeline.chain().normalizer().history().len(), 4);
    }

    #[test]
    fn inline_pipeline_publishes_in_window_order() {
        let config = six_channel_config();
        let mut samples = lateralized(61, 1);
        samples.extend(lateralized(60, 0));
        let source = ManualSource::new(samples);
        let releases = source.release_counter();
        let mut pipeline = Pipeline::new(&config, source).unwrap();
        let outputs = pipeline.run_to_end(&StopToken::new()).unwrap();
        pipeline.release();
        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
        // 121 samples: windows end at 25, 37, ..., 121
        assert_eq!(outputs.len(), 9);
        for (expected, output) in outputs.iter().enumerate() {
            assert_eq!(output.window_index, expected as u64);
        }
        assert_eq!(outputs.last().map(|o| o.decision), Some(ControlDecision::Low));
        let queued: Vec<u64> = std::iter::from_fn(|| pipeline.outputs().try_pop())
            .map(|o| o.window_index)
            .collect();
        assert_eq!(queued, (0..9).collect::<Vec<u64>>());
    }

    fn transient(reason: &str) -> Result<SourcePoll, AcquisitionError> {
        Err(AcquisitionError::Transient(reason.into()))
    }

    #[test]
    fn consecutive_transients_past_the_limit_are_fatal() {
        let config = PipelineConfig {
            max_consecutive_failures: 3,
            ..six_channel_config()
        };
        let source = ManualSource::scripted((0..100).map(|_| transient("crc mismatch")));
        let releases = source.release_counter();
        let mut pipeline = Pipeline::new(&config, source).unwrap();
        match pipeline.run_to_end(&StopToken::new()) {
            Err(AcquisitionError::Fatal(reason)) => {
                assert!(reason.starts_with("3 consecutive"), "{reason}")
            }
            other => panic!("expected a fatal error, got {other:?}"),
        }
        assert_eq!(pipeline.transient_faults(), 3);
        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn successful_samples_reset_the_failure_run() {
        let config = PipelineConfig {
            max_consecutive_failures: 2,
            ..six_channel_config()
        };
        let script = (0..40).flat_map(|_| [transient("hiccup"), Ok(SourcePoll::Sample(vec![0.0; 6]))]);
        let mut pipeline = Pipeline::new(&config, ManualSource::scripted(script)).unwrap();
        let outputs = pipeline.run_to_end(&StopToken::new()).unwrap();
        assert_eq!(pipeline.transient_faults(), 40);
        assert_eq!(pipeline.frontend().assembler().samples_seen(), 40);
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn raised_stop_token_ends_the_run_and_releases() {
        let source = ManualSource::new(lateralized(200, 0));
        let releases = source.release_counter();
        let mut pipeline = Pipeline::new(&six_channel_config(), source).unwrap();
        let stop = StopToken::new();
        stop.stop();
        let outputs = pipeline.run_to_end(&stop).unwrap();
        assert!(outputs.is_empty());
        assert_eq!(pipeline.frontend().assembler().samples_seen(), 0);
        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_sample_leaves_notch_state_untouched() {
        let config = PipelineConfig {
            channel_names: vec!["C3".into(), "C4".into(), "Cz".into()],
            channel_weight_mask: vec![1.0; 3],
            notch_hz: Some(50.0),
            ..PipelineConfig::default()
        };
        let geometry = config.validate().unwrap();
        let ramp: Vec<Vec<f64>> = (0..25).map(|n| vec![n as f64, -(n as f64), 1.0]).collect();

        let mut clean = SampleFrontend::new(&config, geometry);
        let mut disturbed = SampleFrontend::new(&config, geometry);
        assert!(disturbed.ingest(vec![1000.0, 1000.0]).is_err());

        let mut expected = None;
        let mut actual = None;
        for sample in ramp {
            expected = clean.ingest(sample.clone()).unwrap().or(expected);
            actual = disturbed.ingest(sample).unwrap().or(actual);
        }
        assert_eq!(disturbed.assembler().samples_seen(), 25);
        let (expected, actual) = (expected.unwrap(), actual.unwrap());
        assert_eq!(actual.samples, expected.samples);
    }
}
