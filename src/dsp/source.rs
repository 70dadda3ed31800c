use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AcquisitionError;

/// One reading per channel at one acquisition tick.
pub type Sample = Vec<f64>;

/// Outcome of polling a source once.
#[derive(Clone, Debug, PartialEq)]
pub enum SourcePoll {
    Sample(Sample),
    NoDataYet,
    /// A finite source (recording, script) has nothing left.
    Exhausted,
}

/// Something that yields multi-channel samples at a roughly fixed rate.
pub trait SampleSource {
    fn next_sample(&mut self, channel_count: usize) -> Result<SourcePoll, AcquisitionError>;

    /// Releases the underlying device. Must be safe to call more than once.
    fn release(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }
}

/// Scripted in-memory source for tests and deterministic playback.
pub struct ManualSource {
    script: VecDeque<Result<SourcePoll, AcquisitionError>>,
    releases: Arc<AtomicUsize>,
}

impl ManualSource {
    /// Yields each sample in turn, then reports exhaustion.
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self::scripted(samples.into_iter().map(|s| Ok(SourcePoll::Sample(s))))
    }

    pub fn scripted(
        script: impl IntoIterator<Item = Result<SourcePoll, AcquisitionError>>,
    ) -> Self {
        Self {
            script: script.into_iter().collect(),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `release` calls.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl SampleSource for ManualSource {
    fn next_sample(&mut self, _channel_count: usize) -> Result<SourcePoll, AcquisitionError> {
        self.script.pop_front().unwrap_or(Ok(SourcePoll::Exhausted))
    }

    fn release(&mut self) -> Result<(), AcquisitionError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays back a recorded session (channels x samples).
pub struct ReplaySource {
    channels: Vec<Vec<f64>>,
    cursor: usize,
    sample_period: Duration,
    paced: bool,
    next_due: Option<Instant>,
}

impl ReplaySource {
    pub fn new(channels: Vec<Vec<f64>>, sample_rate_hz: f64) -> Self {
        Self {
            channels,
            cursor: 0,
            sample_period: Duration::from_secs_f64(1.0 / sample_rate_hz.max(f64::MIN_POSITIVE)),
            paced: false,
            next_due: None,
        }
    }

    /// Releases samples no faster than the nominal sample rate.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleSource for ReplaySource {
    fn next_sample(&mut self, channel_count: usize) -> Result<SourcePoll, AcquisitionError> {
        if self.cursor >= self.len() {
            return Ok(SourcePoll::Exhausted);
        }
        if self.channels.len() < channel_count {
            return Err(AcquisitionError::Fatal(format!(
                "recording has {} channels, session expects {channel_count}",
                self.channels.len()
            )));
        }
        if self.paced {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if now < due {
                return Ok(SourcePoll::NoDataYet);
            }
            self.next_due = Some(due + self.sample_period);
        }
        let sample = self
            .channels
            .iter()
            .take(channel_count)
            .map(|channel| channel[self.cursor])
            .collect();
        self.cursor += 1;
        Ok(SourcePoll::Sample(sample))
    }
}

/// Synthetic motor-imagery stream. Every channel carries noise plus a 12 Hz
/// rhythm; the rhythm's power alternates between the two designated channels
/// every `phase_seconds`, so the control value swings both ways.
pub struct SimulatedSource {
    sample_rate_hz: f64,
    designated: [usize; 2],
    phase_seconds: f64,
    rng: StdRng,
    tick: u64,
    started_at: Option<Instant>,
}

impl SimulatedSource {
    pub fn new(sample_rate_hz: f64, designated: [usize; 2], seed: u64) -> Self {
        Self {
            sample_rate_hz,
            designated,
            phase_seconds: 3.0,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            started_at: None,
        }
    }

    pub fn with_phase_seconds(mut self, phase_seconds: f64) -> Self {
        self.phase_seconds = phase_seconds.max(0.1);
        self
    }

    fn synthesize(&mut self, channel_count: usize) -> Sample {
        let t = self.tick as f64 / self.sample_rate_hz;
        let left_active = ((t / self.phase_seconds) as u64) % 2 == 0;
        let mu = (2.0 * PI * 12.0 * t).sin();
        (0..channel_count)
            .map(|ch| {
                let noise: f64 = self.rng.gen_range(-2.0..2.0);
                let gain = if ch == self.designated[0] {
                    if left_active { 20.0 } else { 4.0 }
                } else if ch == self.designated[1] {
                    if left_active { 4.0 } else { 20.0 }
                } else {
                    2.0
                };
                gain * mu + noise
            })
            .collect()
    }
}

impl SampleSource for SimulatedSource {
    fn next_sample(&mut self, channel_count: usize) -> Result<SourcePoll, AcquisitionError> {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let due = started_at + Duration::from_secs_f64(self.tick as f64 / self.sample_rate_hz);
        if Instant::now() < due {
            return Ok(SourcePoll::NoDataYet);
        }
        let sample = self.synthesize(channel_count);
        self.tick += 1;
        Ok(SourcePoll::Sample(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_exhausts_after_script() {
        let mut source = ManualSource::scripted(vec![
            Ok(SourcePoll::NoDataYet),
            Err(AcquisitionError::Transient("glitch".into())),
            Ok(SourcePoll::Sample(vec![1.0, 2.0])),
        ]);
        assert_eq!(source.next_sample(2), Ok(SourcePoll::NoDataYet));
        assert!(source.next_sample(2).is_err());
        assert_eq!(source.next_sample(2), Ok(SourcePoll::Sample(vec![1.0, 2.0])));
        assert_eq!(source.next_sample(2), Ok(SourcePoll::Exhausted));
    }

    #[test]
    fn replay_yields_columns_in_order() {
        let mut source = ReplaySource::new(vec![vec![1.0, 2.0], vec![10.0, 20.0]], 125.0);
        assert_eq!(source.next_sample(2), Ok(SourcePoll::Sample(vec![1.0, 10.0])));
        assert_eq!(source.next_sample(2), Ok(SourcePoll::Sample(vec![2.0, 20.0])));
        assert_eq!(source.next_sample(2), Ok(SourcePoll::Exhausted));
    }

    #[test]
    fn replay_with_too_few_channels_is_fatal() {
        let mut source = ReplaySource::new(vec![vec![1.0]], 125.0);
        assert!(matches!(
            source.next_sample(6),
            Err(AcquisitionError::Fatal(_))
        ));
    }

    #[test]
    fn paced_replay_holds_back_early_polls() {
        let mut source = ReplaySource::new(vec![vec![1.0, 2.0, 3.0]], 1.0).paced();
        assert!(matches!(source.next_sample(1), Ok(SourcePoll::Sample(_))));
        assert_eq!(source.next_sample(1), Ok(SourcePoll::NoDataYet));
    }

    #[test]
    fn simulated_source_emits_requested_width() {
        let mut source = SimulatedSource::new(125.0, [0, 1], 7);
        match source.next_sample(6) {
            Ok(SourcePoll::Sample(sample)) => assert_eq!(sample.len(), 6),
            other => panic!("unexpected poll {other:?}"),
        }
    }
}
