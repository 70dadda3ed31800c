use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::WindowGeometry;
use crate::error::AcquisitionError;

/// Fixed-capacity ring of recent samples for one channel.
#[derive(Clone, Debug)]
pub struct ChannelBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl ChannelBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest once full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-to-newest copy of the contents.
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Immutable multi-channel snapshot taken at an emission instant.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    /// Zero-based emission order within the session.
    pub index: u64,
    /// Total samples ingested when this window was emitted.
    pub end_sample: u64,
    pub sample_rate_hz: f64,
    pub channel_labels: Arc<[String]>,
    pub samples: Vec<Vec<f64>>, // channels x samples
}

impl Window {
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblerPhase {
    /// Filling the first window.
    Priming,
    /// Emitting every `offset_samples`.
    Sliding,
}

/// Turns a sample stream into overlapping windows.
///
/// The first window is emitted at the `window_samples`-th sample and every
/// following one `offset_samples` later, so consecutive windows share
/// `window_samples - offset_samples` samples.
pub struct WindowAssembler {
    buffers: Vec<ChannelBuffer>,
    channel_labels: Arc<[String]>,
    sample_rate_hz: f64,
    geometry: WindowGeometry,
    phase: AssemblerPhase,
    counter: usize,
    samples_seen: u64,
    windows_emitted: u64,
}

impl WindowAssembler {
    pub fn new(channel_labels: Vec<String>, sample_rate_hz: f64, geometry: WindowGeometry) -> Self {
        let buffers = channel_labels
            .iter()
            .map(|_| ChannelBuffer::new(geometry.window_samples))
            .collect();
        Self {
            buffers,
            channel_labels: channel_labels.into(),
            sample_rate_hz,
            geometry,
            phase: AssemblerPhase::Priming,
            counter: 0,
            samples_seen: 0,
            windows_emitted: 0,
        }
    }

    /// Pushes one value per channel. A sample of the wrong width is rejected
    /// as a transient fault and not counted.
    pub fn ingest(&mut self, sample: &[f64]) -> Result<Option<Window>, AcquisitionError> {
        self.check_width(sample)?;
        for (buffer, &value) in self.buffers.iter_mut().zip(sample) {
            buffer.push(value);
        }
        self.counter += 1;
        self.samples_seen += 1;

        let due = match self.phase {
            AssemblerPhase::Priming => self.counter == self.geometry.window_samples,
            AssemblerPhase::Sliding => self.counter == self.geometry.offset_samples,
        };
        if !due {
            return Ok(None);
        }
        self.counter = 0;
        self.phase = AssemblerPhase::Sliding;
        Ok(Some(self.snapshot()))
    }

    /// Rejects a sample whose width differs from the channel count.
    pub fn check_width(&self, sample: &[f64]) -> Result<(), AcquisitionError> {
        if sample.len() == self.buffers.len() {
            return Ok(());
        }
        Err(AcquisitionError::Transient(format!(
            "sample has {} channels, expected {}",
            sample.len(),
            self.buffers.len()
        )))
    }

    pub fn phase(&self) -> AssemblerPhase {
        self.phase
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    pub fn buffers(&self) -> &[ChannelBuffer] {
        &self.buffers
    }

    fn snapshot(&mut self) -> Window {
        let window = Window {
            index: self.windows_emitted,
            end_sample: self.samples_seen,
            sample_rate_hz: self.sample_rate_hz,
            channel_labels: Arc::clone(&self.channel_labels),
            samples: self.buffers.iter().map(ChannelBuffer::to_vec).collect(),
        };
        self.windows_emitted += 1;
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(channels: usize) -> WindowAssembler {
        let labels = (0..channels).map(|i| format!("ch{i}")).collect();
        WindowAssembler::new(
            labels,
            125.0,
            WindowGeometry {
                window_samples: 25,
                offset_samples: 12,
            },
        )
    }

    #[test]
    fn ring_holds_min_of_seen_and_capacity() {
        let mut buffer = ChannelBuffer::new(4);
        for i in 0..10 {
            buffer.push(i as f64);
            assert_eq!(buffer.len(), (i + 1).min(4));
        }
        assert_eq!(buffer.to_vec(), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn windows_emit_at_25_37_49() {
        let mut assembler = assembler(2);
        let mut emitted_at = Vec::new();
        for n in 1..=61u64 {
            let v = n as f64;
            if let Some(window) = assembler.ingest(&[v, -v]).unwrap() {
                assert_eq!(window.end_sample, n);
                emitted_at.push(n);
            }
        }
        assert_eq!(emitted_at, vec![25, 37, 49, 61]);
        assert_eq!(assembler.phase(), AssemblerPhase::Sliding);
    }

    #[test]
    fn consecutive_windows_overlap_by_13_samples() {
        let mut assembler = assembler(1);
        let mut windows = Vec::new();
        for n in 1..=49u64 {
            if let Some(window) = assembler.ingest(&[n as f64]).unwrap() {
                windows.push(window);
            }
        }
        assert_eq!(windows.len(), 3);
        for pair in windows.windows(2) {
            let (prev, next) = (&pair[0].samples[0], &pair[1].samples[0]);
            assert_eq!(next.len(), 25);
            assert_eq!(&next[..13], &prev[12..]);
            let end = pair[1].end_sample;
            let newest: Vec<f64> = ((end - 11)..=end).map(|n| n as f64).collect();
            assert_eq!(&next[13..], newest.as_slice());
        }
        assert_eq!(windows[2].index, 2);
    }

    #[test]
    fn wrong_width_sample_is_not_counted() {
        let mut assembler = assembler(2);
        assert!(assembler.ingest(&[1.0]).is_err());
        assert_eq!(assembler.samples_seen(), 0);
        assert!(assembler.buffers().iter().all(ChannelBuffer::is_empty));
    }
}
