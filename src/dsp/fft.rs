use std::sync::Arc;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};

/// One-sided magnitude spectrum of a single series.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Frequency spacing between consecutive bins.
    pub fn resolution_hz(&self) -> f64 {
        match self.frequencies_hz.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }
}

/// FFT planned once for a fixed series length.
///
/// Bin `k` sits at `k * sample_rate / len` for `k` in `0..=len / 2`; the
/// magnitude is the unscaled absolute value of the complex coefficient.
pub struct SpectralEstimator {
    fft: Arc<dyn Fft<f64>>,
    fft_size: usize,
    frequencies_hz: Vec<f64>,
}

impl SpectralEstimator {
    pub fn new(fft_size: usize, sample_rate_hz: f64) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let frequencies_hz = (0..=fft_size / 2)
            .map(|k| k as f64 * sample_rate_hz / fft_size as f64)
            .collect();
        Self {
            fft,
            fft_size,
            frequencies_hz,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Series shorter than the planned size are zero-padded; longer ones are
    /// truncated.
    pub fn compute(&self, series: &[f64]) -> Spectrum {
        let mut buffer: Vec<Complex64> = series
            .iter()
            .take(self.fft_size)
            .map(|&v| Complex64::new(v, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex64::new(0.0, 0.0));
        self.fft.process(&mut buffer);
        let magnitudes = buffer
            .iter()
            .take(self.frequencies_hz.len())
            .map(|c| c.norm())
            .collect();
        Spectrum {
            frequencies_hz: self.frequencies_hz.clone(),
            magnitudes,
        }
    }
}
