//! Band power by trapezoidal integration of a magnitude spectrum.
//!
//! Only bins whose frequency lies inside the inclusive band take part. With
//! fewer than two such bins there is nothing to integrate and the band power
//! is defined as 0.0.

use log::trace;

use crate::dsp::Spectrum;

/// Inclusive frequency interval in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    /// Upper alpha / mu band used for cursor control: 9-15 Hz.
    pub const ALPHA: FrequencyBand = FrequencyBand {
        low_hz: 9.0,
        high_hz: 15.0,
    };

    pub const fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }

    pub fn is_valid(&self) -> bool {
        self.low_hz.is_finite()
            && self.high_hz.is_finite()
            && self.low_hz >= 0.0
            && self.high_hz > self.low_hz
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }
}

pub fn band_power(spectrum: &Spectrum, band: FrequencyBand) -> f64 {
    integrate_band(&spectrum.magnitudes, &spectrum.frequencies_hz, band)
}

pub fn integrate_band(magnitudes: &[f64], frequencies_hz: &[f64], band: FrequencyBand) -> f64 {
    let (ys, xs): (Vec<f64>, Vec<f64>) = magnitudes
        .iter()
        .zip(frequencies_hz)
        .filter(|(_, f)| band.contains(**f))
        .map(|(&m, &f)| (m, f))
        .unzip();
    if xs.len() < 2 {
        trace!(
            "band [{}, {}] Hz covers {} bin(s); band power set to 0",
            band.low_hz,
            band.high_hz,
            xs.len()
        );
        return 0.0;
    }
    trapezoid(&ys, &xs)
}

fn trapezoid(ys: &[f64], xs: &[f64]) -> f64 {
    ys.windows(2)
        .zip(xs.windows(2))
        .map(|(y, x)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}
