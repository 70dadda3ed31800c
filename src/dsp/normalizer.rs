use std::collections::VecDeque;

use log::trace;

/// Bounded FIFO of recent raw control values. Owned by one pipeline; never
/// shared between sessions.
#[derive(Clone, Debug)]
pub struct NormalizationHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl NormalizationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }

    /// Mean and population standard deviation of the current contents.
    pub fn stats(&self) -> (f64, f64) {
        if self.values.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|v| {
                let delta = v - mean;
                delta * delta
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }
}

/// Result of normalizing one raw control value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalized {
    pub value: f64,
    pub mean: f64,
    pub std: f64,
}

impl Normalized {
    /// True when the history had no spread and the raw value passed through.
    pub fn is_passthrough(&self) -> bool {
        self.std <= 0.0
    }
}

/// Running z-score over the last `capacity` raw control values.
#[derive(Clone, Debug)]
pub struct ControlSignalNormalizer {
    history: NormalizationHistory,
}

impl ControlSignalNormalizer {
    pub fn new(history: NormalizationHistory) -> Self {
        Self { history }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NormalizationHistory::new(capacity))
    }

    /// Appends `raw` and z-scores it against the updated history. Without
    /// spread (`std == 0`) the raw value is returned unchanged.
    pub fn update(&mut self, raw: f64) -> Normalized {
        self.history.push(raw);
        let (mean, std) = self.history.stats();
        let value = if std > 0.0 {
            (raw - mean) / std
        } else {
            trace!("history has no spread ({} values); passing {raw} through", self.history.len());
            raw
        };
        Normalized { value, mean, std }
    }

    /// Adds to the history without producing a value; used to warm up the
    /// statistics before control output starts.
    pub fn prime(&mut self, raw: f64) {
        self.history.push(raw);
    }

    /// Z-scores every stored value against the current statistics.
    pub fn renormalized_history(&self) -> Vec<f64> {
        let (mean, std) = self.history.stats();
        self.history
            .iter()
            .map(|&v| if std > 0.0 { (v - mean) / std } else { v })
            .collect()
    }

    pub fn history(&self) -> &NormalizationHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn identical_values_pass_through() {
        let mut normalizer = ControlSignalNormalizer::with_capacity(144);
        for _ in 0..144 {
            let out = normalizer.update(3.25);
            assert_eq!(out.std, 0.0);
            assert_eq!(out.value, 3.25);
            assert!(out.is_passthrough());
        }
    }

    #[test]
    fn first_value_passes_through() {
        let mut normalizer = ControlSignalNormalizer::with_capacity(4);
        assert_eq!(normalizer.update(-7.0).value, -7.0);
    }

    #[test]
    fn history_never_exceeds_capacity() {
        let mut normalizer = ControlSignalNormalizer::with_capacity(5);
        for i in 0..12 {
            normalizer.update(i as f64);
            assert!(normalizer.history().len() <= 5);
        }
        let kept: Vec<f64> = normalizer.history().iter().copied().collect();
        assert_eq!(kept, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn full_history_renormalizes_to_zero_mean_unit_std() {
        let k = 144;
        let mut rng = StdRng::seed_from_u64(9);
        let mut normalizer = ControlSignalNormalizer::with_capacity(k);
        for _ in 0..(k + 30) {
            normalizer.update(rng.gen_range(-50.0..80.0));
        }
        let z = normalizer.renormalized_history();
        assert_eq!(z.len(), k);
        let mean = z.iter().sum::<f64>() / k as f64;
        let std = (z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / k as f64).sqrt();
        assert!(mean.abs() < 1e-9, "mean {mean}");
        assert!((std - 1.0).abs() < 1e-9, "std {std}");
    }

    #[test]
    fn latest_value_matches_its_z_score() {
        let mut normalizer = ControlSignalNormalizer::with_capacity(3);
        normalizer.update(1.0);
        normalizer.update(2.0);
        let out = normalizer.update(3.0);
        // mean 2, population std sqrt(2/3)
        assert!((out.mean - 2.0).abs() < 1e-12);
        assert!((out.value - 1.0 / (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(normalizer.renormalized_history().last().copied(), Some(out.value));
    }

    #[test]
    fn priming_fills_history_without_output() {
        let mut normalizer = ControlSignalNormalizer::with_capacity(10);
        normalizer.prime(1.0);
        normalizer.prime(3.0);
        assert_eq!(normalizer.history().len(), 2);
        let out = normalizer.update(2.0);
        assert_eq!(out.value, 0.0);
    }
}
