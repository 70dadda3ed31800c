use std::f64::consts::PI;

/// Second-order band-stop centred on the mains frequency.
///
/// The stop band is [`MainsBandstop::WIDTH_HZ`] wide, so a 50 Hz setting
/// removes roughly 48-52 Hz and leaves the 9-15 Hz control band untouched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MainsBandstop {
    feedforward: [f64; 3],
    feedback: [f64; 2],
}

impl MainsBandstop {
    pub const WIDTH_HZ: f64 = 4.0;

    /// `mains_hz` must lie strictly between 0 and Nyquist; the config
    /// validation enforces that before a session starts.
    pub fn design(mains_hz: f64, sample_rate_hz: f64) -> Self {
        let omega = 2.0 * PI * mains_hz / sample_rate_hz;
        let quality = mains_hz / Self::WIDTH_HZ;
        let alpha = omega.sin() / (2.0 * quality);
        let gain = 1.0 / (1.0 + alpha);
        let cross = -2.0 * omega.cos() * gain;
        Self {
            feedforward: [gain, cross, gain],
            feedback: [cross, (1.0 - alpha) * gain],
        }
    }
}

/// Last two inputs and outputs of one channel.
#[derive(Clone, Copy, Debug, Default)]
struct History {
    inputs: [f64; 2],
    outputs: [f64; 2],
}

impl History {
    fn step(&mut self, filter: &MainsBandstop, input: f64) -> f64 {
        let [b0, b1, b2] = filter.feedforward;
        let [a1, a2] = filter.feedback;
        let output = b0 * input + b1 * self.inputs[0] + b2 * self.inputs[1]
            - a1 * self.outputs[0]
            - a2 * self.outputs[1];
        self.inputs = [input, self.inputs[0]];
        self.outputs = [output, self.outputs[0]];
        output
    }
}

/// Per-channel mains suppression applied sample by sample before windowing.
/// Without a mains frequency it leaves samples untouched.
#[derive(Clone, Debug)]
pub struct Prefilter {
    filter: Option<MainsBandstop>,
    channels: Vec<History>,
}

impl Prefilter {
    pub fn new(channel_count: usize, sample_rate_hz: f64, mains_hz: Option<f64>) -> Self {
        Self {
            filter: mains_hz.map(|hz| MainsBandstop::design(hz, sample_rate_hz)),
            channels: vec![History::default(); channel_count],
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.filter.is_none()
    }

    /// Filters one full-width sample in place.
    pub fn apply(&mut self, sample: &mut [f64]) {
        let Some(filter) = &self.filter else {
            return;
        };
        for (history, value) in self.channels.iter_mut().zip(sample.iter_mut()) {
            *value = history.step(filter, *value);
        }
    }
}
