use thiserror::Error;

/// Problems detected once at session setup, before any sample is read.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be greater than zero, got {0}")]
    InvalidSampleRate(f64),
    #[error("window of {duration_ms} ms holds no samples at {sample_rate_hz} Hz")]
    EmptyWindow { duration_ms: u64, sample_rate_hz: f64 },
    #[error("offset must be between 1 and {window_samples} samples, got {offset_samples}")]
    InvalidOffset {
        offset_samples: usize,
        window_samples: usize,
    },
    #[error("channel weight mask has {actual} entries but {expected} channel names are configured")]
    MaskLengthMismatch { expected: usize, actual: usize },
    #[error("channel `{0}` is required for spatial filtering but is not selected")]
    MissingDesignatedChannel(String),
    #[error("spatial filtering needs at least {required} selected channels, got {actual}")]
    TooFewChannels { required: usize, actual: usize },
    #[error("selected channel at position {position} is `{actual}`, expected reference channel `{expected}`")]
    ReferenceChannelMismatch {
        position: usize,
        expected: String,
        actual: String,
    },
    #[error("frequency band [{low_hz}, {high_hz}] Hz is empty or negative")]
    InvalidBand { low_hz: f64, high_hz: f64 },
    #[error("{0} capacity must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("classification border must be finite and non-negative, got {0}")]
    InvalidBorder(f64),
    #[error("notch frequency {notch_hz} Hz must lie strictly below Nyquist ({nyquist_hz} Hz)")]
    InvalidNotch { notch_hz: f64, nyquist_hz: f64 },
}

/// Faults reported by a [`crate::dsp::SampleSource`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AcquisitionError {
    /// A read hiccup; the acquisition loop logs it and keeps polling.
    #[error("transient acquisition fault: {0}")]
    Transient(String),
    /// The device is gone or kept failing; the session must shut down.
    #[error("fatal acquisition fault: {0}")]
    Fatal(String),
}

/// Errors surfaced by the running session itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
