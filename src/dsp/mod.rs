// src/dsp/mod.rs
pub mod bandpower;
pub mod buffer;
pub mod dispatch;
pub mod fft;
pub mod lifecycle;
pub mod normalizer;
pub mod pipeline;
pub mod prefilter;
pub mod selector;
pub mod source;
pub mod spatial;

pub use bandpower::{band_power, integrate_band, FrequencyBand};
pub use buffer::{AssemblerPhase, ChannelBuffer, Window, WindowAssembler};
pub use dispatch::{classify, Dispatcher};
pub use fft::{SpectralEstimator, Spectrum};
pub use lifecycle::{idle_wait, FaultTracker, StopToken};
pub use normalizer::{ControlSignalNormalizer, NormalizationHistory, Normalized};
pub use pipeline::{Pipeline, Pumped, SampleFrontend, SignalChain, WindowFeatures};
pub use prefilter::{MainsBandstop, Prefilter};
pub use selector::{select_channels, ChannelSelection};
pub use source::{ManualSource, ReplaySource, Sample, SampleSource, SimulatedSource, SourcePoll};
pub use spatial::{laplacian_reference, FilteredPair, SpatialFilter};
