// src/lib.rs
//! Real-time EEG to control-signal pipeline: samples come in from a board or
//! a recording, overlapping windows go through a small Laplacian and an alpha
//! band-power comparison, and normalized ternary decisions come out of a
//! bounded queue.

pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod openbci;
pub mod queue;
pub mod types;

pub use config::{PipelineConfig, WindowGeometry};
pub use dsp::StopToken;
pub use engine::{spawn, EngineHandle};
pub use error::{AcquisitionError, ConfigError, SessionError};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome, QueueMetrics};
pub use types::{ControlDecision, ControlOutput, SessionReport, Termination};
