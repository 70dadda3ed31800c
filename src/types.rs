// src/types.rs
use serde::{Deserialize, Serialize};

use crate::queue::QueueMetrics;

/// Ternary decision derived from the normalized control value.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlDecision {
    /// Normalized value above `+border`.
    High,
    /// Normalized value below `-border`.
    Low,
    Neutral,
}

/// One entry of the outbound queue, produced once per processed window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    pub window_index: u64,
    /// Band power of the second filtered series minus the first.
    pub raw_value: f64,
    pub normalized_value: f64,
    pub decision: ControlDecision,
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Stopped,
    SourceExhausted,
    Fatal(String),
}

impl Termination {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Termination::Fatal(_))
    }
}

/// Summary returned when a session is joined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub termination: Termination,
    pub samples_ingested: u64,
    pub windows_emitted: u64,
    pub windows_processed: u64,
    pub warmup_windows: u64,
    pub transient_faults: u64,
    pub handoff: QueueMetrics,
    pub outbound: QueueMetrics,
}
