use std::sync::Arc;

use log::warn;

use crate::queue::{BoundedQueue, PushOutcome};
use crate::types::{ControlDecision, ControlOutput};

/// `> border` is high, `< -border` is low, anything in between is neutral.
pub fn classify(normalized: f64, border: f64) -> ControlDecision {
    if normalized > border {
        ControlDecision::High
    } else if normalized < -border {
        ControlDecision::Low
    } else {
        ControlDecision::Neutral
    }
}

/// Classifies normalized values and hands them to the consumer queue.
pub struct Dispatcher {
    outbound: Arc<BoundedQueue<ControlOutput>>,
    border: f64,
    lost: u64,
}

impl Dispatcher {
    pub fn new(outbound: Arc<BoundedQueue<ControlOutput>>, border: f64) -> Self {
        Self {
            outbound,
            border,
            lost: 0,
        }
    }

    pub fn border(&self) -> f64 {
        self.border
    }

    /// Outputs evicted or rejected so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn outbound(&self) -> &Arc<BoundedQueue<ControlOutput>> {
        &self.outbound
    }

    pub fn publish(&mut self, window_index: u64, raw_value: f64, normalized_value: f64) -> ControlOutput {
        let output = ControlOutput {
            window_index,
            raw_value,
            normalized_value,
            decision: classify(normalized_value, self.border),
        };
        match self.outbound.push(output) {
            PushOutcome::Accepted => {}
            PushOutcome::DroppedOldest => self.note_loss("evicted the oldest queued output"),
            PushOutcome::TimedOut(_) => self.note_loss("dropped output after block timeout"),
            PushOutcome::Closed(_) => self.note_loss("outbound queue closed"),
        }
        output
    }

    fn note_loss(&mut self, what: &str) {
        self.lost += 1;
        if self.lost == 1 || self.lost % 100 == 0 {
            warn!("consumer is not keeping up: {what} ({} lost so far)", self.lost);
        }
    }
}
