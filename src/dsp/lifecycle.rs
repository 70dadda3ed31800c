use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

/// Cooperative cancellation flag checked once per acquisition iteration.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts consecutive transient faults and escalates once the limit is hit.
/// A limit of zero behaves as one.
#[derive(Clone, Debug)]
pub struct FaultTracker {
    consecutive: u32,
    total: u64,
    limit: u32,
}

impl FaultTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            total: 0,
            limit: limit.max(1),
        }
    }

    /// A sample made it into the window assembler.
    pub fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Records one transient fault. Returns the fatal reason once the limit
    /// is reached.
    pub fn transient(&mut self, reason: &str) -> Option<String> {
        self.consecutive += 1;
        self.total += 1;
        warn!(
            "acquisition hiccup ({}/{} in a row): {reason}",
            self.consecutive, self.limit
        );
        (self.consecutive >= self.limit).then(|| {
            format!(
                "{} consecutive acquisition failures, last: {reason}",
                self.consecutive
            )
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Back-off used when a source has nothing new yet.
pub fn idle_wait(idle: Duration) {
    if idle.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_on_the_limit_and_resets_on_success() {
        let mut faults = FaultTracker::new(3);
        assert_eq!(faults.transient("crc"), None);
        assert_eq!(faults.transient("crc"), None);
        faults.success();
        assert_eq!(faults.consecutive(), 0);
        assert_eq!(faults.transient("a"), None);
        assert_eq!(faults.transient("b"), None);
        assert_eq!(
            faults.transient("c").as_deref(),
            Some("3 consecutive acquisition failures, last: c")
        );
        assert_eq!(faults.total(), 5);
    }

    #[test]
    fn zero_limit_escalates_on_first_fault() {
        let mut faults = FaultTracker::new(0);
        assert!(faults.transient("gone").is_some());
    }

    #[test]
    fn stop_token_is_shared_between_clones() {
        let token = StopToken::new();
        let other = token.clone();
        assert!(!other.is_stopped());
        token.stop();
        assert!(other.is_stopped());
    }
}
