//! Progress reporting for one entity type's copy.
//!
//! Purely observational: progress messages fire when cumulative progress
//! crosses a 5-percentage-point boundary of the estimated total, and the
//! estimate is never used for control flow.

/// Emit a progress message each time this many percentage points pass.
pub const PROGRESS_STEP_PERCENT: f64 = 5.0;

#[derive(Debug)]
pub struct ProgressReporter {
    estimated: u64,
    last_percent: f64,
}

impl ProgressReporter {
    pub fn new(estimated: u64) -> Self {
        Self {
            estimated,
            last_percent: 0.0,
        }
    }

    /// Returns the new completion percentage when `copied` crosses the next
    /// reporting boundary.
    pub fn update(&mut self, copied: u64) -> Option<f64> {
        if self.estimated == 0 {
            return None;
        }
        let percent = copied as f64 / self.estimated as f64 * 100.0;
        if percent - self.last_percent >= PROGRESS_STEP_PERCENT {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}
